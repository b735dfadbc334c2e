//! HTTP model server
//!
//! Wires the registry client, the model loader, the refresh scheduler and the
//! HTTP worker pool together.

use crate::config::EffectiveConfig;
use crate::model::{MlflowServeLoader, ModelLoader};
use crate::registry::{MlflowClient, RegistrySource};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

pub mod http;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use http::HttpServer;
pub use state::ServerState;

/// Run the server with the default MLflow collaborators until Ctrl-C.
pub fn serve(config: EffectiveConfig) -> Result<()> {
    let registry = MlflowClient::from_config(&config).context("Failed to create MLflow client")?;
    let loader = MlflowServeLoader::from_config(&config);
    serve_with(config, Box::new(registry), Box::new(loader))
}

/// Run the server with the given collaborators until Ctrl-C.
pub fn serve_with(
    config: EffectiveConfig,
    registry: Box<dyn RegistrySource>,
    loader: Box<dyn ModelLoader>,
) -> Result<()> {
    let address = config.bind_address();
    let workers = config.workers;
    let interval = Duration::from_secs(config.timer);

    let state = Arc::new(ServerState::new(Arc::new(config), registry, loader));
    let server = HttpServer::bind(&address, workers)?;
    tracing::info!(
        "Listening on http://{}{}",
        server.local_addr().map(|a| a.to_string()).unwrap_or(address),
        state.config().basepath
    );

    let (refresh, refresh_thread) =
        scheduler::start(state.clone(), interval).context("Failed to start model refresh")?;

    let shutdown = server.shutdown_handle();
    let stop_refresh = refresh.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutting down");
        shutdown.shutdown();
        stop_refresh.shutdown();
    })
    .context("Failed to install Ctrl-C handler")?;

    server.run(state, refresh)?;

    if refresh_thread.join().is_err() {
        tracing::error!("Model refresh thread panicked");
    }
    Ok(())
}
