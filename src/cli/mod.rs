//! Command-line interface for mlflow-pyfunc-server
//!
//! Settings given on the command line override both config files
//! (`./mlflow-pyfunc-server.cfg`, then `~/.mlflow-pyfunc-server.cfg`).

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{candidate_paths, ConfigResolver, OsFs, PartialConfig, Resolution};
use crate::error::ConfigError;

mod utils;

/// Serve MLflow pyfunc models from a model registry over HTTP
#[derive(Parser, Debug, Default)]
#[command(name = "mlflow-pyfunc-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Hostname or address to bind
    #[arg(long, value_name = "ADDRESS")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Basepath of the server (e.g. /models-api)
    #[arg(short, long, value_name = "PATH")]
    pub basepath: Option<String>,

    /// Number of HTTP worker threads
    #[arg(short, long, value_name = "COUNT")]
    pub workers: Option<usize>,

    /// Seconds between model refreshes from the registry
    #[arg(short, long, value_name = "SECONDS")]
    pub timer: Option<u64>,

    /// Prefer Staging model versions over Production
    #[arg(short, long)]
    pub staging: bool,

    /// Only serve models carrying one of these tags (repeatable or comma-separated)
    #[arg(long, value_name = "TAGS", value_delimiter = ',', num_args = 1..)]
    pub tags: Vec<String>,

    /// Allowed bearer token for model routes (repeatable)
    #[arg(long = "token", value_name = "TOKEN")]
    pub tokens: Vec<String>,

    /// MLflow server location
    #[arg(long = "mlflow", value_name = "URI")]
    pub mlflow_uri: Option<String>,

    /// Bearer token for the MLflow server
    #[arg(long, value_name = "TOKEN")]
    pub mlflow_token: Option<String>,

    /// Ignore TLS certificate problems when talking to MLflow
    #[arg(long)]
    pub mlflow_noverify: bool,

    /// Print the resolved configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,

    /// Enable verbose logging (sets log level to DEBUG)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Settings explicitly given on the command line.
    pub fn overrides(&self) -> PartialConfig {
        PartialConfig {
            host: self.host.clone(),
            port: self.port,
            workers: self.workers,
            mlflow_uri: self.mlflow_uri.clone(),
            basepath: self.basepath.clone(),
            timer: self.timer,
            staging: self.staging.then_some(true),
            tags: (!self.tags.is_empty()).then(|| self.tags.clone()),
            tokens: (!self.tokens.is_empty()).then(|| self.tokens.clone()),
            mlflow_token: self.mlflow_token.clone(),
            mlflow_noverify: self.mlflow_noverify.then_some(true),
        }
    }
}

pub fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        // --help and --version
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => return Err(ConfigError::Arguments(e.to_string().trim_end().to_string()).into()),
    };

    // RUST_LOG in the environment always takes precedence; --verbose falls back to DEBUG.
    let filter = if cli.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    let resolution = resolve(&cli)?;

    if cli.print_config {
        let shown = utils::redacted(&resolution.config);
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }

    crate::serve::serve(resolution.config)
}

fn resolve(cli: &Cli) -> Result<Resolution> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let home = utils::home_dir();
    let candidates = candidate_paths(&cwd, home.as_deref());

    let resolution = ConfigResolver::new(&OsFs, candidates).resolve(cli.overrides())?;

    if resolution.sources.is_empty() {
        tracing::info!("No config sources found; using built-in defaults");
    } else {
        tracing::info!("Configuration sources: {}", resolution.sources.join(", "));
    }
    for (field, source) in &resolution.origins {
        tracing::debug!("{} set by {}", field, source);
    }
    Ok(resolution)
}
