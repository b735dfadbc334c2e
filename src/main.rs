//! mlflow-pyfunc-server: serve MLflow pyfunc models over HTTP
//!
//! Resolves its configuration from `./mlflow-pyfunc-server.cfg`,
//! `~/.mlflow-pyfunc-server.cfg` and the command line, then serves every
//! model of the configured MLflow registry.

use anyhow::Result;

fn main() -> Result<()> {
    mlflow_pyfunc_server::cli::run()
}
