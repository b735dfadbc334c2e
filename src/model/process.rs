//! Model execution through `mlflow models serve` child processes
//!
//! Each served model runs in its own scoring process on a free local port.
//! Predictions are proxied to the process' `/invocations` endpoint.

use super::{ModelLoader, Predictor};
use crate::config::EffectiveConfig;
use crate::error::ModelError;
use crate::registry::{ModelVersion, RegisteredModel};
use reqwest::blocking::Client;
use serde_json::Value;
use std::fs::{self, File};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const PREDICT_TIMEOUT: Duration = Duration::from_secs(300);

/// Proxies predictions to a scoring server's `/invocations` endpoint.
pub struct InvocationsPredictor {
    client: Client,
    url: String,
}

impl InvocationsPredictor {
    pub fn new(base_url: &str) -> Result<Self, ModelError> {
        let client = Client::builder().timeout(PREDICT_TIMEOUT).build()?;
        Ok(Self { client, url: format!("{}/invocations", base_url.trim_end_matches('/')) })
    }
}

impl Predictor for InvocationsPredictor {
    fn predict(&self, input: &Value) -> Result<Value, ModelError> {
        let resp = self.client.post(&self.url).json(input).send()?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(ModelError::Predict(format!(
                "scoring server returned {}: {}",
                status, text
            )));
        }
        resp.json::<Value>()
            .map_err(|e| ModelError::Predict(format!("invalid scoring response: {}", e)))
    }
}

/// A running scoring process. The process is killed on drop.
pub struct ServedProcess {
    child: Mutex<Child>,
    predictor: InvocationsPredictor,
}

impl Predictor for ServedProcess {
    fn predict(&self, input: &Value) -> Result<Value, ModelError> {
        self.predictor.predict(input)
    }
}

impl Drop for ServedProcess {
    fn drop(&mut self) {
        if let Ok(child) = self.child.get_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Loads models by spawning `mlflow models serve`.
#[derive(Debug, Clone)]
pub struct MlflowServeLoader {
    mlflow_command: String,
    tracking_uri: String,
    tracking_token: Option<String>,
    insecure_tls: bool,
    log_dir: PathBuf,
    startup_timeout: Duration,
}

impl MlflowServeLoader {
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self {
            mlflow_command: "mlflow".to_string(),
            tracking_uri: config.mlflow_uri.clone(),
            tracking_token: config.mlflow_token.clone(),
            insecure_tls: config.mlflow_noverify,
            log_dir: std::env::temp_dir().join(crate::config::SERVICE_NAME),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    /// Override the `mlflow` executable.
    pub fn mlflow_command(mut self, command: impl Into<String>) -> Self {
        self.mlflow_command = command.into();
        self
    }

    /// Directory for the scoring processes' log files.
    pub fn log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = dir;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    fn spawn(
        &self,
        model: &RegisteredModel,
        version: &ModelVersion,
        port: u16,
    ) -> Result<Child, ModelError> {
        fs::create_dir_all(&self.log_dir)?;
        let log_path = self.log_dir.join(format!("{}_servelog.txt", version.run_id));
        let log = File::options().create(true).append(true).open(&log_path)?;

        let model_uri = format!("models:/{}/{}", model.name, version.version);
        let mut cmd = Command::new(&self.mlflow_command);
        cmd.args(["models", "serve", "-m", &model_uri])
            .args(["--host", "127.0.0.1", "--port", &port.to_string()])
            .args(["--env-manager", "local"])
            .env("MLFLOW_TRACKING_URI", &self.tracking_uri)
            .stdin(Stdio::null())
            .stdout(log.try_clone()?)
            .stderr(log);
        if let Some(token) = &self.tracking_token {
            cmd.env("MLFLOW_TRACKING_TOKEN", token);
        }
        if self.insecure_tls {
            cmd.env("MLFLOW_TRACKING_INSECURE_TLS", "true");
        }

        tracing::debug!(
            "Starting scoring process for {} on port {} (log: {})",
            model_uri,
            port,
            log_path.display()
        );
        cmd.spawn().map_err(|e| ModelError::Load {
            name: model.name.clone(),
            reason: format!("failed to start '{}': {}", self.mlflow_command, e),
        })
    }

    fn wait_until_ready(
        &self,
        name: &str,
        child: &mut Child,
        base_url: &str,
    ) -> Result<(), ModelError> {
        let client = Client::builder().timeout(POLL_INTERVAL * 4).build()?;
        let ping = format!("{}/ping", base_url);
        let deadline = Instant::now() + self.startup_timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(ModelError::Load {
                    name: name.to_string(),
                    reason: format!("scoring process exited during startup ({})", status),
                });
            }
            if let Ok(resp) = client.get(&ping).send() {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ModelError::Load {
                    name: name.to_string(),
                    reason: format!("scoring process not ready after {:?}", self.startup_timeout),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ModelLoader for MlflowServeLoader {
    fn load(
        &self,
        model: &RegisteredModel,
        version: &ModelVersion,
    ) -> Result<Box<dyn Predictor>, ModelError> {
        let port = free_port()?;
        let mut child = self.spawn(model, version, port)?;
        let base_url = format!("http://127.0.0.1:{}", port);

        if let Err(e) = self.wait_until_ready(&model.name, &mut child, &base_url) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        let predictor = InvocationsPredictor::new(&base_url)?;
        Ok(Box::new(ServedProcess { child: Mutex::new(child), predictor }))
    }
}

/// Ask the OS for an unused local port.
pub fn free_port() -> Result<u16, ModelError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing::{model, version};
    use serde_json::json;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_port().expect("port"), 0);
    }

    #[test]
    fn missing_mlflow_executable_is_load_error() {
        let tmp = TempDir::new().expect("tmp");
        let loader = MlflowServeLoader::from_config(&EffectiveConfig::default())
            .mlflow_command("definitely-not-an-mlflow-binary")
            .log_dir(tmp.path().to_path_buf());

        let m = model("iris", vec![version("1", "Production", "run1")]);
        let err = loader.load(&m, &m.latest_versions[0]).err().expect("spawn must fail");
        assert!(matches!(err, ModelError::Load { .. }));
        assert!(tmp.path().join("run1_servelog.txt").exists());
    }

    #[test]
    fn invocations_predictor_proxies_json() {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let port = server.server_addr().to_ip().expect("ip addr").port();

        let handle = thread::spawn(move || {
            let mut request = server.recv().expect("request");
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).expect("body");
            assert_eq!(request.url(), "/invocations");
            let input: Value = serde_json::from_str(&body).expect("json body");
            let reply = json!({ "predictions": [input["inputs"][0].as_i64().unwrap_or(0) * 2] });
            request
                .respond(tiny_http::Response::from_string(reply.to_string()))
                .expect("respond");
        });

        let predictor =
            InvocationsPredictor::new(&format!("http://127.0.0.1:{port}")).expect("client");
        let out = predictor.predict(&json!({ "inputs": [21] })).expect("predict");
        assert_eq!(out, json!({ "predictions": [42] }));
        handle.join().expect("server thread");
    }
}
