//! Blocking HTTP client for the MLflow REST API.

use super::{RegisteredModel, RegistrySource};
use crate::config::EffectiveConfig;
use crate::error::RegistryError;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;

const PAGE_SIZE: u32 = 1000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    registered_models: Vec<RegisteredModel>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Client for an MLflow tracking server's model registry.
#[derive(Clone, Debug)]
pub struct MlflowClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl MlflowClient {
    /// Create a client for `base_url` (e.g. "http://localhost:4040").
    pub fn new(
        base_url: &str,
        token: Option<String>,
        accept_invalid_certs: bool,
    ) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), token })
    }

    pub fn from_config(config: &EffectiveConfig) -> Result<Self, RegistryError> {
        Self::new(&config.mlflow_uri, config.mlflow_token.clone(), config.mlflow_noverify)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn search_page(&self, page_token: Option<&str>) -> Result<SearchResponse, RegistryError> {
        let mut query: Vec<(&str, String)> = vec![("max_results", PAGE_SIZE.to_string())];
        if let Some(token) = page_token {
            query.push(("page_token", token.to_string()));
        }

        let resp = self
            .authorized(
                self.client
                    .get(format!("{}/api/2.0/mlflow/registered-models/search", self.base_url))
                    .query(&query),
            )
            .send()?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let message = resp.text().unwrap_or_default();
            return Err(RegistryError::Api { status, message });
        }

        resp.json::<SearchResponse>().map_err(|e| RegistryError::Parse(e.to_string()))
    }
}

impl RegistrySource for MlflowClient {
    fn list_models(&self) -> Result<Vec<RegisteredModel>, RegistryError> {
        let mut models = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.search_page(page_token.as_deref())?;
            models.extend(page.registered_models);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!("Registry at {} lists {} models", self.base_url, models.len());
        Ok(models)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = MlflowClient::new("http://localhost:4040/", None, false).expect("client");
        assert_eq!(client.base_url(), "http://localhost:4040");
    }

    #[test]
    fn search_response_tolerates_empty_body() {
        let resp: SearchResponse = serde_json::from_str("{}").expect("parse");
        assert!(resp.registered_models.is_empty());
        assert!(resp.next_page_token.is_none());
    }

    #[test]
    fn unreachable_registry_is_http_error() {
        // Port 9 (discard) on localhost is expected to refuse connections.
        let client = MlflowClient::new("http://127.0.0.1:9", None, false).expect("client");
        let err = client.list_models().expect_err("no registry listening");
        assert!(matches!(err, RegistryError::Http(_)));
    }
}
