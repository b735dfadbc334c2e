//! Served models: collaborator traits, version selection and handles

use crate::error::ModelError;
use crate::registry::{ModelVersion, RegisteredModel};
use chrono::{TimeZone, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::{json, Map, Value};

pub mod output;
pub mod process;

pub use process::MlflowServeLoader;

/// Characters left as-is in route names (form encoding, like `quote_plus`)
const ROUTE_ENCODE_SET: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'_').remove(b'.').remove(b'-').remove(b'~');

pub const STAGE_PRODUCTION: &str = "Production";
pub const STAGE_STAGING: &str = "Staging";

/// A loaded model that can answer predictions.
pub trait Predictor: Send + Sync {
    fn predict(&self, input: &Value) -> Result<Value, ModelError>;
}

/// Turns a registry entry into a [`Predictor`].
pub trait ModelLoader: Send + Sync {
    fn load(
        &self,
        model: &RegisteredModel,
        version: &ModelVersion,
    ) -> Result<Box<dyn Predictor>, ModelError>;
}

/// Pick the version to serve.
///
/// Staging when preferred and available, else Production, else the first
/// listed version.
pub fn select_version(model: &RegisteredModel, prefer_staging: bool) -> Option<&ModelVersion> {
    let by_stage = |stage: &str| model.latest_versions.iter().find(|v| v.current_stage == stage);

    if prefer_staging {
        if let Some(v) = by_stage(STAGE_STAGING) {
            return Some(v);
        }
    }
    by_stage(STAGE_PRODUCTION).or_else(|| model.latest_versions.first())
}

/// Whether the tag filter admits `model`. An empty filter admits everything.
pub fn matches_tags(model: &RegisteredModel, tags: &[String]) -> bool {
    tags.is_empty() || tags.iter().any(|t| model.has_tag(t))
}

/// URL path segment under which a model is served.
pub fn route_name(model_name: &str) -> String {
    utf8_percent_encode(model_name, ROUTE_ENCODE_SET).to_string().replace("%20", "+")
}

/// Normalize a path segment from a request to its [`route_name`] form.
pub fn normalize_route_segment(segment: &str) -> String {
    let plus_as_space = segment.replace('+', " ");
    let decoded = percent_decode_str(&plus_as_space).decode_utf8_lossy();
    route_name(&decoded)
}

/// Stage of a failed prediction, reported as the error location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictStage {
    ParseInput,
    Predict,
    ParseOutput,
}

impl PredictStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictStage::ParseInput => "Parse input error",
            PredictStage::Predict => "Model prediction error",
            PredictStage::ParseOutput => "Parse output error",
        }
    }
}

#[derive(Debug)]
pub struct PredictFailure {
    pub stage: PredictStage,
    pub error: ModelError,
}

/// A model currently being served.
pub struct ModelHandle {
    pub route: String,
    pub model: RegisteredModel,
    pub version: ModelVersion,
    predictor: Box<dyn Predictor>,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("route", &self.route)
            .field("version", &self.version.version)
            .field("run_id", &self.version.run_id)
            .finish()
    }
}

impl ModelHandle {
    pub fn new(
        model: RegisteredModel,
        version: ModelVersion,
        predictor: Box<dyn Predictor>,
    ) -> Self {
        Self { route: route_name(&model.name), model, version, predictor }
    }

    pub fn run_id(&self) -> &str {
        &self.version.run_id
    }

    /// Creation time formatted as `%Y-%m-%d %H:%M` (UTC).
    pub fn creation(&self) -> String {
        Utc.timestamp_millis_opt(self.version.creation_timestamp)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default()
    }

    pub fn info(&self) -> Value {
        json!({
            "name": self.model.name,
            "version": self.version.version,
            "stage": self.version.current_stage,
            "run_id": self.version.run_id,
            "source": self.version.source,
            "description": self.model.description.clone().unwrap_or_default(),
            "creation": self.creation(),
            "latest_versions": self.model.latest_versions,
        })
    }

    /// Run a prediction on a raw request body. An empty body means `{}`.
    pub fn apply(&self, body: &[u8]) -> Result<Map<String, Value>, PredictFailure> {
        let input: Value = if body.iter().all(u8::is_ascii_whitespace) {
            Value::Object(Map::new())
        } else {
            serde_json::from_slice(body).map_err(|e| PredictFailure {
                stage: PredictStage::ParseInput,
                error: ModelError::Predict(e.to_string()),
            })?
        };

        let raw = self
            .predictor
            .predict(&input)
            .map_err(|error| PredictFailure { stage: PredictStage::Predict, error })?;

        output::augment_output(raw, &self.version.version, &self.version.run_id)
            .map_err(|error| PredictFailure { stage: PredictStage::ParseOutput, error })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::registry::ModelTag;

    #[test]
    fn prefers_production_by_default() {
        let m = model(
            "m",
            vec![
                version("1", "None", "a"),
                version("2", "Staging", "b"),
                version("3", "Production", "c"),
            ],
        );
        assert_eq!(select_version(&m, false).map(|v| v.version.as_str()), Some("3"));
        assert_eq!(select_version(&m, true).map(|v| v.version.as_str()), Some("2"));
    }

    #[test]
    fn staging_preference_falls_back_to_production() {
        let m = model("m", vec![version("1", "Production", "a")]);
        assert_eq!(select_version(&m, true).map(|v| v.version.as_str()), Some("1"));
    }

    #[test]
    fn falls_back_to_first_version() {
        let m = model("m", vec![version("7", "None", "a"), version("8", "Archived", "b")]);
        assert_eq!(select_version(&m, false).map(|v| v.version.as_str()), Some("7"));
        assert!(select_version(&model("empty", vec![]), false).is_none());
    }

    #[test]
    fn tag_filter() {
        let mut m = model("m", vec![]);
        assert!(matches_tags(&m, &[]));
        assert!(!matches_tags(&m, &["prod".to_string()]));
        m.tags.push(ModelTag { key: "prod".into(), value: String::new() });
        assert!(matches_tags(&m, &["other".to_string(), "prod".to_string()]));
    }

    #[test]
    fn route_names_are_form_encoded() {
        assert_eq!(route_name("iris"), "iris");
        assert_eq!(route_name("my model/v2"), "my+model%2Fv2");
        assert_eq!(normalize_route_segment("my%20model%2Fv2"), "my+model%2Fv2");
        assert_eq!(normalize_route_segment("my+model%2fv2"), "my+model%2Fv2");
    }

    #[test]
    fn apply_augments_output() {
        let handle = ModelHandle::new(
            model("iris", vec![version("3", "Production", "run-3")]),
            version("3", "Production", "run-3"),
            Box::new(EchoPredictor),
        );
        let out = handle.apply(br#"{"x": [1, 2]}"#).expect("predict");
        assert_eq!(out["echo"], json!([{"x": [1, 2]}]));
        assert_eq!(out["x__version"], json!([3]));
        assert_eq!(out["x__mlflow_id"], json!(["run-3"]));
    }

    #[test]
    fn apply_with_empty_body_uses_empty_object() {
        let handle = ModelHandle::new(
            model("m", vec![]),
            version("1", "Production", "r"),
            Box::new(EchoPredictor),
        );
        let out = handle.apply(b"  ").expect("predict");
        assert_eq!(out["echo"], json!([{}]));
    }

    #[test]
    fn apply_rejects_invalid_json() {
        let handle = ModelHandle::new(
            model("m", vec![]),
            version("1", "Production", "r"),
            Box::new(EchoPredictor),
        );
        let failure = handle.apply(b"{not json").expect_err("bad input");
        assert_eq!(failure.stage, PredictStage::ParseInput);
    }

    #[test]
    fn info_formats_creation_time() {
        let handle = ModelHandle::new(
            model("m", vec![]),
            version("1", "Production", "r"),
            Box::new(EchoPredictor),
        );
        let info = handle.info();
        assert_eq!(info["creation"], json!("2022-04-15 05:20"));
        assert_eq!(info["description"], json!("m model"));
    }
}
