//! Prediction output shaping

use crate::error::ModelError;
use serde_json::{json, Map, Value};

pub const VERSION_KEY: &str = "x__version";
pub const RUN_ID_KEY: &str = "x__mlflow_id";

/// Turn raw predictor output into the response object.
///
/// Objects are kept as-is; anything else is wrapped under `predictions`.
/// The model version and run id are appended as single-element lists.
pub fn augment_output(
    raw: Value,
    version: &str,
    run_id: &str,
) -> Result<Map<String, Value>, ModelError> {
    let version: i64 = version
        .trim()
        .parse()
        .map_err(|_| {
            ModelError::Predict(format!("model version '{}' is not an integer", version))
        })?;

    let mut out = match raw {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("predictions".to_string(), other);
            map
        }
    };

    out.insert(VERSION_KEY.to_string(), json!([version]));
    out.insert(RUN_ID_KEY.to_string(), json!([run_id]));
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_non_object_output() {
        let out = augment_output(json!([0.1, 0.9]), "2", "run").expect("augment");
        assert_eq!(out["predictions"], json!([0.1, 0.9]));
        assert_eq!(out[VERSION_KEY], json!([2]));
    }

    #[test]
    fn keeps_object_keys() {
        let out = augment_output(json!({"label": ["a"]}), "1", "r1").expect("augment");
        assert_eq!(out["label"], json!(["a"]));
        assert_eq!(out[RUN_ID_KEY], json!(["r1"]));
    }

    #[test]
    fn non_numeric_version_fails() {
        assert!(augment_output(json!({}), "latest", "r").is_err());
    }
}
