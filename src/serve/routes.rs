//! Request routing
//!
//! Routing is kept independent of the socket layer: [`route`] maps a parsed
//! request to a [`Reply`].

use super::scheduler::RefreshHandle;
use super::state::ServerState;
use crate::model::{normalize_route_segment, PredictFailure};
use serde_json::{json, Value};

pub const REFRESH_MESSAGE: &str = "OK. Please be patient :)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

/// The parts of an HTTP request the router looks at.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: Method,
    /// Raw request target, may include a query string
    pub url: &'a str,
    pub authorization: Option<&'a str>,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
    pub headers: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self { status, body, headers: Vec::new() }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn redirect(location: String) -> Self {
        Reply::json(307, Value::Null).with_header("Location", location)
    }

    fn not_found() -> Self {
        Reply::json(404, json!({ "detail": "Not Found" }))
    }

    fn method_not_allowed(allow: &str) -> Self {
        Reply::json(405, json!({ "detail": "Method Not Allowed" })).with_header("Allow", allow)
    }

    fn unauthorized() -> Self {
        Reply::json(401, json!({ "detail": "Incorrect username or password" }))
            .with_header("WWW-Authenticate", "Bearer")
    }
}

/// Check the bearer token against the allowed list. No list, no check.
pub fn check_token(allowed: &[String], authorization: Option<&str>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(header) = authorization else {
        return false;
    };
    let mut parts = header.trim().splitn(2, ' ');
    let scheme = parts.next().unwrap_or("");
    let token = parts.next().unwrap_or("").trim();
    scheme.eq_ignore_ascii_case("bearer") && allowed.iter().any(|t| t == token)
}

pub fn route(state: &ServerState, refresh: &RefreshHandle, req: RequestParts<'_>) -> Reply {
    let basepath = state.config().basepath.as_str();
    let path = req.url.split('?').next().unwrap_or("");

    let rest = if basepath.is_empty() {
        path
    } else if path == basepath {
        "/"
    } else {
        match path.strip_prefix(basepath) {
            Some(rest) if rest.starts_with('/') => rest,
            _ => return Reply::not_found(),
        }
    };

    let segments: Vec<&str> = rest.trim_start_matches('/').split('/').collect();
    match segments.as_slice() {
        [""] => get_only(req.method, || Reply::redirect(format!("{}/models", basepath))),
        ["models"] => get_only(req.method, || Reply::json(200, json!(state.model_names()))),
        ["errors"] => get_only(req.method, || Reply::json(200, json!(state.errors()))),
        ["refresh"] => get_only(req.method, || {
            refresh.trigger();
            Reply::json(200, json!(REFRESH_MESSAGE))
        }),
        ["modelinfo", name] => get_only(req.method, || {
            let info = state.model(&normalize_route_segment(name)).map(|m| m.info());
            Reply::json(200, info.unwrap_or_else(|| json!({})))
        }),
        [name] => predict(state, name, req),
        _ => Reply::not_found(),
    }
}

fn get_only(method: Method, f: impl FnOnce() -> Reply) -> Reply {
    match method {
        Method::Get => f(),
        _ => Reply::method_not_allowed("GET"),
    }
}

fn predict(state: &ServerState, segment: &str, req: RequestParts<'_>) -> Reply {
    let Some(handle) = state.model(&normalize_route_segment(segment)) else {
        return Reply::not_found();
    };
    if req.method == Method::Other {
        return Reply::method_not_allowed("GET, POST");
    }
    if !check_token(&state.config().tokens, req.authorization) {
        return Reply::unauthorized();
    }

    let body = if req.method == Method::Get { &[][..] } else { req.body };
    match handle.apply(body) {
        Ok(output) => Reply::json(200, Value::Object(output)),
        Err(PredictFailure { stage, error }) => {
            tracing::error!("{} for model {}: {}", stage.as_str(), handle.route, error);
            Reply::json(
                422,
                json!({
                    "detail": [{
                        "loc": [stage.as_str()],
                        "msg": error.to_string(),
                        "type": error.kind(),
                    }]
                }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EffectiveConfig;
    use crate::model::testing::{model, version};
    use crate::serve::scheduler;
    use crate::serve::state::testing::{state_with, CountingLoader, FakeRegistry};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        state: Arc<ServerState>,
        refresh: RefreshHandle,
    }

    fn fixture(config: EffectiveConfig) -> Fixture {
        let registry = Arc::new(FakeRegistry::with(vec![
            model("iris", vec![version("3", "Production", "run-3")]),
            model("odd version", vec![version("latest", "Production", "run-x")]),
        ]));
        let state = Arc::new(state_with(config, registry, Arc::new(CountingLoader::default())));
        state.update_models();
        // Scheduler with a long interval; only reacts to explicit triggers.
        let (refresh, _handle) =
            scheduler::start(state.clone(), Duration::from_secs(3600)).expect("scheduler");
        Fixture { state, refresh }
    }

    fn get(f: &Fixture, url: &str) -> Reply {
        let req = RequestParts { method: Method::Get, url, authorization: None, body: b"" };
        route(&f.state, &f.refresh, req)
    }

    fn post(f: &Fixture, url: &str, auth: Option<&str>, body: &[u8]) -> Reply {
        let req = RequestParts { method: Method::Post, url, authorization: auth, body };
        route(&f.state, &f.refresh, req)
    }

    #[test]
    fn lists_models() {
        let f = fixture(EffectiveConfig::default());
        let reply = get(&f, "/models");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, json!(["iris", "odd+version"]));
    }

    #[test]
    fn root_redirects_to_models() {
        let f = fixture(EffectiveConfig::default());
        let reply = get(&f, "/");
        assert_eq!(reply.status, 307);
        assert_eq!(reply.headers, vec![("Location", "/models".to_string())]);
    }

    #[test]
    fn modelinfo_known_and_unknown() {
        let f = fixture(EffectiveConfig::default());
        let reply = get(&f, "/modelinfo/iris");
        assert_eq!(reply.body["version"], json!("3"));
        assert_eq!(get(&f, "/modelinfo/nope").body, json!({}));
    }

    #[test]
    fn errors_and_refresh_endpoints() {
        let f = fixture(EffectiveConfig::default());
        assert_eq!(get(&f, "/errors").body, json!({}));
        let reply = get(&f, "/refresh");
        assert_eq!(reply.body, json!(REFRESH_MESSAGE));
    }

    #[test]
    fn predict_via_post_and_get() {
        let f = fixture(EffectiveConfig::default());
        let reply = post(&f, "/iris", None, br#"{"inputs": [1]}"#);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["echo"], json!([{"inputs": [1]}]));
        assert_eq!(reply.body["x__version"], json!([3]));

        let reply = get(&f, "/iris?verbose=1");
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body["echo"], json!([{}]));
    }

    #[test]
    fn predict_errors_use_422_with_location() {
        let f = fixture(EffectiveConfig::default());
        let reply = post(&f, "/iris", None, b"[broken");
        assert_eq!(reply.status, 422);
        assert_eq!(reply.body["detail"][0]["loc"], json!(["Parse input error"]));

        let reply = post(&f, "/odd+version", None, b"{}");
        assert_eq!(reply.status, 422);
        assert_eq!(reply.body["detail"][0]["loc"], json!(["Parse output error"]));
    }

    #[test]
    fn unknown_routes_and_methods() {
        let f = fixture(EffectiveConfig::default());
        assert_eq!(get(&f, "/nope").status, 404);
        assert_eq!(get(&f, "/a/b/c").status, 404);
        assert_eq!(post(&f, "/models", None, b"").status, 405);
    }

    #[test]
    fn token_protects_model_routes_only() {
        let config = EffectiveConfig { tokens: vec!["secret".into()], ..Default::default() };
        let f = fixture(config);

        let reply = post(&f, "/iris", None, b"{}");
        assert_eq!(reply.status, 401);
        assert!(reply.headers.contains(&("WWW-Authenticate", "Bearer".to_string())));
        assert_eq!(post(&f, "/iris", Some("Bearer wrong"), b"{}").status, 401);
        assert_eq!(post(&f, "/iris", Some("bearer secret"), b"{}").status, 200);
        assert_eq!(get(&f, "/models").status, 200);
    }

    #[test]
    fn basepath_prefixes_every_route() {
        let config = EffectiveConfig { basepath: "/api".into(), ..Default::default() };
        let f = fixture(config);

        assert_eq!(get(&f, "/api/models").status, 200);
        assert_eq!(get(&f, "/models").status, 404);
        assert_eq!(get(&f, "/apimodels").status, 404);
        let reply = get(&f, "/api");
        assert_eq!(reply.status, 307);
        assert_eq!(reply.headers, vec![("Location", "/api/models".to_string())]);
    }

    #[test]
    fn check_token_rules() {
        assert!(check_token(&[], None));
        let allowed = vec!["t1".to_string()];
        assert!(!check_token(&allowed, None));
        assert!(!check_token(&allowed, Some("Basic t1")));
        assert!(check_token(&allowed, Some("Bearer t1")));
    }
}
