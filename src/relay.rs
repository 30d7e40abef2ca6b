//! CORS relay in front of the upstream chat-completions API.
//!
//! Browsers cannot hold the provider credential, so they POST to this relay
//! instead. The relay attaches `Authorization: Bearer <key>`, forwards a
//! normalised body and streams the upstream answer back byte for byte.
//!
//! | Request | Response |
//! |---------|----------|
//! | `OPTIONS` | `204` with CORS headers |
//! | `POST`, valid JSON | upstream status, headers and body, plus CORS headers |
//! | `POST`, malformed JSON | `400` |
//! | `POST`, upstream unreachable | `502` |
//! | `POST`, no key configured | `500` |
//! | any other method | `405` |
//!
//! The forwarded body is `{model, stream, messages}`: `model` falls back to
//! the configured default, `stream` to `false`, `messages` to `[]`. When the
//! caller disconnects, the response body is dropped and with it the upstream
//! request.

use crate::config::Provider;
use crate::{Error, Result};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

pub const UPSTREAM_URL_ENV: &str = "RELAY_UPSTREAM_URL";
pub const API_KEY_ENV: &str = "RELAY_API_KEY";
pub const BIND_ENV: &str = "RELAY_BIND";
pub const DEFAULT_MODEL_ENV: &str = "RELAY_DEFAULT_MODEL";
/// Optional provider name (`dashscope`, `openai`, ...) selecting the defaults
pub const PROVIDER_ENV: &str = "RELAY_PROVIDER";

pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Relay settings
#[derive(Clone)]
pub struct RelayConfig {
    pub upstream_url: String,
    /// Credential attached to every upstream request
    pub api_key: Option<String>,
    pub bind: SocketAddr,
    pub default_model: String,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("upstream_url", &self.upstream_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("bind", &self.bind)
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl RelayConfig {
    /// Settings for `provider`, listening on [`DEFAULT_BIND`]
    pub fn for_provider(provider: Provider, api_key: Option<String>) -> Self {
        Self {
            upstream_url: provider.chat_completions_url().to_string(),
            api_key,
            bind: SocketAddr::from(([127, 0, 0, 1], 8787)),
            default_model: provider.default_model().to_string(),
        }
    }

    /// Read the settings from `RELAY_*` environment variables.
    ///
    /// Without `RELAY_PROVIDER` the DashScope defaults apply. A missing key
    /// is not an error here: the relay starts and answers `500`.
    pub fn from_env() -> Result<Self> {
        let provider = match non_empty_env(PROVIDER_ENV) {
            Some(name) => Provider::parse(&name)
                .ok_or_else(|| Error::config(format!("unknown provider {name:?}")))?,
            None => Provider::DashScope,
        };

        let mut config = Self::for_provider(provider, non_empty_env(API_KEY_ENV));

        if let Some(url) = non_empty_env(UPSTREAM_URL_ENV) {
            config.upstream_url = url;
        }
        if let Some(model) = non_empty_env(DEFAULT_MODEL_ENV) {
            config.default_model = model;
        }
        if let Some(bind) = non_empty_env(BIND_ENV) {
            config.bind = bind
                .parse()
                .map_err(|e| Error::config(format!("invalid {BIND_ENV} {bind:?}: {e}")))?;
        }

        Ok(config)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[derive(Debug)]
struct RelayState {
    config: RelayConfig,
    http_client: reqwest::Client,
}

/// Build the relay router. Every path is handled the same way.
pub fn router(config: RelayConfig) -> Router {
    let state = Arc::new(RelayState {
        config,
        http_client: reqwest::Client::new(),
    });
    Router::new().fallback(relay).with_state(state)
}

/// Bind `config.bind` and serve the relay until the process stops.
pub async fn serve(config: RelayConfig) -> Result<()> {
    let bind = config.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| Error::config(format!("failed to bind {bind}: {e}")))?;

    if config.api_key.is_none() {
        log::warn!("no upstream API key configured; POSTs will get 500");
    }
    log::info!("relay listening on {} -> {}", bind, config.upstream_url);

    axum::serve(listener, router(config))
        .await
        .map_err(|e| Error::other(format!("relay server failed: {e}")))
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    let mut response = (status, message).into_response();
    apply_cors(response.headers_mut());
    response
}

/// Fields of the forwarded body, with the relay's defaults filled in
fn forward_body(incoming: &Value, default_model: &str) -> Value {
    let model = incoming
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(default_model);
    let stream = incoming
        .get("stream")
        .filter(|s| !s.is_null())
        .cloned()
        .unwrap_or(Value::Bool(false));
    let messages = incoming
        .get("messages")
        .filter(|m| !m.is_null())
        .cloned()
        .unwrap_or_else(|| json!([]));

    json!({ "model": model, "stream": stream, "messages": messages })
}

/// Headers that describe the upstream connection rather than the payload
fn is_hop_by_hop(name: &header::HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name.as_str() == "keep-alive"
}

async fn relay(State(state): State<Arc<RelayState>>, method: Method, body: Bytes) -> Response {
    if method == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors(response.headers_mut());
        return response;
    }
    if method != Method::POST {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
    }

    let Some(api_key) = state.config.api_key.as_deref().filter(|k| !k.is_empty()) else {
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "Missing upstream API key");
    };

    let incoming: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            log::debug!("rejecting malformed body: {}", e);
            return plain(StatusCode::BAD_REQUEST, "Bad Request");
        }
    };
    let forward = forward_body(&incoming, &state.config.default_model);
    log::debug!(
        "forwarding to {} (model {}, stream {})",
        state.config.upstream_url,
        forward["model"],
        forward["stream"]
    );

    let upstream = match state
        .http_client
        .post(&state.config.upstream_url)
        .bearer_auth(api_key)
        .json(&forward)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            log::warn!("upstream request failed: {}", e);
            return plain(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };

    let status = upstream.status();
    let mut headers = HeaderMap::new();
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    apply_cors(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_body_defaults() {
        let body = forward_body(&json!({}), "qwen-turbo");
        assert_eq!(
            body,
            json!({"model": "qwen-turbo", "stream": false, "messages": []})
        );

        let body = forward_body(&json!("not an object"), "qwen-turbo");
        assert_eq!(body["model"], "qwen-turbo");
    }

    #[test]
    fn test_forward_body_keeps_caller_fields() {
        let body = forward_body(
            &json!({
                "model": "qwen-vl-plus",
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}],
                "temperature": 0.3
            }),
            "qwen-turbo",
        );

        assert_eq!(body["model"], "qwen-vl-plus");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["content"], "hi");
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_empty_model_uses_default() {
        let body = forward_body(&json!({"model": ""}), "qwen-turbo");
        assert_eq!(body["model"], "qwen-turbo");
    }

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop(&header::TRANSFER_ENCODING));
        assert!(is_hop_by_hop(&header::CONNECTION));
        assert!(!is_hop_by_hop(&header::CONTENT_TYPE));
    }

    #[test]
    fn test_config_debug_redacts_key() {
        let config = RelayConfig::for_provider(Provider::DashScope, Some("sk-secret".into()));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("sk-secret"));
        assert_eq!(config.default_model, "qwen-turbo");
        assert_eq!(config.bind.port(), 8787);
    }
}
