//! Transport seam and its reqwest implementation.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::{GatewayError, TransportError};
use crate::request::{OutboundRequest, RequestMethod};

/// Default timeout for requests.
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the project's public API key.
pub(crate) const API_KEY_HEADER: &str = "apikey";

/// Performs one HTTP call.
///
/// Implementations decide which failures mean "credential rejected", which
/// are transient and which are final.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: OutboundRequest) -> Result<Value, TransportError>;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn Transport>;

/// [`Transport`] over reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// Build from the `[backend]` config section.
    pub fn from_config(config: &envelope_config::BackendConfig) -> crate::Result<Self> {
        let mut builder = Self::builder()
            .base_url(&config.url)
            .timeout(config.request_timeout());
        if let Some(key) = config.resolve_api_key() {
            builder = builder.api_key(key);
        }
        builder.build()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| TransportError::Rejected {
                status: 0,
                message: format!("invalid path '{}': {}", path, e),
            })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: OutboundRequest) -> Result<Value, TransportError> {
        let url = self.url(&request.path)?;
        let mut builder = self.http.request(to_method(request.method), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(classify_reqwest_error)?;

        if status.is_success() {
            tracing::trace!(status = status.as_u16(), "Request succeeded");
            return Ok(parse_payload(&bytes));
        }

        let message = error_message(status, &bytes);
        tracing::debug!(status = status.as_u16(), message = %message, "Request failed");
        Err(classify_status(status, message))
    }
}

/// Builder for [`HttpTransport`].
#[derive(Debug)]
pub struct HttpTransportBuilder {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Public API key sent with every request.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> crate::Result<HttpTransport> {
        let base_url = self
            .base_url
            .ok_or_else(|| GatewayError::Config("base_url is required".to_string()))?;

        Ok(HttpTransport {
            http: http_client(self.api_key.as_deref(), self.timeout, self.user_agent)?,
            base_url: normalize_base_url(&base_url)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared HTTP helpers
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn normalize_base_url(raw: &str) -> crate::Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| GatewayError::Config(format!("invalid base URL: {}", e)))?;
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    Ok(url)
}

pub(crate) fn http_client(
    api_key: Option<&str>,
    timeout: Duration,
    user_agent: Option<String>,
) -> crate::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(key) = api_key {
        let value = HeaderValue::from_str(key)
            .map_err(|_| GatewayError::Config("Invalid API key".to_string()))?;
        headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
    }

    let user_agent =
        user_agent.unwrap_or_else(|| format!("envelope-client/{}", env!("CARGO_PKG_VERSION")));

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent(user_agent)
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Map a non-success status to a transport error.
pub(crate) fn classify_status(status: StatusCode, message: String) -> TransportError {
    match status.as_u16() {
        401 => TransportError::CredentialRejected(message),
        408 | 429 => TransportError::Transient(message),
        s if s >= 500 => TransportError::Transient(message),
        s => TransportError::Rejected { status: s, message },
    }
}

/// Every reqwest send/receive error is a network-level failure.
pub(crate) fn classify_reqwest_error(e: reqwest::Error) -> TransportError {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else {
        "network"
    };
    TransportError::Transient(format!("{} error: {}", kind, e))
}

/// Human-readable message from an error body, falling back to the status line.
pub(crate) fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(message)) = map.get(key) {
                return message.clone();
            }
        }
    }
    format!("HTTP {}", status.as_u16())
}

fn parse_payload(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn to_method(method: RequestMethod) -> Method {
    match method {
        RequestMethod::Get => Method::GET,
        RequestMethod::Post => Method::POST,
        RequestMethod::Put => Method::PUT,
        RequestMethod::Patch => Method::PATCH,
        RequestMethod::Delete => Method::DELETE,
    }
}
