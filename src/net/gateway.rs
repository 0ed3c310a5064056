//! Request gateway: JSON request/response calls with timeout and bounded retry.
//!
//! DESIGN
//! ======
//! A `Gateway` is stateless apart from its `GatewayConfig` and a pooled
//! `reqwest::Client`. Each logical call runs up to `retry_attempts` attempts;
//! attempt `n` (1-indexed) waits `retry_delay * (n - 1)` first. Every attempt is
//! wrapped in its own `tokio::time::timeout`, so a deadline cancels only that
//! attempt's in-flight request.
//!
//! ERROR HANDLING
//! ==============
//! A well-formed 4xx response (JSON or empty body) is a client fault and fails
//! immediately. Transport errors, timeouts, 5xx responses, and unparsable bodies
//! on success or 4xx responses are treated as transient and retried until
//! attempts run out.

#[cfg(test)]
#[path = "gateway_test.rs"]
mod gateway_test;

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::GatewayConfig;

// =============================================================================
// ERROR TYPE
// =============================================================================

/// Classified failure of a gateway call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Status {
        status: u16,
        message: String,
        payload: Value,
    },
    /// A single attempt exceeded the configured timeout.
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The HTTP transport failed (connect, TLS, body read, request build).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// A success or 4xx response carried a body that is not JSON.
    #[error("invalid JSON body (status {status}): {source}")]
    InvalidBody {
        status: u16,
        source: serde_json::Error,
    },
    /// A success response did not match the expected shape.
    #[error("unexpected response shape: {0}")]
    Shape(serde_json::Error),
}

impl ApiError {
    /// Numeric HTTP status, when the server produced one.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } | Self::InvalidBody { status, .. } => Some(*status),
            Self::Http(error) => error.status().map(|s| s.as_u16()),
            Self::Timeout(_) | Self::Shape(_) => None,
        }
    }

    /// Structured error body, when the server sent one.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Status { payload, .. } if !payload.is_null() => Some(payload),
            _ => None,
        }
    }

    /// Whether this is a well-formed client-fault (4xx) response.
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(self, Self::Status { status, .. } if (400..500).contains(status))
    }

    /// Whether another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { .. } => !self.is_client_fault(),
            Self::Timeout(_) | Self::InvalidBody { .. } => true,
            Self::Http(error) => !error.is_builder(),
            Self::Shape(_) => false,
        }
    }
}

// =============================================================================
// CALL
// =============================================================================

/// One request description: method, path, query, and optional JSON body.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
}

impl Call {
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

/// HTTP client for the game backend.
#[derive(Clone, Debug)]
pub struct Gateway {
    http: reqwest::Client,
    config: GatewayConfig,
}

impl Gateway {
    /// Build a gateway from config.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the underlying HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run a call and decode the response body into `T`.
    ///
    /// # Errors
    ///
    /// Returns the last attempt's [`ApiError`] once retries are exhausted, a
    /// client fault immediately, or [`ApiError::Shape`] if the body does not
    /// decode into `T`.
    pub async fn send<T>(&self, call: &Call) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let value = self.send_value(call).await?;
        serde_json::from_value(value).map_err(ApiError::Shape)
    }

    /// Run a call and return the raw JSON body.
    ///
    /// # Errors
    ///
    /// See [`Gateway::send`].
    pub async fn send_value(&self, call: &Call) -> Result<Value, ApiError> {
        let max_attempts = self.config.retry_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            debug!(method = %call.method, path = %call.path, attempt, "api: request");
            match self.attempt(call).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt >= max_attempts || !error.is_retryable() => {
                    warn!(
                        method = %call.method,
                        path = %call.path,
                        attempt,
                        status = ?error.status(),
                        error = %error,
                        "api: request failed"
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = retry_delay(self.config.retry_delay, attempt);
                    warn!(
                        method = %call.method,
                        path = %call.path,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "api: retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(&self, call: &Call) -> Result<Value, ApiError> {
        let url = join_url(&self.config.base_url, &call.path);
        let mut request = self.http.request(call.method.clone(), url);
        if !call.query.is_empty() {
            request = request.query(&call.query);
        }
        if let Some(body) = &call.body {
            request = request.json(body);
        }

        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            Ok::<_, ApiError>((status, bytes))
        };
        let (status, bytes) = tokio::time::timeout(self.config.timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout(self.config.timeout))??;

        classify_response(status, &bytes)
    }
}

/// Delay before the attempt following `completed` failed attempts.
#[must_use]
pub fn retry_delay(unit: Duration, completed: u32) -> Duration {
    unit.saturating_mul(completed)
}

fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

fn classify_response(status: StatusCode, bytes: &[u8]) -> Result<Value, ApiError> {
    let parsed = if bytes.iter().all(u8::is_ascii_whitespace) {
        Ok(Value::Object(Map::new()))
    } else {
        serde_json::from_slice::<Value>(bytes)
    };

    if status.is_success() {
        return parsed.map_err(|source| ApiError::InvalidBody {
            status: status.as_u16(),
            source,
        });
    }

    if status.is_client_error() {
        if let Err(source) = parsed {
            return Err(ApiError::InvalidBody {
                status: status.as_u16(),
                source,
            });
        }
    }

    let payload = parsed.unwrap_or(Value::Null);
    let message = error_message(&payload).unwrap_or_else(|| format!("Error {}", status.as_u16()));
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
        payload,
    })
}

fn error_message(payload: &Value) -> Option<String> {
    ["message", "mensaje", "error"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(ToOwned::to_owned)
}
