//! Transport layer.
//!
//! A [`Transport`] moves one [`ApiRequest`] over the wire and hands back the
//! [`RawResponse`] whatever its status; only network-level failures are
//! errors. The [`Dispatcher`](retry::Dispatcher) sits on top, adding
//! credentials, envelope decoding and the retry policy.
//!
//! The reqwest-backed [`HttpTransport`](http::HttpTransport) is available with
//! the `http-client` feature. Tests substitute scripted transports.

#[cfg(feature = "http-client")]
pub mod http;
pub mod retry;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportErrorKind;

pub use ::http::Method;
pub use retry::{Dispatcher, RetryPolicy, Sleeper, TokioSleeper};

/// One API call, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path such as `/v1/videos/text2video/{id}`.
    pub path: String,
    /// Query parameters, in order.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Per-call timeout; the transport default applies when `None`.
    pub timeout: Option<Duration>,
}

impl ApiRequest {
    /// Create a request with no query, body, or headers
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: HashMap::new(),
            timeout: None,
        }
    }

    /// `GET path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// `POST path` with a JSON body
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(body);
        request
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Add a header
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Get a header value, ignoring ASCII case
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if repeating the call cannot create a second resource.
    pub fn is_idempotent(&self) -> bool {
        self.method.is_idempotent()
    }
}

/// Response as received, before envelope decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HashMap<String, String>,
    /// Response body
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Create a response with no headers
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Response carrying a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        let mut response = Self::new(status, body.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A call that never produced an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct TransportFailure {
    /// Classification.
    pub kind: TransportErrorKind,
    /// Description from the HTTP stack.
    pub message: String,
}

impl TransportFailure {
    /// Creates a failure of the given kind.
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Moves requests over the network.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use kling::transport::{ApiRequest, RawResponse, Transport, TransportFailure};
///
/// struct Offline;
///
/// #[async_trait]
/// impl Transport for Offline {
///     async fn send(&self, _request: &ApiRequest) -> Result<RawResponse, TransportFailure> {
///         Ok(RawResponse::new(503, "maintenance"))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` once. Any HTTP status is a successful send.
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportFailure>;
}

/// Per-call overrides of the client defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Timeout for each attempt.
    pub timeout: Option<Duration>,
    /// Retry budget for this call.
    pub max_retries: Option<u32>,
    /// Allow retrying a create call.
    pub retry_non_idempotent: Option<bool>,
}

impl CallOptions {
    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry budget.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Opts a create call into retries.
    pub fn retry_non_idempotent(mut self, allow: bool) -> Self {
        self.retry_non_idempotent = Some(allow);
        self
    }
}
