//! Transport trait and shared request/response types.

use std::{fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },
    #[cfg(any(test, feature = "mock"))]
    #[error("Mock transport: {0}")]
    Mock(String),
}

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    #[must_use]
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Per-call request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Total time allowed for one request, including the long-poll wait.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// The HTTP status code.
    pub status: u16,
    /// The response body bytes.
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub const fn new(status: u16, body: Bytes) -> Self {
        Self { status, body }
    }

    /// `200 OK` with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body.into())
    }

    /// Body as trimmed text (lossy).
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).trim().to_string()
    }

    /// Turn non-2xx responses into errors.
    ///
    /// 400 and 503 carry a human-readable body which is surfaced as the
    /// error detail.
    ///
    /// # Errors
    /// Returns error if the status is not a success.
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        match self.status {
            200..=299 => Ok(self),
            400 => Err(TransportError::BadRequest(self.text())),
            503 => Err(TransportError::ServiceUnavailable(self.text())),
            status => Err(TransportError::Status {
                status,
                body: self.text(),
            }),
        }
    }
}

/// HTTP requests against the bus base URL.
///
/// One in-flight request at a time is all the protocol needs; the session
/// that owns a transport serializes its calls.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Base URL requests are relative to.
    fn base_url(&self) -> &str;

    /// Replace the credentials attached to every request.
    fn set_credentials(&mut self, credentials: Option<Credentials>);

    /// Send a POST with `body` to `<base_url><path>`.
    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: Bytes,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError>;

    /// Send a GET to `<base_url><path>`.
    async fn get(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError>;

    /// Release the underlying connection. Later requests open a new one.
    fn close(&self) {}
}
