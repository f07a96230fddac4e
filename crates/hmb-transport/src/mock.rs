//! Scripted in-memory transport (feature-gated).

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::http::{Credentials, HttpResponse, HttpTransport, RequestOptions, TransportError};

/// One request seen by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub timeout: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Result<HttpResponse, String>>,
    fallback: Option<String>,
    requests: Vec<RecordedRequest>,
    credentials: Option<Credentials>,
    closes: usize,
}

/// Transport that replays queued responses in order and records requests.
///
/// Clones share state, so a test can keep one handle while the session
/// owns another. Once the script is empty every request fails.
#[derive(Clone)]
pub struct MockTransport {
    base_url: String,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: "http://mock.invalid/bus".to_string(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a response.
    pub fn push_response(&self, response: HttpResponse) {
        self.lock().script.push_back(Ok(response));
    }

    /// Queue a `200 OK` response.
    pub fn push_ok(&self, body: impl Into<Bytes>) {
        self.push_response(HttpResponse::ok(body));
    }

    /// Queue a transport failure.
    pub fn push_error(&self, message: impl Into<String>) {
        self.lock().script.push_back(Err(message.into()));
    }

    /// Fail every request once the script runs out, with `message`.
    pub fn fail_when_exhausted(&self, message: impl Into<String>) {
        self.lock().fallback = Some(message.into());
    }

    /// All requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Paths of all requests seen so far.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.lock().requests.iter().map(|r| r.path.clone()).collect()
    }

    /// Number of times `close` was called.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Credentials currently attached.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.lock().credentials.clone()
    }

    fn respond(&self, request: RecordedRequest) -> Result<HttpResponse, TransportError> {
        let mut inner = self.lock();
        inner.requests.push(request);
        match inner.script.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(TransportError::Mock(message)),
            None => Err(TransportError::Mock(
                inner
                    .fallback
                    .clone()
                    .unwrap_or_else(|| "script exhausted".to_string()),
            )),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.lock().credentials = credentials;
    }

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: Bytes,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.respond(RecordedRequest {
            method: "POST",
            path: path.to_string(),
            content_type: Some(content_type.to_string()),
            body,
            timeout: options.timeout,
        })
    }

    async fn get(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        self.respond(RecordedRequest {
            method: "GET",
            path: path.to_string(),
            content_type: None,
            body: Bytes::new(),
            timeout: options.timeout,
        })
    }

    fn close(&self) {
        self.lock().closes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replays_script_in_order() {
        let transport = MockTransport::new();
        transport.push_ok("first");
        transport.push_error("boom");

        let options = RequestOptions::new();
        let resp = tokio_test::assert_ok!(transport.get("/a", &options).await);
        assert_eq!(resp.body, Bytes::from_static(b"first"));
        let err = tokio_test::assert_err!(transport.get("/b", &options).await);
        assert_eq!(err.to_string(), "Mock transport: boom");
        tokio_test::assert_err!(transport.get("/c", &options).await);
        assert_eq!(transport.paths(), ["/a", "/b", "/c"]);
    }
}
