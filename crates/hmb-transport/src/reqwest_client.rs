//! [`reqwest`]-backed implementation of [`HttpTransport`].

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::RequestBuilder;
use tracing::debug;
use url::Url;

use crate::http::{Credentials, HttpResponse, HttpTransport, RequestOptions, TransportError};

/// HTTP transport owning one pooled [`reqwest::Client`].
///
/// The client is built lazily on first use and dropped by [`close`], so a
/// closed transport transparently reconnects on the next request.
///
/// [`close`]: HttpTransport::close
#[derive(Debug)]
pub struct ReqwestTransport {
    base_url: String,
    credentials: Option<Credentials>,
    connect_timeout: Option<Duration>,
    client: Mutex<Option<reqwest::Client>>,
}

impl ReqwestTransport {
    /// Create a transport for the bus at `base_url`
    /// (e.g. `http://hmb.example.org/busname`).
    ///
    /// # Errors
    /// Returns error if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            connect_timeout: None,
            client: Mutex::new(None),
        })
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    fn client(&self) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.client.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        debug!("New http session");
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn prepare(&self, mut builder: RequestBuilder, options: &RequestOptions) -> RequestBuilder {
        if let Some(credentials) = &self.credentials {
            builder = builder.basic_auth(&credentials.user, Some(&credentials.password));
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    async fn execute(builder: RequestBuilder) -> Result<HttpResponse, TransportError> {
        let resp = builder.send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?;
        Ok(HttpResponse::new(status, body))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: Bytes,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path);
        let builder = self
            .client()?
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        let resp = Self::execute(self.prepare(builder, options)).await?;
        debug!(url = %url, status = resp.status, "POST");
        Ok(resp)
    }

    async fn get(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<HttpResponse, TransportError> {
        let url = self.url(path);
        let builder = self.client()?.get(&url);
        let resp = Self::execute(self.prepare(builder, options)).await?;
        debug!(url = %url, status = resp.status, "GET");
        Ok(resp)
    }

    fn close(&self) {
        if self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            debug!("Closed http session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_relative_url() {
        assert!(matches!(
            ReqwestTransport::new("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_url_joining() {
        let transport = ReqwestTransport::new("http://hmb.example.org/bus/").unwrap();
        assert_eq!(transport.base_url(), "http://hmb.example.org/bus");
        assert_eq!(transport.url("/open"), "http://hmb.example.org/bus/open");
    }

    #[test]
    fn test_client_is_reused_until_closed() {
        let transport = ReqwestTransport::new("http://localhost:1").unwrap();
        transport.client().unwrap();
        assert!(transport.client.lock().unwrap().is_some());
        transport.close();
        assert!(transport.client.lock().unwrap().is_none());
        transport.client().unwrap();
        assert!(transport.client.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let transport = ReqwestTransport::new("http://127.0.0.1:1")
            .unwrap()
            .with_connect_timeout(Duration::from_millis(200));
        let err = transport
            .get("/info", &RequestOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Http(_)));
    }
}
