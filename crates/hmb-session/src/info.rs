//! Read-only server introspection.

use hmb_core::CodecError;
use hmb_transport::HttpTransport;
use serde_json::Value;
use tracing::{Instrument, error};

use crate::{HmbSession, SessionError};

impl<T: HttpTransport> HmbSession<T> {
    /// Queues, topics and available data known to the server.
    ///
    /// # Errors
    /// Returns error if the request fails or the reply is not JSON.
    pub async fn info(&self) -> Result<Value, SessionError> {
        self.info_request("info").await
    }

    /// Functions and capabilities supported by the server, optionally with
    /// the server software name and version.
    ///
    /// # Errors
    /// Returns error if the request fails or the reply is not JSON.
    pub async fn features(&self) -> Result<Value, SessionError> {
        self.info_request("features").await
    }

    /// Connected clients.
    ///
    /// # Errors
    /// Returns error if the request fails or the reply is not JSON.
    pub async fn status(&self) -> Result<Value, SessionError> {
        self.info_request("status").await
    }

    async fn info_request(&self, cmd: &str) -> Result<Value, SessionError> {
        let path = format!("/{cmd}");
        let fetch = async {
            let resp = self
                .transport()
                .get(&path, self.request_options())
                .await?
                .error_for_status()?;
            let value: Value = serde_json::from_slice(&resp.body).map_err(CodecError::from)?;
            Ok::<_, SessionError>(value)
        };
        fetch
            .instrument(self.span().clone())
            .await
            .inspect_err(|e| error!(error = %e, "Unable to access {path}"))
    }
}
