//! Deserializable client configuration.

use std::{fmt, path::Path, time::Duration};

use hmb_core::{Encoding, QueueCursor, SessionParameters};
use hmb_transport::{ReqwestTransport, RequestOptions};
use serde::{Deserialize, Serialize};

use crate::{HmbSession, SessionError, session::HEARTBEAT_GRACE};

/// Connect timeout used with long-poll sessions.
const LONG_POLL_CONNECT_TIMEOUT: Duration = Duration::from_millis(6050);

/// Everything needed to build a session, as read from a JSON file.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Bus URL, e.g. `http://hmb.example.org/busname`.
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub encoding: Encoding,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: f64,
    #[serde(default)]
    pub autocreate_queues: bool,
    #[serde(default)]
    pub heartbeat_secs: Option<u64>,
    #[serde(default)]
    pub recv_limit: Option<i64>,
    /// Defaults to 6.05 s when a heartbeat is set.
    #[serde(default)]
    pub connect_timeout_secs: Option<f64>,
    /// Defaults to the heartbeat plus 5 s when a heartbeat is set.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
    /// Queues to read.
    #[serde(default)]
    pub queues: Vec<String>,
    /// Number of stored messages to read before the tail of each queue.
    #[serde(default = "default_backfill")]
    pub backfill: u32,
    #[serde(default = "default_keep")]
    pub keep: bool,
}

const fn default_retry_wait_secs() -> f64 {
    1.0
}

const fn default_backfill() -> u32 {
    10
}

const fn default_keep() -> bool {
    true
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("encoding", &self.encoding)
            .field("retry_wait_secs", &self.retry_wait_secs)
            .field("autocreate_queues", &self.autocreate_queues)
            .field("heartbeat_secs", &self.heartbeat_secs)
            .field("recv_limit", &self.recv_limit)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("timeout_secs", &self.timeout_secs)
            .field("queues", &self.queues)
            .field("backfill", &self.backfill)
            .field("keep", &self.keep)
            .finish()
    }
}

impl SessionConfig {
    /// Configuration with defaults for everything but the URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: None,
            password: None,
            encoding: Encoding::default(),
            retry_wait_secs: default_retry_wait_secs(),
            autocreate_queues: false,
            heartbeat_secs: None,
            recv_limit: None,
            connect_timeout_secs: None,
            timeout_secs: None,
            queues: Vec::new(),
            backfill: default_backfill(),
            keep: default_keep(),
        }
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the document is invalid.
    pub fn from_json_str(text: &str) -> Result<Self, SessionError> {
        serde_json::from_str(text).map_err(|e| SessionError::Config(e.to_string()))
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the file cannot be read or parsed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Parameters posted on open: every queue starts `backfill` messages
    /// before its tail.
    #[must_use]
    pub fn params(&self) -> SessionParameters {
        let mut param = SessionParameters {
            heartbeat: self.heartbeat_secs,
            recv_limit: self.recv_limit,
            ..SessionParameters::default()
        };
        for queue in &self.queues {
            param.queue.insert(
                queue.clone(),
                QueueCursor::backlog(self.backfill).keep(self.keep),
            );
        }
        param
    }

    /// Request options carrying the effective request timeout.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the timeout is not a valid duration.
    pub fn request_options(&self) -> Result<RequestOptions, SessionError> {
        let timeout = match (self.timeout_secs, self.heartbeat_secs) {
            (Some(secs), _) => Some(seconds("timeout_secs", secs)?),
            (None, Some(heartbeat)) => Some(
                Duration::from_secs(heartbeat)
                    .checked_add(HEARTBEAT_GRACE)
                    .ok_or_else(|| SessionError::Config("heartbeat_secs: too large".to_string()))?,
            ),
            (None, None) => None,
        };
        let options = RequestOptions::new();
        Ok(match timeout {
            Some(timeout) => options.timeout(timeout),
            None => options,
        })
    }

    /// Effective TCP connect timeout.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the timeout is not a valid duration.
    pub fn connect_timeout(&self) -> Result<Option<Duration>, SessionError> {
        match (self.connect_timeout_secs, self.heartbeat_secs) {
            (Some(secs), _) => seconds("connect_timeout_secs", secs).map(Some),
            (None, Some(_)) => Ok(Some(LONG_POLL_CONNECT_TIMEOUT)),
            (None, None) => Ok(None),
        }
    }

    /// Wait between two attempts.
    ///
    /// # Errors
    /// Returns [`SessionError::Config`] if the wait is not a valid duration.
    pub fn retry_wait(&self) -> Result<Duration, SessionError> {
        seconds("retry_wait_secs", self.retry_wait_secs)
    }

    /// Build a closed session over a [`ReqwestTransport`].
    ///
    /// # Errors
    /// Returns error if the URL or a duration is invalid.
    pub fn into_session(self) -> Result<HmbSession<ReqwestTransport>, SessionError> {
        let mut transport = ReqwestTransport::new(&self.url)?;
        if let Some(timeout) = self.connect_timeout()? {
            transport = transport.with_connect_timeout(timeout);
        }

        let mut builder = HmbSession::with_transport(transport)
            .param(self.params())
            .encoding(self.encoding)
            .retry_wait(self.retry_wait()?)
            .autocreate_queues(self.autocreate_queues)
            .request_options(self.request_options()?);
        if let Some(user) = self.user {
            builder = builder.authentication(user, self.password.unwrap_or_default());
        }
        Ok(builder.build())
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration, SessionError> {
    Duration::try_from_secs_f64(secs).map_err(|e| SessionError::Config(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use hmb_transport::HttpTransport;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::from_json_str(r#"{"url": "http://localhost:8000/bus"}"#).unwrap();
        assert_eq!(config, SessionConfig::new("http://localhost:8000/bus"));
        assert_eq!(config.encoding, Encoding::Bson);
        assert_eq!(config.retry_wait().unwrap(), Duration::from_secs(1));
        assert_eq!(config.request_options().unwrap().timeout, None);
        assert_eq!(config.connect_timeout().unwrap(), None);
        assert!(config.params().queue.is_empty());
    }

    #[test]
    fn test_heartbeat_derives_timeouts() {
        let config = SessionConfig::from_json_str(
            r#"{"url": "http://localhost/bus", "heartbeat_secs": 30, "queues": ["A", "B"], "backfill": 2}"#,
        )
        .unwrap();

        assert_eq!(
            config.request_options().unwrap().timeout,
            Some(Duration::from_secs(35))
        );
        assert_eq!(
            config.connect_timeout().unwrap(),
            Some(Duration::from_millis(6050))
        );

        let params = config.params();
        assert_eq!(params.heartbeat, Some(30));
        assert_eq!(params.queue.len(), 2);
        let cursor = params.cursor("A").unwrap();
        assert_eq!(cursor.seq, Some(-3));
        assert!(cursor.keep);
    }

    #[test]
    fn test_explicit_timeouts_win() {
        let config = SessionConfig::from_json_str(
            r#"{"url": "http://localhost/bus", "heartbeat_secs": 30,
                "timeout_secs": 90.5, "connect_timeout_secs": 2, "encoding": "json"}"#,
        )
        .unwrap();
        assert_eq!(config.encoding, Encoding::Json);
        assert_eq!(
            config.request_options().unwrap().timeout,
            Some(Duration::from_millis(90_500))
        );
        assert_eq!(config.connect_timeout().unwrap(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_invalid_documents_are_config_errors() {
        assert!(matches!(
            SessionConfig::from_json_str(r#"{"user": "alice"}"#),
            Err(SessionError::Config(_))
        ));

        let mut config = SessionConfig::new("http://localhost/bus");
        config.retry_wait_secs = -1.0;
        assert!(matches!(config.retry_wait(), Err(SessionError::Config(_))));
        assert!(config.into_session().is_err());
    }

    #[test]
    fn test_huge_heartbeat_is_config_error() {
        let mut config = SessionConfig::new("http://localhost/bus");
        config.heartbeat_secs = Some(u64::MAX);
        assert!(matches!(
            config.request_options(),
            Err(SessionError::Config(ref msg)) if msg.starts_with("heartbeat_secs")
        ));
        assert!(config.into_session().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = SessionConfig::new("http://localhost/bus");
        config.user = Some("alice".to_string());
        config.password = Some("s3cret".to_string());
        let debug = format!("{config:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_into_session_is_closed_and_configured() {
        let mut config = SessionConfig::new("http://localhost:9/bus");
        config.queues = vec!["SYSTEM_ALERT".to_string()];
        config.encoding = Encoding::Json;

        let session = config.into_session().unwrap();
        assert!(!session.is_open());
        assert_eq!(session.encoding(), Encoding::Json);
        assert_eq!(session.transport().base_url(), "http://localhost:9/bus");
        assert_eq!(
            session.param().cursor("SYSTEM_ALERT").unwrap().seq,
            Some(-11)
        );
    }

    #[tokio::test]
    async fn test_from_path() {
        let path = std::env::temp_dir().join(format!("hmb-config-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{"url": "http://localhost/bus", "queues": ["Q1"]}"#)
            .await
            .unwrap();

        let config = SessionConfig::from_path(&path).await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        assert_eq!(config.queues, ["Q1"]);

        assert!(matches!(
            SessionConfig::from_path(&path).await,
            Err(SessionError::Config(_))
        ));
    }
}
