//! Session error type.

use hmb_core::CodecError;
use hmb_transport::TransportError;
use thiserror::Error;

/// Session error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Hmb Session not open: {0}")]
    NotOpen(#[source] Box<SessionError>),
    #[error("Hmb Session is closed")]
    Closed,
    #[error("Exit Hmb Session. Max retry reached! ({attempts} attempts, last error: {last})")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last: Box<SessionError>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Whether this is the terminal retry-exhaustion error.
    #[must_use]
    pub const fn is_max_retries(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }
}
