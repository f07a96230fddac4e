//! HMB session orchestration.
//!
//! Provides:
//! - `HmbSession` - Session state machine with cursor tracking and reconnects
//! - `with_retry` - Bounded reopen-and-retry combinator
//! - `listen` loop with `MessageHandler` callbacks
//! - `SessionConfig` - Deserializable client configuration

pub mod config;
pub mod error;
pub mod info;
pub mod listen;
pub mod retry;
pub mod session;

pub use config::SessionConfig;
pub use error::SessionError;
pub use listen::{
    DisplayHandler, HandlerError, HandlerErrorPolicy, ListenExit, ListenOptions, MessageHandler,
};
pub use retry::{Reconnect, with_retry};
pub use session::{HmbSession, HmbSessionBuilder, ReceivedBatch};

pub use hmb_core::{Encoding, Message, MessageType, QueueCursor, SessionParameters};
pub use hmb_transport::{Credentials, HttpTransport, RequestOptions, ReqwestTransport};
