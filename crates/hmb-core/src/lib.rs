//! Wire model and codecs for the HMB session protocol.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `MessageType` - One bus event and its tag
//! - `SessionParameters` / `QueueCursor` - The document sent on session open
//! - `OpenAck` - The server's reply to an open
//! - `Encoding` and the codec functions for the text and binary formats

pub mod codec;
pub mod message;
pub mod params;

pub use codec::{CodecError, Encoding};
pub use message::{Message, MessageType, OpenAck, QueueAck};
pub use params::{QueueCursor, SessionParameters};
