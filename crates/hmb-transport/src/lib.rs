//! HTTP transport for HMB sessions.
//!
//! Provides:
//! - `HttpTransport` - The POST/GET seam the session is written against
//! - `ReqwestTransport` - Pooled `reqwest` client with basic auth
//! - `MockTransport` - Scripted transport for tests (feature: mock, always built for unit tests)

pub mod http;
pub mod reqwest_client;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use http::{Credentials, HttpResponse, HttpTransport, RequestOptions, TransportError};
pub use reqwest_client::ReqwestTransport;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockTransport, RecordedRequest};
