//! Bounded reopen-and-retry combinator.
//!
//! The bus resumes from the last acknowledged sequence number on reopen, so
//! any failed request can be retried by closing, reopening and repeating.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::error;

use crate::SessionError;

/// Something that can be lazily (re)opened before an attempt.
#[async_trait]
pub trait Reconnect: Send {
    /// Whether a session is currently established.
    fn is_open(&self) -> bool;

    /// Establish a session.
    async fn open(&mut self) -> Result<(), SessionError>;

    /// Forget the current session so the next attempt reopens.
    fn mark_closed(&mut self);
}

/// Run `action` up to `retries + 1` times.
///
/// Before each attempt the connection is opened if it is not. After a
/// failure the connection is marked closed and, unless that was the last
/// attempt, the task sleeps for `wait`. Exhaustion yields
/// [`SessionError::MaxRetriesExceeded`] carrying the last failure.
///
/// # Errors
/// Returns [`SessionError::MaxRetriesExceeded`] once every attempt failed.
pub async fn with_retry<C, T, F>(
    conn: &mut C,
    name: &str,
    retries: u32,
    wait: Duration,
    mut action: F,
) -> Result<T, SessionError>
where
    C: Reconnect + ?Sized,
    F: for<'c> FnMut(&'c mut C) -> BoxFuture<'c, Result<T, SessionError>> + Send,
{
    let mut attempt: u32 = 0;
    loop {
        let outcome = if conn.is_open() {
            Ok(())
        } else {
            conn.open().await
        };
        let outcome = match outcome {
            Ok(()) => action(&mut *conn).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                conn.mark_closed();
                error!(error = %e, "Exception with {name}");
                error!("HMB retry {name} (retries {attempt}/{retries})");
                attempt += 1;
                if attempt > retries {
                    error!("Max retry: HMB connexion lost");
                    return Err(SessionError::MaxRetriesExceeded {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                tokio::time::sleep(wait).await;
            }
        }
    }
}
