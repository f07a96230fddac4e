//! Long-running listen loop.

use std::{fmt::Write as _, time::Duration};

use async_trait::async_trait;
use hmb_core::Message;
use hmb_transport::HttpTransport;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, warn};

use crate::{HmbSession, SessionError};

/// Error returned by a [`MessageHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Values longer than this are cut in [`format_message`].
const DISPLAY_WIDTH: usize = 70;

/// Callback invoked once per received message, in batch order.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, E> MessageHandler for F
where
    F: FnMut(Message) -> Result<(), E> + Send,
    E: Into<HandlerError> + 'static,
{
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError> {
        self(message).map_err(Into::into)
    }
}

/// Prints a readable summary of every message to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisplayHandler;

#[async_trait]
impl MessageHandler for DisplayHandler {
    async fn handle(&mut self, message: Message) -> Result<(), HandlerError> {
        println!("{}", format_message(&message)?);
        Ok(())
    }
}

/// Render a message one field per line, nested documents and lists
/// indented, every value cut to 70 characters.
///
/// # Errors
/// Returns error if the message cannot be represented as JSON.
pub fn format_message(message: &Message) -> Result<String, serde_json::Error> {
    let mut out = String::from(" * --> New message\n");
    let Value::Object(fields) = serde_json::to_value(message)? else {
        return Ok(out);
    };
    for (key, value) in &fields {
        match value {
            Value::Object(inner) => {
                let _ = writeln!(out, "{key:10} : {{}}");
                for (k, v) in inner {
                    let _ = writeln!(out, "{k:>20} : {}", truncated(v));
                }
            }
            Value::Array(items) => {
                let _ = writeln!(out, "{key:10} : []");
                for v in items {
                    let _ = writeln!(out, "{:10} {}", "", truncated(v));
                }
            }
            other => {
                let _ = writeln!(out, "{key:10} : {}", truncated(other));
            }
        }
    }
    Ok(out)
}

fn truncated(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(DISPLAY_WIDTH).collect()
}

/// What to do when a handler fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandlerErrorPolicy {
    /// Log the failure and go on with the next message.
    #[default]
    Continue,
    /// Log the failure and leave the loop.
    Stop,
}

/// Settings for [`HmbSession::listen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenOptions {
    /// Pause between two receives.
    pub delay: Option<Duration>,
    /// Retries per receive.
    pub retries: u32,
    /// Pass heartbeats to the handler.
    pub keep_heartbeat: bool,
    pub on_handler_error: HandlerErrorPolicy,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            delay: Some(Duration::from_millis(100)),
            retries: 1,
            keep_heartbeat: false,
            on_handler_error: HandlerErrorPolicy::Continue,
        }
    }
}

impl ListenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn delay(mut self, delay: Option<Duration>) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub const fn keep_heartbeat(mut self, keep: bool) -> Self {
        self.keep_heartbeat = keep;
        self
    }

    #[must_use]
    pub const fn on_handler_error(mut self, policy: HandlerErrorPolicy) -> Self {
        self.on_handler_error = policy;
        self
    }
}

/// Why [`HmbSession::listen`] returned.
#[derive(Debug)]
pub enum ListenExit {
    /// The cancellation token fired.
    Cancelled,
    /// A handler failed under [`HandlerErrorPolicy::Stop`].
    HandlerStopped(HandlerError),
    /// A receive failed after all retries.
    ReceiveFailed(SessionError),
}

impl<T: HttpTransport> HmbSession<T> {
    /// Receive forever, passing every message to `handler`.
    ///
    /// The loop ends when `cancel` fires (also while a receive is pending
    /// or during the pause), when a receive exhausts its retries, or when a
    /// handler fails under [`HandlerErrorPolicy::Stop`]. The session is
    /// closed on every exit. Cursors only move for batches that were fully
    /// received, so an interrupted receive is simply replayed by the next
    /// session.
    pub async fn listen<H>(
        &mut self,
        handler: &mut H,
        options: &ListenOptions,
        cancel: &CancellationToken,
    ) -> ListenExit
    where
        H: MessageHandler + ?Sized,
    {
        let span = self.span().clone();
        let exit = self
            .listen_loop(handler, options, cancel)
            .instrument(span)
            .await;
        self.close();
        exit
    }

    async fn listen_loop<H>(
        &mut self,
        handler: &mut H,
        options: &ListenOptions,
        cancel: &CancellationToken,
    ) -> ListenExit
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            let messages = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    warn!("Exit HMB Session Listener");
                    return ListenExit::Cancelled;
                }
                received = self.recv(options.retries, options.keep_heartbeat) => match received {
                    Ok(messages) => messages,
                    Err(e) => {
                        warn!(error = %e, "unexpected exit HMB");
                        return ListenExit::ReceiveFailed(e);
                    }
                },
            };

            for message in messages {
                let queue = message.queue.clone();
                let seq = message.seq;
                let kind = message.kind.clone();
                if let Err(e) = handler.handle(message).await {
                    error!(queue = ?queue, seq = ?seq, kind = %kind, error = %e, "Message handler failed");
                    if options.on_handler_error == HandlerErrorPolicy::Stop {
                        return ListenExit::HandlerStopped(e);
                    }
                }
            }

            if let Some(delay) = options.delay {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        warn!("Exit HMB Session Listener");
                        return ListenExit::Cancelled;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
