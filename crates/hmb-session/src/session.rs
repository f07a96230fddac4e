//! HMB session state machine.
//!
//! A session is created closed. Every public operation goes through
//! [`with_retry`], which opens it lazily and reopens it after a failure. The
//! [`SessionParameters`] are owned by the session and updated in place on
//! open and on every received batch, so a reopen resumes from the last
//! message seen.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hmb_core::{Encoding, Message, MessageType, OpenAck, QueueCursor, SessionParameters};
use hmb_transport::{Credentials, HttpTransport, RequestOptions, ReqwestTransport};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use crate::{
    SessionError,
    retry::{Reconnect, with_retry},
};

/// Subtracted from the `recv_all` budget to cover the first request.
const RECV_ALL_LATENCY_CORRECTION: Duration = Duration::from_millis(200);

/// Default wait between two attempts.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

/// Added to the heartbeat to get the default request timeout.
pub(crate) const HEARTBEAT_GRACE: Duration = Duration::from_secs(5);

/// Messages returned by one receive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceivedBatch {
    /// Messages in server order, without the trailing `EOF` marker.
    pub messages: Vec<Message>,
    /// The batch ended with `EOF`: the available backlog is consumed.
    pub end_of_backlog: bool,
}

/// Client session against one HMB bus.
pub struct HmbSession<T: HttpTransport = ReqwestTransport> {
    transport: T,
    param: SessionParameters,
    sid: Option<String>,
    oid: String,
    encoding: Encoding,
    retry_wait: Duration,
    autocreate_queues: bool,
    options: RequestOptions,
    span: Span,
}

/// Builder for [`HmbSession`].
pub struct HmbSessionBuilder<T: HttpTransport> {
    transport: T,
    param: SessionParameters,
    encoding: Encoding,
    retry_wait: Duration,
    autocreate_queues: bool,
    options: RequestOptions,
    span: Option<Span>,
}

impl HmbSession<ReqwestTransport> {
    /// Start building a session for the bus at `url`.
    ///
    /// # Errors
    /// Returns error if `url` is not an absolute URL.
    pub fn builder(url: &str) -> Result<HmbSessionBuilder<ReqwestTransport>, SessionError> {
        Ok(HmbSessionBuilder::new(ReqwestTransport::new(url)?))
    }
}

impl<T: HttpTransport> HmbSession<T> {
    /// Start building a session over an existing transport.
    #[must_use]
    pub fn with_transport(transport: T) -> HmbSessionBuilder<T> {
        HmbSessionBuilder::new(transport)
    }
}

impl<T: HttpTransport> HmbSessionBuilder<T> {
    fn new(transport: T) -> Self {
        Self {
            transport,
            param: SessionParameters::default(),
            encoding: Encoding::default(),
            retry_wait: DEFAULT_RETRY_WAIT,
            autocreate_queues: false,
            options: RequestOptions::default(),
            span: None,
        }
    }

    /// Replace the transport, keeping every other setting.
    #[must_use]
    pub fn transport<U: HttpTransport>(self, transport: U) -> HmbSessionBuilder<U> {
        HmbSessionBuilder {
            transport,
            param: self.param,
            encoding: self.encoding,
            retry_wait: self.retry_wait,
            autocreate_queues: self.autocreate_queues,
            options: self.options,
            span: self.span,
        }
    }

    #[must_use]
    pub fn param(mut self, param: SessionParameters) -> Self {
        self.param = param;
        self
    }

    #[must_use]
    pub const fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Wait between two attempts of a failed operation.
    #[must_use]
    pub const fn retry_wait(mut self, wait: Duration) -> Self {
        self.retry_wait = wait;
        self
    }

    /// Create queues reported as missing on open by sending a `TOUCH`.
    #[must_use]
    pub const fn autocreate_queues(mut self, enabled: bool) -> Self {
        self.autocreate_queues = enabled;
        self
    }

    /// Use HTTP basic authentication.
    #[must_use]
    pub fn authentication(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.transport
            .set_credentials(Some(Credentials::new(user, password)));
        self
    }

    /// Options applied to every request, e.g. the long-poll timeout.
    #[must_use]
    pub fn request_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Span every session operation is recorded under.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build a closed session.
    ///
    /// With a heartbeat and no request timeout, the timeout defaults to the
    /// heartbeat plus 5 s.
    #[must_use]
    pub fn build(self) -> HmbSession<T> {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("hmb_session", url = %self.transport.base_url()));

        let mut options = self.options;
        if let Some(heartbeat) = self.param.heartbeat {
            let interval = Duration::from_secs(heartbeat);
            match options.timeout {
                None => options.timeout = interval.checked_add(HEARTBEAT_GRACE),
                Some(timeout) if timeout <= interval => span.in_scope(|| {
                    warn!(
                        heartbeat,
                        timeout = ?timeout,
                        "Request timeout does not exceed the heartbeat interval"
                    );
                }),
                Some(_) => {}
            }
        }
        if options.timeout.is_none() && self.param.any_keep() {
            span.in_scope(|| warn!("Blocking receives have no request timeout"));
        }

        HmbSession {
            transport: self.transport,
            param: self.param,
            sid: None,
            oid: String::new(),
            encoding: self.encoding,
            retry_wait: self.retry_wait,
            autocreate_queues: self.autocreate_queues,
            options,
            span,
        }
    }
}

impl<T: HttpTransport> HmbSession<T> {
    /// Session id, when open.
    #[must_use]
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    /// Resumption token appended to receive paths.
    #[must_use]
    pub fn oid(&self) -> &str {
        &self.oid
    }

    /// Client id assigned by the server.
    #[must_use]
    pub fn cid(&self) -> Option<&str> {
        self.param.cid.as_deref()
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.sid.is_some()
    }

    /// Current parameters, including the cursors reached so far.
    #[must_use]
    pub const fn param(&self) -> &SessionParameters {
        &self.param
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    #[must_use]
    pub const fn request_options(&self) -> &RequestOptions {
        &self.options
    }

    pub(crate) const fn span(&self) -> &Span {
        &self.span
    }

    /// Replace the basic-auth credentials.
    pub fn authentication(&mut self, user: impl Into<String>, password: impl Into<String>) -> &mut Self {
        self.transport
            .set_credentials(Some(Credentials::new(user, password)));
        self
    }

    /// Replace the options applied to every request.
    pub fn set_request_options(&mut self, options: RequestOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Switch the document format. The format is negotiated on open, so
    /// an actual change closes the session.
    pub fn set_encoding(&mut self, encoding: Encoding) -> &mut Self {
        if self.encoding != encoding {
            self.encoding = encoding;
            self.mark_closed();
        }
        self
    }

    pub fn use_json(&mut self) -> &mut Self {
        self.set_encoding(Encoding::Json)
    }

    pub fn use_bson(&mut self) -> &mut Self {
        self.set_encoding(Encoding::Bson)
    }

    /// Forget the session id. The next operation reopens.
    pub fn mark_closed(&mut self) {
        self.sid = None;
    }

    /// Mark the session closed and release the HTTP connection.
    pub fn close(&mut self) {
        self.mark_closed();
        self.transport.close();
    }

    /// Open a session with the current parameters.
    ///
    /// # Errors
    /// Returns [`SessionError::NotOpen`] wrapping the cause if the request,
    /// the acknowledgment or a queue creation fails.
    pub async fn open(&mut self) -> Result<(), SessionError> {
        let span = self.span.clone();
        self.open_checked().instrument(span).await
    }

    async fn open_checked(&mut self) -> Result<(), SessionError> {
        match self.open_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_closed();
                error!(error = %e, "HMB connexion error");
                Err(SessionError::NotOpen(Box::new(e)))
            }
        }
    }

    async fn open_inner(&mut self) -> Result<(), SessionError> {
        let body = self.encoding.encode_document(&self.param)?;
        let resp = self
            .transport
            .post("/open", self.encoding.content_type(), body, &self.options)
            .await?
            .error_for_status()?;
        let ack: OpenAck = self.encoding.decode_document(&resp.body)?;

        self.sid = Some(ack.sid.clone());
        self.oid.clear();
        self.param.cid = Some(ack.cid.clone());

        for (queue, queue_ack) in &ack.queue {
            if let Some(reason) = &queue_ack.error {
                warn!(queue = %queue, error = %reason, "HMB server error for queue");
                if queue_ack.is_queue_not_found() && self.autocreate_queues {
                    let touch = self.encoding.encode_batch(&[Message::touch(queue.as_str())])?;
                    self.send_once(touch).await?;
                    self.param.reset_seq(queue, 1);
                    info!(queue = %queue, "Create HMB queue with TOUCH");
                }
            } else if let Some(seqnext) = queue_ack.seq {
                if self.param.resolve_seq(queue, seqnext) {
                    debug!(queue = %queue, seq = seqnext, "Cursor moved to server position");
                }
            }
        }

        info!(sid = %ack.sid, cid = %ack.cid, "New HMB session");
        debug!(params = ?self.param, "Session parameters");
        Ok(())
    }

    async fn send_once(&self, body: Bytes) -> Result<(), SessionError> {
        let sid = self.sid.as_deref().ok_or(SessionError::Closed)?;
        let path = format!("/send/{sid}");
        self.transport
            .post(&path, self.encoding.content_type(), body, &self.options)
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn recv_once(&mut self) -> Result<ReceivedBatch, SessionError> {
        let sid = self.sid.as_deref().ok_or(SessionError::Closed)?;
        let path = format!("/recv/{sid}{}", self.oid);
        let resp = self
            .transport
            .get(&path, &self.options)
            .await?
            .error_for_status()?;
        let mut messages = self.encoding.decode_batch(&resp.body)?;

        for msg in &messages {
            if let Some((queue, seq)) = msg.position() {
                self.param.advance_past(queue, seq);
                self.oid = format!("/{queue}/{seq}");
            }
        }

        let end_of_backlog = messages.last().is_some_and(Message::is_eof);
        if end_of_backlog {
            messages.pop();
        }
        debug!(count = messages.len(), end_of_backlog, oid = %self.oid, "Received batch");
        Ok(ReceivedBatch {
            messages,
            end_of_backlog,
        })
    }

    /// Send a batch of framed messages.
    ///
    /// # Errors
    /// Returns error if the batch cannot be encoded, or
    /// [`SessionError::MaxRetriesExceeded`] once every attempt failed.
    pub async fn send(&mut self, messages: &[Message], retries: u32) -> Result<(), SessionError> {
        let body = self.encoding.encode_batch(messages)?;
        let wait = self.retry_wait;
        let span = self.span.clone();
        with_retry(self, "send", retries, wait, |s| Box::pin(s.send_once(body.clone())))
            .instrument(span)
            .await
    }

    /// Send one message built from a payload.
    ///
    /// # Errors
    /// See [`send`](Self::send).
    pub async fn send_msg(
        &mut self,
        queue: &str,
        data: Value,
        kind: MessageType,
        topic: Option<&str>,
        retries: u32,
    ) -> Result<(), SessionError> {
        let mut msg = Message::new(kind, queue, data);
        if let Some(topic) = topic {
            msg = msg.with_topic(topic);
        }
        self.send(&[msg], retries).await
    }

    /// Receive one batch.
    ///
    /// Blocks until a message or a heartbeat is available when any queue is
    /// in keep mode. Heartbeats are dropped unless `keep_heartbeat` is set.
    ///
    /// # Errors
    /// Returns [`SessionError::MaxRetriesExceeded`] once every attempt failed.
    pub async fn recv_batch(
        &mut self,
        retries: u32,
        keep_heartbeat: bool,
    ) -> Result<ReceivedBatch, SessionError> {
        let wait = self.retry_wait;
        let span = self.span.clone();
        let mut batch = with_retry(self, "recv", retries, wait, |s| Box::pin(s.recv_once()))
            .instrument(span)
            .await?;
        if !keep_heartbeat {
            batch.messages.retain(|m| !m.is_heartbeat());
        }
        Ok(batch)
    }

    /// Receive one batch of messages.
    ///
    /// # Errors
    /// See [`recv_batch`](Self::recv_batch).
    pub async fn recv(
        &mut self,
        retries: u32,
        keep_heartbeat: bool,
    ) -> Result<Vec<Message>, SessionError> {
        Ok(self.recv_batch(retries, keep_heartbeat).await?.messages)
    }

    /// Drain the available backlog.
    ///
    /// Receives until a batch ends with `EOF` or `timeout` elapses. On
    /// timeout the session is marked closed and the messages gathered so far
    /// are returned. Meant for one-shot queries, not for queues in keep mode.
    ///
    /// # Errors
    /// See [`recv_batch`](Self::recv_batch).
    pub async fn recv_all(
        &mut self,
        retries: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>, SessionError> {
        let started = Instant::now();
        let budget = timeout.map(|t| t.saturating_sub(RECV_ALL_LATENCY_CORRECTION));
        let mut messages = Vec::new();
        loop {
            let batch = self.recv_batch(retries, false).await?;
            messages.extend(batch.messages);
            if batch.end_of_backlog {
                break;
            }
            if budget.is_some_and(|b| started.elapsed() >= b) {
                self.mark_closed();
                break;
            }
        }
        Ok(messages)
    }

    /// Fetch every stored message of `queue` matching `filter`.
    ///
    /// The queue set is replaced by `queue` alone, read from the start
    /// without keep mode, and the session is reopened.
    ///
    /// # Errors
    /// See [`recv_batch`](Self::recv_batch).
    pub async fn replay(
        &mut self,
        queue: &str,
        filter: Option<Value>,
        retries: u32,
        timeout: Option<Duration>,
    ) -> Result<Vec<Message>, SessionError> {
        let mut cursor = QueueCursor::new().seq(0).keep(false);
        if let Some(filter) = filter {
            cursor = cursor.filter(filter);
        }
        self.param.queue.clear();
        self.param.queue.insert(queue.to_string(), cursor);
        self.mark_closed();
        self.recv_all(retries, timeout).await
    }
}

#[async_trait]
impl<T: HttpTransport> Reconnect for HmbSession<T> {
    fn is_open(&self) -> bool {
        self.sid.is_some()
    }

    async fn open(&mut self) -> Result<(), SessionError> {
        self.open_checked().await
    }

    fn mark_closed(&mut self) {
        self.sid = None;
    }
}
