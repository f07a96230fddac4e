//! Session parameters sent on open.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document posted to `/open`.
///
/// Owned by the session and mutated in place as cursors advance, so a
/// reopen resumes where the previous session stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    /// Client id. Assigned by the server on first open and sent back on
    /// every reopen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,

    /// Heartbeat interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<u64>,

    /// Maximum number of messages per receive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recv_limit: Option<i64>,

    /// Cursor per queue.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub queue: BTreeMap<String, QueueCursor>,
}

impl SessionParameters {
    /// Create empty parameters (a send-only session).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat(mut self, secs: u64) -> Self {
        self.heartbeat = Some(secs);
        self
    }

    /// Add or replace a queue cursor.
    #[must_use]
    pub fn with_queue(mut self, name: impl Into<String>, cursor: QueueCursor) -> Self {
        self.queue.insert(name.into(), cursor);
        self
    }

    /// Whether any queue requests blocking receives.
    #[must_use]
    pub fn any_keep(&self) -> bool {
        self.queue.values().any(|q| q.keep)
    }

    /// Cursor for `queue`.
    #[must_use]
    pub fn cursor(&self, queue: &str) -> Option<&QueueCursor> {
        self.queue.get(queue)
    }

    /// Apply the next sequence number reported on open.
    ///
    /// The stored value only moves forward: it is replaced when absent or
    /// smaller than `seqnext`. Returns whether the cursor changed. Unknown
    /// queues are ignored.
    pub fn resolve_seq(&mut self, queue: &str, seqnext: i64) -> bool {
        let Some(cursor) = self.queue.get_mut(queue) else {
            return false;
        };
        if seqnext > cursor.seq.unwrap_or(0) || cursor.seq.is_none() {
            cursor.seq = Some(seqnext);
            return true;
        }
        false
    }

    /// Record that message `seq` of `queue` was received.
    ///
    /// The cursor becomes `seq + 1` when `seq` is at least the stored value.
    /// Returns whether the cursor changed. Unknown queues are ignored.
    pub fn advance_past(&mut self, queue: &str, seq: i64) -> bool {
        let Some(cursor) = self.queue.get_mut(queue) else {
            return false;
        };
        match cursor.seq {
            Some(current) if seq < current => false,
            _ => {
                cursor.seq = Some(seq.saturating_add(1));
                true
            }
        }
    }

    /// Reset the cursor of `queue` to `seq`, regardless of its current value.
    ///
    /// Only used after creating a missing queue, when no earlier position
    /// can exist.
    pub fn reset_seq(&mut self, queue: &str, seq: i64) {
        if let Some(cursor) = self.queue.get_mut(queue) {
            cursor.seq = Some(seq);
        }
    }
}

/// Read position and selection options for one queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueCursor {
    /// Topics to select; all topics when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,

    /// Next sequence number. A negative value `-n` starts `n - 1` messages
    /// before the current tail until the server resolves it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endseq: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starttime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<String>,

    /// Server-side filter document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qlen: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oowait: Option<i64>,

    /// Block receives until a new message or heartbeat is available.
    #[serde(default)]
    pub keep: bool,
}

impl QueueCursor {
    /// Cursor with no position; the server decides where to start.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor starting `nlast` messages before the tail, in keep mode.
    #[must_use]
    pub fn backlog(nlast: u32) -> Self {
        Self {
            seq: Some(-i64::from(nlast) - 1),
            keep: true,
            ..Self::default()
        }
    }

    /// Set the starting sequence number.
    #[must_use]
    pub const fn seq(mut self, seq: i64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Set keep mode.
    #[must_use]
    pub const fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Set the filter document.
    #[must_use]
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Restrict to the given topics.
    #[must_use]
    pub fn topics<I>(mut self, topics: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.topics = Some(topics.into_iter().map(Into::into).collect());
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_resolve_only_moves_forward() {
        let mut params = SessionParameters::new().with_queue("Q1", QueueCursor::new().seq(-3));

        assert!(params.resolve_seq("Q1", 97));
        assert_eq!(params.cursor("Q1").unwrap().seq, Some(97));

        assert!(!params.resolve_seq("Q1", 50));
        assert_eq!(params.cursor("Q1").unwrap().seq, Some(97));

        assert!(!params.resolve_seq("missing", 10));
    }

    #[test]
    fn test_resolve_fills_absent_seq() {
        let mut params = SessionParameters::new().with_queue("Q", QueueCursor::new());
        assert!(params.resolve_seq("Q", -5));
        assert_eq!(params.cursor("Q").unwrap().seq, Some(-5));
    }

    #[test]
    fn test_advance_past() {
        let mut params = SessionParameters::new().with_queue("Q", QueueCursor::new().seq(10));

        assert!(!params.advance_past("Q", 9));
        assert_eq!(params.cursor("Q").unwrap().seq, Some(10));

        assert!(params.advance_past("Q", 10));
        assert_eq!(params.cursor("Q").unwrap().seq, Some(11));

        assert!(params.advance_past("Q", 42));
        assert_eq!(params.cursor("Q").unwrap().seq, Some(43));
    }

    #[test]
    fn test_backlog_cursor() {
        let cursor = QueueCursor::backlog(10);
        assert_eq!(cursor.seq, Some(-11));
        assert!(cursor.keep);
    }

    #[test]
    fn test_serialization_skips_unset() {
        let params = SessionParameters::new()
            .with_heartbeat(15)
            .with_queue("Q1", QueueCursor::new().seq(-3).topics(["a"]));
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"heartbeat": 15, "queue": {"Q1": {"topics": ["a"], "seq": -3, "keep": false}}})
        );
        assert_eq!(serde_json::to_value(SessionParameters::new()).unwrap(), json!({}));
    }
}
