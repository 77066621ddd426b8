//! Conversation Transcript
//!
//! The persistence collaborator seen by the session controller. The
//! controller only ever hands it finished [`ChatRecord`]s on terminal
//! transitions; it never edits or reads back a record mid-stream.
//!
//! [`Transcript`] is the in-memory implementation used by the CLI and tests.
//! It optionally bounds history by message count and content bytes, pruning
//! oldest records first, and doubles as a [`TokenMeter`] by estimating tokens
//! over the stored content.

use parking_lot::Mutex;
use thiserror::Error;

use crate::budget::{estimate_tokens, TokenMeter, TokenSnapshot};
use crate::messages::{ChatRecord, MessageRole};

/// Errors reported by a message store
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not accept the record
    #[error("Message store unavailable: {0}")]
    Unavailable(String),
}

/// Destination for committed conversation records
pub trait MessageStore: Send + Sync {
    /// Persist one record
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the record could not be stored.
    fn commit(&self, record: ChatRecord) -> Result<(), StoreError>;

    /// Number of records currently held
    fn len(&self) -> usize;

    /// Whether no records are held
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct TranscriptInner {
    records: Vec<ChatRecord>,
    content_bytes: usize,
}

/// In-memory transcript
#[derive(Debug, Default)]
pub struct Transcript {
    inner: Mutex<TranscriptInner>,
    /// Maximum number of records to keep (0 = unlimited)
    max_messages: usize,
    /// Maximum total content bytes (0 = unlimited)
    max_content_bytes: usize,
    /// Context window reported with token snapshots (0 = unknown)
    context_limit: u32,
}

impl Transcript {
    /// Create an unbounded transcript
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transcript that prunes beyond the given limits (0 = unlimited)
    #[must_use]
    pub fn with_limits(max_messages: usize, max_content_bytes: usize) -> Self {
        Self {
            max_messages,
            max_content_bytes,
            ..Self::default()
        }
    }

    /// Report `limit` as the context window in token snapshots
    #[must_use]
    pub fn with_context_limit(mut self, limit: u32) -> Self {
        self.context_limit = limit;
        self
    }

    /// Copy of all records, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<ChatRecord> {
        self.inner.lock().records.clone()
    }

    /// The most recent record
    #[must_use]
    pub fn last(&self) -> Option<ChatRecord> {
        self.inner.lock().records.last().cloned()
    }

    /// Number of records with the given role
    #[must_use]
    pub fn count_role(&self, role: MessageRole) -> usize {
        self.inner
            .lock()
            .records
            .iter()
            .filter(|r| r.role == role)
            .count()
    }

    /// Total content size in bytes
    #[must_use]
    pub fn content_bytes(&self) -> usize {
        self.inner.lock().content_bytes
    }

    /// Drop all records
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.content_bytes = 0;
    }

    /// Prune oldest records until within limits
    fn prune_if_needed(&self, inner: &mut TranscriptInner) {
        if self.max_messages == 0 && self.max_content_bytes == 0 {
            return;
        }

        let mut removed = 0;
        while !inner.records.is_empty() {
            let over_count = self.max_messages > 0 && inner.records.len() > self.max_messages;
            let over_bytes =
                self.max_content_bytes > 0 && inner.content_bytes > self.max_content_bytes;
            // Never prune the record that was just committed.
            if !(over_count || over_bytes) || inner.records.len() == 1 {
                break;
            }
            let oldest = inner.records.remove(0);
            inner.content_bytes = inner.content_bytes.saturating_sub(oldest.content.len());
            removed += 1;
        }

        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = inner.records.len(),
                bytes = inner.content_bytes,
                "Pruned transcript"
            );
        }
    }
}

impl MessageStore for Transcript {
    fn commit(&self, record: ChatRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.content_bytes += record.content.len();
        inner.records.push(record);
        self.prune_if_needed(&mut inner);
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.lock().records.len()
    }
}

impl TokenMeter for Transcript {
    fn snapshot(&self, message_count: usize) -> TokenSnapshot {
        let inner = self.inner.lock();
        let start = inner.records.len().saturating_sub(message_count);
        let estimated_tokens = inner.records[start..]
            .iter()
            .map(|r| r.token_count.unwrap_or_else(|| estimate_tokens(&r.content)))
            .fold(0u32, u32::saturating_add);

        TokenSnapshot {
            estimated_tokens,
            limit: self.context_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assistant(content: &str) -> ChatRecord {
        ChatRecord::new(MessageRole::Assistant, content)
    }

    #[test]
    fn test_commit_and_read_back() {
        let transcript = Transcript::new();
        transcript.commit(ChatRecord::user("hi")).unwrap();
        transcript.commit(assistant("hello")).unwrap();

        assert_eq!(transcript.len(), 2);
        assert!(!transcript.is_empty());
        assert_eq!(transcript.count_role(MessageRole::Assistant), 1);
        assert_eq!(transcript.last().unwrap().content, "hello");
        assert_eq!(transcript.content_bytes(), 7);
    }

    #[test]
    fn test_prune_by_count() {
        let transcript = Transcript::with_limits(2, 0);
        for text in ["a", "b", "c"] {
            transcript.commit(ChatRecord::user(text)).unwrap();
        }

        let contents: Vec<_> = transcript.records().into_iter().map(|r| r.content).collect();
        assert_eq!(contents, vec!["b", "c"]);
        assert_eq!(transcript.content_bytes(), 2);
    }

    #[test]
    fn test_prune_by_bytes_keeps_latest() {
        let transcript = Transcript::with_limits(0, 10);
        transcript.commit(ChatRecord::user("12345")).unwrap();
        transcript.commit(ChatRecord::user("67890")).unwrap();
        assert_eq!(transcript.len(), 2);

        transcript.commit(assistant("this one is long")).unwrap();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.last().unwrap().content, "this one is long");
    }

    #[test]
    fn test_token_snapshot_uses_recorded_counts() {
        let transcript = Transcript::new().with_context_limit(4096);
        transcript.commit(ChatRecord::user("abcdefgh")).unwrap();
        transcript
            .commit(assistant("ignored text").with_token_count(10))
            .unwrap();

        let all = transcript.snapshot(2);
        assert_eq!(all.estimated_tokens, 12);
        assert_eq!(all.limit, 4096);

        let last_only = transcript.snapshot(1);
        assert_eq!(last_only.estimated_tokens, 10);

        assert_eq!(transcript.snapshot(100).estimated_tokens, 12);
    }

    #[test]
    fn test_clear() {
        let transcript = Transcript::new();
        transcript.commit(ChatRecord::user("x")).unwrap();
        transcript.clear();
        assert!(transcript.is_empty());
        assert_eq!(transcript.snapshot(5).estimated_tokens, 0);
    }
}
