//! Content Accumulator
//!
//! Merges content deltas into two buffers: the committed text (everything the
//! session has produced so far, used for persistence and for capturing partial
//! text on failure) and the pending text (not yet painted). The render
//! scheduler is the only reader of the pending buffer.

/// Running text of one stream session
#[derive(Clone, Debug, Default)]
pub struct ContentAccumulator {
    /// Full response text so far
    committed: String,
    /// Text not yet handed to the view
    pending: String,
    /// Number of deltas applied
    delta_count: u32,
}

impl ContentAccumulator {
    /// Create an empty accumulator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta to both buffers
    ///
    /// Empty deltas are ignored and do not count.
    pub fn apply(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        self.committed.push_str(delta);
        self.pending.push_str(delta);
        self.delta_count += 1;
    }

    /// Everything accumulated so far
    #[must_use]
    pub fn committed(&self) -> &str {
        &self.committed
    }

    /// Swap the pending buffer out, leaving it empty
    pub fn take_pending(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    /// Whether there is unpainted text
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Length of the committed text in bytes
    #[must_use]
    pub fn committed_len(&self) -> usize {
        self.committed.len()
    }

    /// Number of deltas applied so far
    #[must_use]
    pub fn delta_count(&self) -> u32 {
        self.delta_count
    }
}
