//! Context Budget
//!
//! Tracks how much of the model's context window the conversation is using and
//! owns the one-shot "summarize on next send" flag.
//!
//! The estimate itself comes from a [`TokenMeter`] collaborator; the budget
//! only compares it against the near-limit threshold. Crossing the threshold
//! yields a single [`BudgetNotice`]; the notice re-arms once usage drops back
//! below the threshold (for example after a summarized reply replaced history).

use serde::{Deserialize, Serialize};

/// Estimate token count from text length
///
/// About four characters per token, rounded up. Good enough for a
/// "getting close" warning; never used for hard truncation.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}

/// Point-in-time token usage reported by a meter
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSnapshot {
    /// Estimated tokens used by the conversation
    pub estimated_tokens: u32,
    /// Context window size (0 = meter does not know)
    pub limit: u32,
}

/// Read-only source of token usage
pub trait TokenMeter: Send + Sync {
    /// Usage for a conversation of `message_count` messages
    fn snapshot(&self, message_count: usize) -> TokenSnapshot;
}

/// Emitted once when usage crosses the near-limit threshold
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BudgetNotice {
    /// Estimated tokens at the crossing
    pub estimated_tokens: u32,
    /// Context window size
    pub limit: u32,
}

/// Near-limit tracking and the one-shot summarization flag
#[derive(Clone, Debug)]
pub struct ConversationBudget {
    /// Context window in tokens
    limit: u32,
    /// Fraction of the window that counts as near the limit
    near_fraction: f32,
    /// Last observed estimate
    estimated_tokens: u32,
    /// A notice was emitted and usage has not dropped since
    near_limit_notified: bool,
    /// The user accepted summarization for the next send
    summarize_requested: bool,
}

impl ConversationBudget {
    /// Create a budget for a context window
    #[must_use]
    pub fn new(limit: u32, near_fraction: f32) -> Self {
        Self {
            limit: limit.max(1),
            near_fraction: near_fraction.clamp(f32::EPSILON, 1.0),
            estimated_tokens: 0,
            near_limit_notified: false,
            summarize_requested: false,
        }
    }

    /// Context window in tokens
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Token count at which usage is near the limit
    #[must_use]
    pub fn threshold(&self) -> u32 {
        // Basis points keep 0.8 * 1000 at exactly 800.
        let basis_points = (self.near_fraction * 10_000.0).round() as u64;
        let threshold = (u64::from(self.limit) * basis_points).div_ceil(10_000);
        u32::try_from(threshold).unwrap_or(self.limit)
    }

    /// Whether the last observation was at or above the threshold
    #[must_use]
    pub fn is_near_limit(&self) -> bool {
        self.estimated_tokens >= self.threshold()
    }

    /// Record a snapshot; returns a notice on an upward threshold crossing
    pub fn observe(&mut self, snapshot: TokenSnapshot) -> Option<BudgetNotice> {
        if snapshot.limit > 0 {
            self.limit = snapshot.limit;
        }
        self.estimated_tokens = snapshot.estimated_tokens;

        if !self.is_near_limit() {
            self.near_limit_notified = false;
            return None;
        }
        if self.near_limit_notified {
            return None;
        }

        self.near_limit_notified = true;
        tracing::info!(
            estimated_tokens = self.estimated_tokens,
            limit = self.limit,
            "Conversation is near the context limit"
        );
        Some(BudgetNotice {
            estimated_tokens: self.estimated_tokens,
            limit: self.limit,
        })
    }

    /// Arm summarization for the next send
    pub fn request_summarization(&mut self) {
        self.summarize_requested = true;
    }

    /// Disarm a pending summarization request
    pub fn clear_summarization(&mut self) {
        self.summarize_requested = false;
    }

    /// Whether the next send will carry the directive
    #[must_use]
    pub fn is_summarization_requested(&self) -> bool {
        self.summarize_requested
    }

    /// Consume the request; true at most once per acceptance
    pub fn take_summarization(&mut self) -> bool {
        std::mem::replace(&mut self.summarize_requested, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(estimated_tokens: u32) -> TokenSnapshot {
        TokenSnapshot {
            estimated_tokens,
            limit: 0,
        }
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        // Characters, not bytes.
        assert_eq!(estimate_tokens("🦀🦀🦀🦀"), 1);
    }

    #[test]
    fn test_threshold() {
        let budget = ConversationBudget::new(1000, 0.8);
        assert_eq!(budget.threshold(), 800);
        let budget = ConversationBudget::new(10, 0.75);
        assert_eq!(budget.threshold(), 8);
    }

    #[test]
    fn test_notice_only_on_crossing() {
        let mut budget = ConversationBudget::new(100, 0.8);

        assert!(budget.observe(snapshot(50)).is_none());
        let notice = budget.observe(snapshot(85)).unwrap();
        assert_eq!(notice.estimated_tokens, 85);
        assert_eq!(notice.limit, 100);
        assert!(budget.is_near_limit());

        // Still above: no repeat.
        assert!(budget.observe(snapshot(90)).is_none());

        // Dropping below re-arms.
        assert!(budget.observe(snapshot(20)).is_none());
        assert!(budget.observe(snapshot(80)).is_some());
    }

    #[test]
    fn test_meter_limit_overrides_configured_limit() {
        let mut budget = ConversationBudget::new(100, 0.5);
        let notice = budget.observe(TokenSnapshot {
            estimated_tokens: 60,
            limit: 1000,
        });
        assert!(notice.is_none());
        assert_eq!(budget.limit(), 1000);
    }

    #[test]
    fn test_summarization_flag_is_one_shot() {
        let mut budget = ConversationBudget::new(100, 0.8);
        assert!(!budget.take_summarization());

        budget.request_summarization();
        budget.request_summarization();
        assert!(budget.is_summarization_requested());
        assert!(budget.take_summarization());
        assert!(!budget.take_summarization());
        assert!(!budget.is_summarization_requested());
    }

    #[test]
    fn test_clear_summarization() {
        let mut budget = ConversationBudget::new(100, 0.8);
        budget.request_summarization();
        budget.clear_summarization();
        assert!(!budget.take_summarization());
    }
}
