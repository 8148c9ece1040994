//! Token estimation and the compression-trigger predicate.
//!
//! Uses character-based approximation (1 token ≈ 4 bytes). This is an
//! APPROXIMATION: actual counts vary 20%+ by model family, and the system
//! treats every number here as advisory. The hard requirement is O(1) work
//! per message: the per-message estimate is cached on [`Message`] and the
//! estimator maintains a running sum.

use crate::config::CompressionConfig;
use crate::types::{Message, MessageRole};

/// Estimate tokens for a content string: `max(1, len/4)`.
pub fn estimate_str(content: &str) -> usize {
    (content.len() / 4).max(1)
}

/// Running token estimate over the message list.
///
/// `DisplayOnlyData` messages never count; they are local UI artifacts and
/// are not sent to the model.
#[derive(Debug, Default)]
pub struct TokenEstimator {
    total: usize,
}

impl TokenEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current running sum.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Account for a newly appended message.
    pub fn add(&mut self, msg: &Message) {
        if msg.role != MessageRole::DisplayOnlyData {
            self.total += msg.estimated_tokens;
        }
    }

    /// Recompute the sum from scratch. Called after compression so the
    /// stored sum and the message list agree exactly.
    pub fn recompute(&mut self, messages: &[Message]) {
        self.total = messages
            .iter()
            .filter(|m| m.role != MessageRole::DisplayOnlyData)
            .map(|m| m.estimated_tokens)
            .sum();
    }

    /// Fraction of the context window in use. May exceed 1.0.
    pub fn usage_fraction(&self, max_context_tokens: usize) -> f32 {
        if max_context_tokens == 0 {
            return 0.0;
        }
        self.total as f32 / max_context_tokens as f32
    }

    /// Whether a compression pass should run before the next send.
    /// `max_context_tokens` is the provider's `num_ctx`.
    pub fn needs_compression(
        &self,
        config: &CompressionConfig,
        max_context_tokens: usize,
        message_count: usize,
    ) -> bool {
        config.enabled
            && message_count >= config.min_messages_before_compress
            && self.usage_fraction(max_context_tokens) >= config.trigger_threshold_pct
    }

    /// Token total compression should drive the history down to.
    pub fn target_tokens(config: &CompressionConfig, max_context_tokens: usize) -> usize {
        (max_context_tokens as f32 * config.target_usage_pct) as usize
    }
}
