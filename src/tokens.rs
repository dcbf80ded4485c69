//! Deterministic token estimation.
//!
//! All budget-bound services share this estimator so that eviction and
//! compression decisions are reproducible. It is a 4-chars-per-token
//! approximation, not a tokenizer, and makes no claim of provider accuracy.

use crate::session::SessionMessage;

/// Characters per estimated token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Fixed structural overhead charged per message.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 10;

#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate for a single message: text parts plus structural overhead.
#[must_use]
pub fn estimate_message_tokens(message: &SessionMessage) -> usize {
    estimate_tokens(&message.text_content()) + MESSAGE_OVERHEAD_TOKENS
}

/// Estimate across an entire conversation.
#[must_use]
pub fn estimate_conversation_tokens(messages: &[SessionMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
