//! Chat history compression.
//!
//! Bounds prompt size by dropping or summarising the middle of a
//! conversation while preserving the pinned first message and the most
//! recent turns. All decisions use the shared deterministic token
//! estimator, so identical input always compresses identically.

use crate::clock::SharedClock;
use crate::session::{Role, SessionMessage};
use crate::tokens::{
    CHARS_PER_TOKEN, MESSAGE_OVERHEAD_TOKENS, estimate_conversation_tokens,
    estimate_message_tokens,
};
use serde::{Deserialize, Serialize};

/// Max bytes of a user turn quoted in the summary digest.
const DIGEST_LINE_BYTES: usize = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    Summarize,
    Truncate,
    Hybrid,
}

#[derive(Debug, Clone)]
pub struct CompressionOptions {
    pub strategy: CompressionStrategy,
    /// Tokens of recent history kept verbatim at the end.
    pub preserve_recent_tokens: usize,
    pub target_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct CompressionResult {
    pub compressed_messages: Vec<SessionMessage>,
    pub original_token_count: usize,
    pub compressed_token_count: usize,
    pub strategy: CompressionStrategy,
}

pub struct ChatCompressor {
    clock: SharedClock,
}

impl ChatCompressor {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self { clock }
    }

    /// Shrink `messages` until the estimate fits `target_tokens`,
    /// summarising the dropped span. Keeps the first and last messages.
    #[must_use]
    pub fn summarize(
        &self,
        messages: &[SessionMessage],
        target_tokens: usize,
    ) -> Vec<SessionMessage> {
        self.compress(
            messages,
            &CompressionOptions {
                strategy: CompressionStrategy::Hybrid,
                preserve_recent_tokens: target_tokens / 2,
                target_tokens,
            },
        )
        .compressed_messages
    }

    #[must_use]
    pub fn compress(
        &self,
        messages: &[SessionMessage],
        options: &CompressionOptions,
    ) -> CompressionResult {
        let original = estimate_conversation_tokens(messages);
        if original <= options.target_tokens || messages.len() < 2 {
            return CompressionResult {
                compressed_messages: messages.to_vec(),
                original_token_count: original,
                compressed_token_count: original,
                strategy: options.strategy,
            };
        }

        // The first message is pinned (the session's system prompt when
        // present) and the last message is always kept verbatim.
        let head = &messages[0];
        let rest = &messages[1..];
        let tail_start = tail_start_index(rest, options.preserve_recent_tokens);
        let middle = &rest[..tail_start];
        let tail = &rest[tail_start..];

        let summary = match options.strategy {
            CompressionStrategy::Truncate => None,
            CompressionStrategy::Summarize | CompressionStrategy::Hybrid => {
                self.summary_message(middle)
            }
        };

        let has_summary = summary.is_some();
        let mut compressed = Vec::with_capacity(1 + usize::from(has_summary) + tail.len());
        compressed.push(head.clone());
        compressed.extend(summary);
        compressed.extend_from_slice(tail);

        if options.strategy == CompressionStrategy::Hybrid {
            trim_to_target(&mut compressed, has_summary, options.target_tokens);
        }

        let compressed_tokens = estimate_conversation_tokens(&compressed);
        CompressionResult {
            compressed_messages: compressed,
            original_token_count: original,
            compressed_token_count: compressed_tokens,
            strategy: options.strategy,
        }
    }

    /// One synthetic assistant message standing in for the dropped span.
    /// Deterministic for identical input. Returns `None` when the span is
    /// empty or so small that the summary would estimate at least as large
    /// as what it replaces; the caller then drops the span outright.
    fn summary_message(&self, middle: &[SessionMessage]) -> Option<SessionMessage> {
        if middle.is_empty() {
            return None;
        }

        let mut lines = vec![format!(
            "Conversation summary: {} earlier messages condensed.",
            middle.len()
        )];
        for message in middle {
            if message.role != Role::User {
                continue;
            }
            let text = message.text_content();
            let digest = truncate_bytes(&text, DIGEST_LINE_BYTES);
            if !digest.is_empty() {
                lines.push(format!("- {digest}"));
            }
        }
        let mut text = lines.join("\n");

        let middle_tokens = estimate_conversation_tokens(middle);
        let max_bytes = middle_tokens.saturating_sub(MESSAGE_OVERHEAD_TOKENS) * CHARS_PER_TOKEN;
        if text.len() > max_bytes {
            text = truncate_bytes(&text, max_bytes).to_string();
        }
        // A summary that lost its marker or cannot beat the span's own
        // estimate is worthless
        if !text.contains("summary") {
            return None;
        }

        let message = SessionMessage::text(Role::Assistant, text, self.clock.now());
        if estimate_message_tokens(&message) >= middle_tokens {
            return None;
        }
        Some(message)
    }
}

/// Cut `text` down to at most `max_bytes`, backing up to the nearest char
/// boundary so multi-byte input is never split.
fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Index into `rest` where the preserved tail begins. The final message is
/// always part of the tail, even when it alone exceeds the budget.
fn tail_start_index(rest: &[SessionMessage], preserve_recent_tokens: usize) -> usize {
    let mut index = rest.len();
    let mut used = 0usize;
    while index > 0 {
        let tokens = estimate_message_tokens(&rest[index - 1]);
        if index < rest.len() && used + tokens > preserve_recent_tokens {
            break;
        }
        used += tokens;
        index -= 1;
    }
    index
}

/// Drop the oldest tail messages until the estimate fits, then the summary
/// itself. Never drops the pinned first message or the final message, so
/// the hard floor is `[first, last]`.
fn trim_to_target(messages: &mut Vec<SessionMessage>, has_summary: bool, target_tokens: usize) {
    let mut summary_len = usize::from(has_summary);
    while estimate_conversation_tokens(messages) > target_tokens {
        let first_tail = 1 + summary_len;
        if messages.len() > first_tail + 1 {
            messages.remove(first_tail);
        } else if summary_len == 1 && messages.len() > 2 {
            messages.remove(1);
            summary_len = 0;
        } else {
            break;
        }
    }
}
