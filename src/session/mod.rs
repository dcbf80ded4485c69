//! Conversation session data model.

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One piece of message content. Tagged so new part kinds can be added
/// without breaking persisted sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMessage {
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            parts: vec![MessagePart::Text { text: text.into() }],
            timestamp,
        }
    }

    /// Concatenated text of all text parts, in order.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                MessagePart::Text { text } => text.as_str(),
            })
            .collect()
    }
}

/// Outcome of a tool invocation as fed back to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub llm_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_display: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub name: String,
    pub args: serde_json::Map<String, serde_json::Value>,
    pub result: ToolCallResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub token_count: usize,
    pub compression_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub model: String,
    pub provider: String,
    pub messages: Vec<SessionMessage>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub metadata: SessionMetadata,
}

impl Session {
    /// Start a session with a pinned system prompt as the first message.
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        provider: impl Into<String>,
        system_prompt: impl Into<String>,
        clock: &SharedClock,
    ) -> Self {
        let now = clock.now();
        Self {
            session_id: Uuid::new_v4(),
            start_time: now,
            last_activity: now,
            model: model.into(),
            provider: provider.into(),
            messages: vec![SessionMessage::text(Role::System, system_prompt, now)],
            tool_calls: Vec::new(),
            metadata: SessionMetadata::default(),
        }
    }

    pub fn touch(&mut self, clock: &SharedClock) {
        self.last_activity = clock.now();
    }

    /// Record that history was compressed. The count only ever grows.
    pub fn record_compression(&mut self, new_token_count: usize) {
        self.metadata.token_count = new_token_count;
        self.metadata.compression_count += 1;
    }
}
