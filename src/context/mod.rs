//! Ad-hoc context entries contributed by different producers.
//!
//! Hooks, extensions, the user, and the system can each register named blobs
//! of text. The manager keeps them in insertion order and renders a
//! deterministic system-prompt addition, highest priority first.

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContextSource {
    Hook,
    Extension,
    User,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextEntry {
    pub key: String,
    pub content: String,
    /// 0–100; higher renders earlier in the prompt addition.
    pub priority: u8,
    pub source: ContextSource,
    pub timestamp: DateTime<Utc>,
}

pub const DEFAULT_PRIORITY: u8 = 50;

pub struct ContextManager {
    entries: Vec<ContextEntry>,
    clock: SharedClock,
}

impl ContextManager {
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Vec::new(),
            clock,
        }
    }

    /// Insert or replace an entry with default priority and `user` source.
    pub fn add_context(&mut self, key: impl Into<String>, content: impl Into<String>) {
        self.add_context_with(key, content, i64::from(DEFAULT_PRIORITY), ContextSource::User);
    }

    /// Insert or replace an entry. Priority is clamped to [0, 100].
    /// Replacing an existing key keeps its insertion position.
    pub fn add_context_with(
        &mut self,
        key: impl Into<String>,
        content: impl Into<String>,
        priority: i64,
        source: ContextSource,
    ) {
        let entry = ContextEntry {
            key: key.into(),
            content: content.into(),
            priority: priority.clamp(0, 100) as u8,
            source,
            timestamp: self.clock.now(),
        };
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Remove an entry. No-op when absent.
    pub fn remove_context(&mut self, key: &str) {
        self.entries.retain(|e| e.key != key);
    }

    #[must_use]
    pub fn has_context(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    /// All entries in insertion order.
    #[must_use]
    pub fn get_context(&self) -> &[ContextEntry] {
        &self.entries
    }

    /// Entries from one producer, preserving insertion order.
    #[must_use]
    pub fn get_context_by_source(&self, source: ContextSource) -> Vec<&ContextEntry> {
        self.entries.iter().filter(|e| e.source == source).collect()
    }

    pub fn clear_context(&mut self) {
        self.entries.clear();
    }

    /// Render every entry as a prompt section, highest priority first.
    /// Ties keep insertion order. Empty store renders to an empty string.
    #[must_use]
    pub fn get_system_prompt_addition(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let mut ordered: Vec<&ContextEntry> = self.entries.iter().collect();
        // Stable sort: insertion order breaks priority ties
        ordered.sort_by_key(|e| Reverse(e.priority));

        let sections: Vec<String> = ordered
            .iter()
            .map(|e| format!("## Context: {}\n{}", e.key, e.content))
            .collect();

        format!("\n\n{}", sections.join("\n\n"))
    }
}
