//! Persistent long-term memory.
//!
//! A keyed store of remembered facts, preferences, and context, held in
//! memory and persisted as a JSON document. Saves are atomic
//! (temp file, fsync, rename) so the on-disk file is always a valid
//! snapshot. A token budget bounds how much of the store is injected into
//! the system prompt.

use crate::clock::SharedClock;
use crate::tokens::estimate_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

const FORMAT_VERSION: u32 = 1;
const PROMPT_HEADER: &str = "## Remembered Context\n";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Corrupt memory file: {0}")]
    Corrupt(String),

    #[error("Concurrent save lost the race")]
    WriteContention,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Fact,
    Preference,
    Context,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    User,
    Llm,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub category: MemoryCategory,
    pub source: MemorySource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub access_count: u64,
}

/// On-disk document shape.
#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    version: u32,
    entries: Vec<MemoryEntry>,
}

pub struct MemoryStore {
    path: PathBuf,
    token_budget: usize,
    entries: HashMap<String, MemoryEntry>,
    clock: SharedClock,
    save_lock: Mutex<()>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, token_budget: usize, clock: SharedClock) -> Self {
        Self {
            path: path.into(),
            token_budget,
            entries: HashMap::new(),
            clock,
            save_lock: Mutex::new(()),
        }
    }

    /// Read the store from disk. A missing or empty file is an empty store;
    /// unparsable content is corruption.
    pub async fn load(&mut self) -> Result<(), MemoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries.clear();
                return Ok(());
            }
            Err(e) => return Err(MemoryError::Io(e)),
        };

        if content.trim().is_empty() {
            self.entries.clear();
            return Ok(());
        }

        let file: MemoryFile =
            serde_json::from_str(&content).map_err(|e| MemoryError::Corrupt(e.to_string()))?;

        self.entries = file
            .entries
            .into_iter()
            .map(|entry| (entry.key.clone(), entry))
            .collect();
        Ok(())
    }

    /// Atomically persist the store: write a temporary sibling, fsync,
    /// rename. A save that arrives while another is in flight fails with
    /// [`MemoryError::WriteContention`] and leaves the file untouched.
    pub async fn save(&self) -> Result<(), MemoryError> {
        let _guard = self
            .save_lock
            .try_lock()
            .map_err(|_| MemoryError::WriteContention)?;

        let mut entries: Vec<MemoryEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        let file = MemoryFile {
            version: FORMAT_VERSION,
            entries,
        };
        let json = serde_json::to_vec_pretty(&file)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &json))
            .await
            .map_err(|e| MemoryError::Io(std::io::Error::other(e)))??;
        Ok(())
    }

    /// Store a fact from the user. See [`MemoryStore::remember_with`].
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.remember_with(key, value, MemoryCategory::Fact, MemorySource::User);
    }

    /// Insert or update an entry. Updating preserves `created_at` and
    /// `access_count`; only the value, category, source, and `updated_at`
    /// change.
    pub fn remember_with(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        category: MemoryCategory,
        source: MemorySource,
    ) {
        let key = key.into();
        let now = self.clock.now();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                entry.value = value.into();
                entry.category = category;
                entry.source = source;
                entry.updated_at = now;
            }
            None => {
                self.entries.insert(
                    key.clone(),
                    MemoryEntry {
                        key,
                        value: value.into(),
                        category,
                        source,
                        created_at: now,
                        updated_at: now,
                        access_count: 0,
                    },
                );
            }
        }
    }

    /// Look up an entry. A hit counts as an access: bumps `access_count`
    /// and `updated_at`.
    pub fn recall(&mut self, key: &str) -> Option<&MemoryEntry> {
        let now = self.clock.now();
        let entry = self.entries.get_mut(key)?;
        entry.access_count += 1;
        entry.updated_at = now;
        Some(entry)
    }

    /// Remove an entry. Returns whether it existed.
    pub fn forget(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Case-insensitive substring match against keys and values.
    /// Results are ordered by key for determinism.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&MemoryEntry> {
        let needle = query.to_lowercase();
        let mut matches: Vec<&MemoryEntry> = self
            .entries
            .values()
            .filter(|e| {
                e.key.to_lowercase().contains(&needle) || e.value.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| a.key.cmp(&b.key));
        matches
    }

    #[must_use]
    pub fn list_all(&self) -> Vec<&MemoryEntry> {
        let mut all: Vec<&MemoryEntry> = self.entries.values().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Greedy budgeted selection of entries for the system prompt.
    ///
    /// Entries are ranked most-used first (`access_count` desc, then
    /// `updated_at` desc, then `created_at` desc) and rendered as
    /// `key: value` lines under a fixed header until the estimated token
    /// count of the rendered output would pass the budget plus a 10%
    /// margin for the header.
    #[must_use]
    pub fn get_system_prompt_addition(&self) -> String {
        if self.entries.is_empty() {
            return String::new();
        }

        let mut ordered: Vec<&MemoryEntry> = self.entries.values().collect();
        ordered.sort_by(|a, b| {
            b.access_count
                .cmp(&a.access_count)
                .then_with(|| b.updated_at.cmp(&a.updated_at))
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        let limit = self.token_budget + self.token_budget / 10;
        let mut rendered = String::from(PROMPT_HEADER);
        let mut included = 0usize;

        for entry in ordered {
            let line = format!("{}: {}", entry.key, entry.value);
            let separator = usize::from(included > 0);
            let candidate_chars = rendered.len() + separator + line.len();
            if candidate_chars.div_ceil(crate::tokens::CHARS_PER_TOKEN) > limit {
                break;
            }
            if included > 0 {
                rendered.push('\n');
            }
            rendered.push_str(&line);
            included += 1;
        }

        if included == 0 {
            return String::new();
        }
        debug_assert!(estimate_tokens(&rendered) <= limit);
        rendered
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MemoryError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).map_or_else(
        || PathBuf::from("."),
        Path::to_path_buf,
    );
    std::fs::create_dir_all(&parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| MemoryError::Io(e.error))?;
    Ok(())
}
