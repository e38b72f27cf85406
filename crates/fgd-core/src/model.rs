use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single categorized key/value fact the router or a tool has asked to
/// remember, tracked with recency/frequency metadata for LRU pruning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
}

impl Entry {
    pub fn new(value: impl Into<String>, now: DateTime<Utc>) -> Self {
        Entry {
            value: value.into(),
            timestamp: now,
            access_count: 0,
        }
    }
}

/// One observation appended to the bounded context ring: a file read, a
/// file change, or a tool invocation worth recalling in the next prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContextItem {
    pub kind: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextItem {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>, now: DateTime<Utc>) -> Self {
        ContextItem {
            kind: kind.into(),
            summary: summary.into(),
            timestamp: now,
        }
    }
}

/// A completed `llm_query` round-trip, persisted under
/// `memories.conversations.chat_<uuid>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationEntry {
    pub id: String,
    pub provider: String,
    pub prompt: String,
    pub response: String,
    pub context_used: usize,
    pub timestamp: DateTime<Utc>,
}

/// The whole persisted memory file: categorized entries, a bounded context
/// ring, and the conversation log, all written out atomically together.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct MemoryDocument {
    #[serde(default)]
    pub categories: HashMap<String, HashMap<String, Entry>>,
    #[serde(default)]
    pub context: VecDeque<ContextItem>,
    #[serde(default)]
    pub conversations: HashMap<String, ConversationEntry>,
}

impl MemoryDocument {
    pub fn total_entries(&self) -> usize {
        self.categories.values().map(|m| m.len()).sum()
    }
}

/// A staged edit waiting for human sign-off, mirrored at
/// `.fgd_pending_edit.json`. At most one exists at a time; a new
/// `edit_file(confirm=false)` call overwrites whatever was pending before.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingEdit {
    pub filepath: String,
    pub old_text: String,
    pub new_text: String,
    pub diff: String,
    pub preview: String,
    pub timestamp: DateTime<Utc>,
}

/// The human's verdict on a `PendingEdit`, mirrored at
/// `.fgd_approval.json`. Matched against the currently staged `PendingEdit`
/// by `filepath`, not by a shared id — the two files never carry one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Approval {
    pub approved: bool,
    pub filepath: String,
    #[serde(default)]
    pub old_text: Option<String>,
    #[serde(default)]
    pub new_text: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}
