use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use fgd_core::model::{ConversationEntry, ContextItem, Entry, MemoryDocument};
use fs2::FileExt;
use thiserror::Error;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Result shape of [`MemoryStore::recall`], one variant per argument mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecallOutcome {
    Value(Option<String>),
    Category(std::collections::HashMap<String, Entry>),
    All(std::collections::HashMap<String, std::collections::HashMap<String, Entry>>),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to read memory file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse memory file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write memory file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out after {seconds}s waiting for exclusive lock on {path}")]
    LockTimeout { path: PathBuf, seconds: u64 },
}

/// Persistent JSON-backed memory, guarded across processes by an advisory
/// exclusive lock on a sibling `.lock` file for the duration of each
/// mutation, as `fs2::FileExt` provides.
pub struct MemoryStore {
    path: PathBuf,
    lock_path: PathBuf,
    context_limit: usize,
    max_memory_entries: usize,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(path: PathBuf, context_limit: usize, max_memory_entries: usize) -> MemoryStore {
        let lock_path = {
            let mut p = path.clone();
            let name = p
                .file_name()
                .map(|n| format!("{}.lock", n.to_string_lossy()))
                .unwrap_or_else(|| "fgd_memory.lock".to_string());
            p.set_file_name(name);
            p
        };
        MemoryStore {
            path,
            lock_path,
            context_limit,
            max_memory_entries,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remember(&self, category: &str, key: &str, value: &str) -> Result<(), MemoryError> {
        self.with_locked_document(|doc| {
            let now = Utc::now();
            let bucket = doc.categories.entry(category.to_string()).or_default();
            match bucket.get_mut(key) {
                Some(entry) => {
                    entry.value = value.to_string();
                    entry.timestamp = now;
                }
                None => {
                    bucket.insert(key.to_string(), Entry::new(value, now));
                }
            }
        })
    }

    /// Three modes depending on which arguments are given: `(category, key)`
    /// recalls one value and bumps its `access_count`; `category` alone
    /// returns that whole bucket; neither returns every category.
    pub fn recall(
        &self,
        category: Option<&str>,
        key: Option<&str>,
    ) -> Result<RecallOutcome, MemoryError> {
        self.with_locked_document(|doc| match (category, key) {
            (Some(category), Some(key)) => {
                let value = doc.categories.get_mut(category).and_then(|bucket| {
                    bucket.get_mut(key).map(|entry| {
                        entry.access_count += 1;
                        entry.value.clone()
                    })
                });
                RecallOutcome::Value(value)
            }
            (Some(category), None) => RecallOutcome::Category(
                doc.categories.get(category).cloned().unwrap_or_default(),
            ),
            (None, _) => RecallOutcome::All(doc.categories.clone()),
        })
    }

    pub fn push_context(&self, kind: &str, summary: &str) -> Result<(), MemoryError> {
        let limit = self.context_limit;
        self.with_locked_document(|doc| {
            doc.context
                .push_back(ContextItem::new(kind, summary, Utc::now()));
            while doc.context.len() > limit {
                doc.context.pop_front();
            }
        })
    }

    pub fn recent_context(&self, n: usize) -> Result<Vec<ContextItem>, MemoryError> {
        self.with_locked_document(|doc| {
            doc.context
                .iter()
                .rev()
                .take(n)
                .cloned()
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect()
        })
    }

    pub fn record_conversation(
        &self,
        chat_id: &str,
        entry: ConversationEntry,
    ) -> Result<(), MemoryError> {
        self.with_locked_document(|doc| {
            doc.conversations.insert(chat_id.to_string(), entry);
        })
    }

    fn with_locked_document<F, R>(&self, f: F) -> Result<R, MemoryError>
    where
        F: FnOnce(&mut MemoryDocument) -> R,
    {
        let lock_file = self.acquire_lock()?;
        let mut doc = self.load()?;
        let result = f(&mut doc);
        prune(&mut doc, self.max_memory_entries);
        self.save(&doc)?;
        drop(lock_file);
        Ok(result)
    }

    fn acquire_lock(&self) -> Result<File, MemoryError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| MemoryError::Write {
                path: self.lock_path.clone(),
                source,
            })?;
        let deadline = Instant::now() + self.lock_timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => thread::sleep(LOCK_POLL_INTERVAL),
                Err(_) => {
                    return Err(MemoryError::LockTimeout {
                        path: self.path.clone(),
                        seconds: self.lock_timeout.as_secs(),
                    })
                }
            }
        }
    }

    fn load(&self) -> Result<MemoryDocument, MemoryError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| MemoryError::Parse {
                path: self.path.clone(),
                source,
            }),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                Ok(MemoryDocument::default())
            }
            Err(source) => Err(MemoryError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn save(&self, doc: &MemoryDocument) -> Result<(), MemoryError> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(|source| MemoryError::Parse {
            path: self.path.clone(),
            source,
        })?;
        atomic_write(&self.path, &bytes).map_err(|source| MemoryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// Writes `bytes` to a sibling temp file on the same filesystem, tightens
/// its permissions where supported, then atomically renames it over
/// `path`. Falls back to a direct overwrite (logging the failure) if the
/// rename itself fails, so a mutation never leaves `path` half-written.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = match path.file_name() {
        Some(name) => format!(".{}.tmp-{}", name.to_string_lossy(), std::process::id()),
        None => format!(".fgd-memory.tmp-{}", std::process::id()),
    };
    let tmp_path = dir.join(tmp_name);

    fs::write(&tmp_path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(&tmp_path) {
            let mut perms = metadata.permissions();
            perms.set_mode(0o600);
            let _ = fs::set_permissions(&tmp_path, perms);
        }
    }

    match fs::rename(&tmp_path, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            log::warn!(
                "atomic rename of {} to {} failed ({err}), falling back to direct overwrite",
                tmp_path.display(),
                path.display()
            );
            let result = fs::write(path, bytes);
            let _ = fs::remove_file(&tmp_path);
            result
        }
    }
}

/// Removes the lowest-`access_count` entries (oldest `timestamp` breaking
/// ties) until the document's total entry count is at or below `max`.
fn prune(doc: &mut MemoryDocument, max: usize) {
    let total = doc.total_entries();
    if total <= max {
        return;
    }
    let mut candidates: Vec<(String, String, u64, chrono::DateTime<Utc>)> = doc
        .categories
        .iter()
        .flat_map(|(category, bucket)| {
            bucket.iter().map(move |(key, entry)| {
                (
                    category.clone(),
                    key.clone(),
                    entry.access_count,
                    entry.timestamp,
                )
            })
        })
        .collect();
    candidates.sort_by(|a, b| a.2.cmp(&b.2).then(a.3.cmp(&b.3)));

    let mut remaining = total;
    for (category, key, _, _) in candidates {
        if remaining <= max {
            break;
        }
        if let Some(bucket) = doc.categories.get_mut(&category) {
            if bucket.remove(&key).is_some() {
                remaining -= 1;
            }
            if bucket.is_empty() {
                doc.categories.remove(&category);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> MemoryStore {
        MemoryStore::new(dir.join("mem.json"), 3, 5)
    }

    #[test]
    fn remember_then_recall_round_trips() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.remember("facts", "lang", "rust").unwrap();
        assert_eq!(
            store.recall(Some("facts"), Some("lang")).unwrap(),
            RecallOutcome::Value(Some("rust".to_string()))
        );
    }

    #[test]
    fn recall_of_missing_key_is_none() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        assert_eq!(
            store.recall(Some("facts"), Some("missing")).unwrap(),
            RecallOutcome::Value(None)
        );
    }

    #[test]
    fn recall_with_category_only_returns_the_whole_bucket() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.remember("facts", "lang", "rust").unwrap();
        store.remember("facts", "shell", "zsh").unwrap();
        match store.recall(Some("facts"), None).unwrap() {
            RecallOutcome::Category(bucket) => {
                assert_eq!(bucket.len(), 2);
                assert_eq!(bucket["lang"].value, "rust");
            }
            other => panic!("expected Category, got {other:?}"),
        }
    }

    #[test]
    fn recall_with_neither_argument_returns_all_categories() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.remember("facts", "lang", "rust").unwrap();
        store.remember("prefs", "editor", "vim").unwrap();
        match store.recall(None, None).unwrap() {
            RecallOutcome::All(all) => {
                assert_eq!(all.len(), 2);
                assert!(all.contains_key("facts"));
                assert!(all.contains_key("prefs"));
            }
            other => panic!("expected All, got {other:?}"),
        }
    }

    #[test]
    fn context_ring_is_bounded_to_configured_capacity() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        for i in 0..5 {
            store.push_context("note", &format!("item-{i}")).unwrap();
        }
        let recent = store.recent_context(10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent.last().unwrap().summary, "item-4");
    }

    #[test]
    fn pruning_evicts_least_recently_used_entries_first() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        for i in 0..5 {
            store.remember("facts", &format!("k{i}"), "v").unwrap();
        }
        // k0..k4 recalled zero times except k4, which should survive.
        store.recall(Some("facts"), Some("k4")).unwrap();
        store.remember("facts", "k5", "v").unwrap();
        assert!(matches!(
            store.recall(Some("facts"), Some("k4")).unwrap(),
            RecallOutcome::Value(Some(_))
        ));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file_behind_on_success() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store.remember("facts", "k", "v").unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn conversations_are_persisted_by_chat_id() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        store
            .record_conversation(
                "chat_abc",
                ConversationEntry {
                    id: "chat_abc".to_string(),
                    provider: "ollama".to_string(),
                    prompt: "hi".to_string(),
                    response: "hello".to_string(),
                    context_used: 0,
                    timestamp: Utc::now(),
                },
            )
            .unwrap();
        let raw = fs::read_to_string(dir.path().join("mem.json")).unwrap();
        assert!(raw.contains("chat_abc"));
    }
}
