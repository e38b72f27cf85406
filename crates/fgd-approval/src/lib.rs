use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fgd_core::model::{Approval, PendingEdit};
use thiserror::Error;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

const PENDING_EDIT_FILE: &str = ".fgd_pending_edit.json";
const APPROVAL_FILE: &str = ".fgd_approval.json";

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// File-mediated human-in-the-loop approval rendezvous at the watched
/// root: an `edit_file(confirm=false)` call stages a `PendingEdit`, a
/// human (or external tool) drops an `Approval` alongside it, and a
/// background poll loop (owned by the server, not this crate) consumes
/// it. The two files are matched by `filepath`, not a shared id, so this
/// protocol only ever tracks at most one pending edit at a time.
pub struct ApprovalProtocol {
    root: PathBuf,
}

impl ApprovalProtocol {
    pub fn new(root: PathBuf) -> ApprovalProtocol {
        ApprovalProtocol { root }
    }

    pub fn pending_edit_path(&self) -> PathBuf {
        self.root.join(PENDING_EDIT_FILE)
    }

    pub fn approval_path(&self) -> PathBuf {
        self.root.join(APPROVAL_FILE)
    }

    /// Persists `pending`, overwriting whatever was staged before — at
    /// most one pending edit exists at a time.
    pub fn stage(&self, pending: &PendingEdit) -> Result<(), ApprovalError> {
        let path = self.pending_edit_path();
        let bytes = serde_json::to_vec_pretty(pending).unwrap_or_default();
        fs::write(&path, bytes).map_err(|source| ApprovalError::Write { path, source })
    }

    /// The currently staged edit, if any. Malformed JSON is treated the
    /// same as a missing file: the stale file is removed and `None` is
    /// returned, rather than surfacing a parse error to the caller.
    pub fn read_pending(&self) -> Result<Option<PendingEdit>, ApprovalError> {
        let path = self.pending_edit_path();
        match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(pending) => Ok(Some(pending)),
                Err(err) => {
                    log::warn!("discarding unparseable {}: {err}", path.display());
                    let _ = fs::remove_file(&path);
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ApprovalError::Write { path, source }),
        }
    }

    /// Consumes a human decision if one has been dropped: the file is
    /// deleted regardless of whether it parsed, since a malformed or
    /// partial write is never retried, only discarded.
    pub fn take_approval(&self) -> Result<Option<Approval>, ApprovalError> {
        let path = self.approval_path();
        match fs::read_to_string(&path) {
            Ok(raw) => {
                let approval = serde_json::from_str(&raw).ok();
                if approval.is_none() {
                    log::warn!("discarding unparseable {}", path.display());
                }
                let _ = fs::remove_file(&path);
                Ok(approval)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ApprovalError::Write { path, source }),
        }
    }

    /// Clears the currently staged edit, whether it was applied,
    /// rejected, or found stale.
    pub fn clear_pending(&self) {
        let _ = fs::remove_file(self.pending_edit_path());
    }
}

/// Writes the decision a human or external tool makes, the other half of
/// the rendezvous the background approval loop polls for via
/// [`ApprovalProtocol::take_approval`].
pub fn record_decision(root: &Path, approval: &Approval) -> Result<(), ApprovalError> {
    let path = root.join(APPROVAL_FILE);
    let bytes = serde_json::to_vec_pretty(approval).unwrap_or_default();
    fs::write(&path, bytes).map_err(|source| ApprovalError::Write { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    fn pending(filepath: &str) -> PendingEdit {
        PendingEdit {
            filepath: filepath.to_string(),
            old_text: "old".to_string(),
            new_text: "new".to_string(),
            diff: "-old\n+new\n".to_string(),
            preview: "new".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn stage_writes_pending_edit_file() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        protocol.stage(&pending("a.txt")).unwrap();
        assert!(protocol.pending_edit_path().exists());
    }

    #[test]
    fn read_pending_returns_what_was_staged() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        protocol.stage(&pending("a.txt")).unwrap();
        let read = protocol.read_pending().unwrap().unwrap();
        assert_eq!(read.filepath, "a.txt");
    }

    #[test]
    fn read_pending_with_no_staged_edit_is_none() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        assert!(protocol.read_pending().unwrap().is_none());
    }

    #[test]
    fn read_pending_discards_malformed_json() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        fs::write(protocol.pending_edit_path(), b"{not json").unwrap();
        assert!(protocol.read_pending().unwrap().is_none());
        assert!(!protocol.pending_edit_path().exists());
    }

    #[test]
    fn take_approval_returns_and_deletes_a_valid_decision() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let protocol = ApprovalProtocol::new(root.clone());
        record_decision(
            &root,
            &Approval {
                approved: true,
                filepath: "a.txt".to_string(),
                old_text: None,
                new_text: None,
                reason: None,
                timestamp: Utc::now(),
            },
        )
        .unwrap();

        let approval = protocol.take_approval().unwrap().unwrap();
        assert!(approval.approved);
        assert!(!protocol.approval_path().exists());
    }

    #[test]
    fn take_approval_with_no_file_is_none() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        assert!(protocol.take_approval().unwrap().is_none());
    }

    #[test]
    fn take_approval_deletes_and_ignores_malformed_json() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        fs::write(protocol.approval_path(), b"{not json").unwrap();
        assert!(protocol.take_approval().unwrap().is_none());
        assert!(!protocol.approval_path().exists());
    }

    #[test]
    fn clear_pending_removes_the_staged_file() {
        let dir = tempdir().unwrap();
        let protocol = ApprovalProtocol::new(dir.path().to_path_buf());
        protocol.stage(&pending("a.txt")).unwrap();
        protocol.clear_pending();
        assert!(!protocol.pending_edit_path().exists());
    }
}
