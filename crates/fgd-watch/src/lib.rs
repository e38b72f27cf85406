use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fgd_ignore::GitignoreFilter;

const MAX_WALK_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChangeEvent {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileSnapshot {
    modified: SystemTime,
    size: u64,
}

/// Polling-based file-change observer: no OS-level notification API, just
/// a periodic directory walk diffed against the previous snapshot. A
/// failed walk is logged and treated as "no changes this round", never as
/// a fatal error — the observer degrades, it does not crash the server.
pub struct ChangeObserver {
    root: PathBuf,
    ignore: GitignoreFilter,
    max_files: usize,
    snapshots: HashMap<PathBuf, FileSnapshot>,
}

impl ChangeObserver {
    pub fn new(root: PathBuf, ignore: GitignoreFilter, max_files: usize) -> ChangeObserver {
        ChangeObserver {
            root,
            ignore,
            max_files,
            snapshots: HashMap::new(),
        }
    }

    /// Populates the baseline snapshot without emitting any events, so the
    /// first `poll()` call only reports changes since startup.
    pub fn initial_scan(&mut self) {
        self.snapshots = self.walk();
    }

    pub fn poll(&mut self) -> Vec<FileChangeEvent> {
        let current = self.walk();
        let mut events = Vec::new();

        for (path, snapshot) in &current {
            match self.snapshots.get(path) {
                None => events.push(self.event(path, ChangeKind::Created)),
                Some(previous) if previous != snapshot => {
                    events.push(self.event(path, ChangeKind::Modified))
                }
                _ => {}
            }
        }
        for path in self.snapshots.keys() {
            if !current.contains_key(path) {
                events.push(self.event(path, ChangeKind::Deleted));
            }
        }

        self.snapshots = current;
        events
    }

    fn event(&self, path: &Path, kind: ChangeKind) -> FileChangeEvent {
        let relative_path = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        FileChangeEvent {
            relative_path,
            kind,
            timestamp: SystemTime::now(),
        }
    }

    fn walk(&self) -> HashMap<PathBuf, FileSnapshot> {
        let mut out = HashMap::new();
        let mut scanned = 0usize;
        self.walk_dir(&self.root, 0, &mut scanned, &mut out);
        out
    }

    fn walk_dir(
        &self,
        dir: &Path,
        depth: usize,
        scanned: &mut usize,
        out: &mut HashMap<PathBuf, FileSnapshot>,
    ) {
        if depth > MAX_WALK_DEPTH || *scanned >= self.max_files {
            return;
        }
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("change observer could not read {}: {err}", dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            if *scanned >= self.max_files {
                return;
            }
            let path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let relative = path
                .strip_prefix(&self.root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if self.ignore.is_ignored(&relative, meta.is_dir()) {
                continue;
            }
            if meta.is_dir() {
                self.walk_dir(&path, depth + 1, scanned, out);
                continue;
            }
            *scanned += 1;
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            out.insert(
                path,
                FileSnapshot {
                    modified,
                    size: meta.len(),
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn initial_scan_reports_no_events() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mut observer = ChangeObserver::new(dir.path().to_path_buf(), GitignoreFilter::empty(), 100);
        observer.initial_scan();
        assert!(observer.poll().is_empty());
    }

    #[test]
    fn detects_created_file() {
        let dir = tempdir().unwrap();
        let mut observer = ChangeObserver::new(dir.path().to_path_buf(), GitignoreFilter::empty(), 100);
        observer.initial_scan();
        fs::write(dir.path().join("new.txt"), "hi").unwrap();
        let events = observer.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Created);
        assert_eq!(events[0].relative_path, "new.txt");
    }

    #[test]
    fn detects_modified_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mut observer = ChangeObserver::new(dir.path().to_path_buf(), GitignoreFilter::empty(), 100);
        observer.initial_scan();
        thread::sleep(Duration::from_millis(10));
        fs::write(dir.path().join("a.txt"), "hello there").unwrap();
        let events = observer.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn detects_deleted_file() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "hi").unwrap();
        let mut observer = ChangeObserver::new(dir.path().to_path_buf(), GitignoreFilter::empty(), 100);
        observer.initial_scan();
        fs::remove_file(dir.path().join("a.txt")).unwrap();
        let events = observer.poll();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChangeKind::Deleted);
    }

    #[test]
    fn ignored_files_never_generate_events() {
        let dir = tempdir().unwrap();
        let ignore = GitignoreFilter::parse("*.log\n");
        let mut observer = ChangeObserver::new(dir.path().to_path_buf(), ignore, 100);
        observer.initial_scan();
        fs::write(dir.path().join("debug.log"), "hi").unwrap();
        assert!(observer.poll().is_empty());
    }

    #[test]
    fn unreadable_directory_degrades_to_no_events_not_a_crash() {
        let mut observer = ChangeObserver::new(PathBuf::from("/nonexistent/path"), GitignoreFilter::empty(), 100);
        observer.initial_scan();
        assert!(observer.poll().is_empty());
    }
}
