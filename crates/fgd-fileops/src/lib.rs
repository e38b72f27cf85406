use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fgd_core::error::CoreError;
use fgd_core::path::{self, SandboxedPath};
use fgd_ignore::GitignoreFilter;

const PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// The structured result of [`list_directory`], mirroring the tool's
/// `{path, files, file_count, filtered_hidden, filtered_gitignore,
/// total_entries, note}` response contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirListing {
    pub path: String,
    pub files: Vec<DirEntryInfo>,
    pub file_count: usize,
    pub filtered_hidden: usize,
    pub filtered_gitignore: usize,
    pub total_entries: usize,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

/// The structured result of [`read_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub content: String,
    pub size_kb: u64,
    pub modified: DateTime<Utc>,
    pub lines: usize,
}

/// The structured result of [`write_file`] / [`apply_edit`]: bytes written
/// and, if a prior version of the file existed, the name of the `.bak`
/// sibling it was copied to before being overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub bytes_written: u64,
    pub backup: Option<String>,
}

/// Lists the direct children of `relative`, filtering out hidden entries
/// (basename starting with `.`) and anything the ignore filter excludes,
/// counting each separately so `file_count + filtered_hidden +
/// filtered_gitignore == total_entries` always holds.
pub fn list_directory(
    root: &Path,
    relative: &str,
    ignore: &GitignoreFilter,
) -> Result<DirListing, CoreError> {
    let resolved = path::resolve(root, relative)?;
    let metadata = fs::metadata(resolved.canonical()).map_err(|_| CoreError::NotFound {
        path: resolved.canonical().to_path_buf(),
    })?;
    if !metadata.is_dir() {
        return Err(CoreError::NotADirectory {
            path: resolved.canonical().to_path_buf(),
        });
    }

    let mut files = Vec::new();
    let mut filtered_hidden = 0usize;
    let mut filtered_gitignore = 0usize;
    let mut total_entries = 0usize;
    for entry in fs::read_dir(resolved.canonical()).map_err(|source| CoreError::Io {
        path: resolved.canonical().to_path_buf(),
        source,
    })? {
        let entry = entry.map_err(|source| CoreError::Io {
            path: resolved.canonical().to_path_buf(),
            source,
        })?;
        total_entries += 1;
        let name = entry.file_name().to_string_lossy().into_owned();
        let meta = entry.metadata().map_err(|source| CoreError::Io {
            path: entry.path(),
            source,
        })?;
        if name.starts_with('.') {
            filtered_hidden += 1;
            continue;
        }
        let rel = join_relative(resolved.relative(), &name);
        if ignore.is_ignored(&rel, meta.is_dir()) {
            filtered_gitignore += 1;
            continue;
        }
        files.push(DirEntryInfo {
            name,
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
        });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    let file_count = files.len();
    let note = if total_entries == 0 {
        "directory is empty".to_string()
    } else if file_count == 0 {
        format!("{total_entries} entries, all filtered (hidden or gitignored)")
    } else {
        format!("{file_count} of {total_entries} entries shown")
    };

    Ok(DirListing {
        path: if relative.is_empty() { "." } else { relative }.to_string(),
        files,
        file_count,
        filtered_hidden,
        filtered_gitignore,
        total_entries,
        note,
    })
}

/// Reads a UTF-8 text file, rejecting anything over `max_file_size_kb` or
/// that does not decode as UTF-8.
pub fn read_file(
    root: &Path,
    relative: &str,
    max_file_size_kb: u64,
) -> Result<ReadOutcome, CoreError> {
    let resolved = require_file(root, relative)?;
    let metadata = fs::metadata(resolved.canonical()).map_err(|_| CoreError::NotFound {
        path: resolved.canonical().to_path_buf(),
    })?;
    let size_kb = metadata.len() / 1024;
    if size_kb > max_file_size_kb {
        return Err(CoreError::FileTooLarge {
            path: resolved.canonical().to_path_buf(),
            size_kb,
            limit_kb: max_file_size_kb,
        });
    }
    let bytes = fs::read(resolved.canonical()).map_err(|source| CoreError::Io {
        path: resolved.canonical().to_path_buf(),
        source,
    })?;
    let content =
        String::from_utf8(bytes).map_err(|_| CoreError::BinaryOrInvalidEncoding {
            path: resolved.canonical().to_path_buf(),
        })?;
    let modified = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let lines = content.lines().count();
    Ok(ReadOutcome {
        content,
        size_kb,
        modified,
        lines,
    })
}

/// Writes `contents` atomically, creating parent directories as needed.
/// If a file already exists at the target, it is copied to a sibling
/// `<name>.bak` before being overwritten. Reads the file back afterward to
/// verify the bytes landed.
pub fn write_file(
    root: &Path,
    relative: &str,
    contents: &str,
) -> Result<WriteOutcome, CoreError> {
    let resolved = path::resolve(root, relative)?;
    let target = resolved.canonical();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|source| CoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let backup = if target.is_file() {
        let bak = backup_path(target);
        fs::copy(target, &bak).map_err(|source| CoreError::Io {
            path: bak.clone(),
            source,
        })?;
        bak.file_name().map(|n| n.to_string_lossy().into_owned())
    } else {
        None
    };

    atomic_write(target, contents.as_bytes())?;
    let verify = fs::read(target).map_err(|_| CoreError::WriteVerificationFailed {
        path: target.to_path_buf(),
    })?;
    if verify != contents.as_bytes() {
        return Err(CoreError::WriteVerificationFailed {
            path: target.to_path_buf(),
        });
    }
    Ok(WriteOutcome {
        bytes_written: contents.len() as u64,
        backup,
    })
}

/// `<name>.bak` sibling of `path`, the destination `write_file` copies an
/// existing file to before overwriting it.
fn backup_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| format!("{}.bak", n.to_string_lossy()))
        .unwrap_or_else(|| "file.bak".to_string());
    path.with_file_name(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditPreview {
    pub updated_contents: String,
    pub diff: String,
    pub preview: String,
    pub occurrences: usize,
}

/// Computes the result of replacing the first occurrence of `old_text`
/// with `new_text` and a unified diff of the change, without writing
/// anything — the half of an edit that can be shown to a human before
/// `apply_edit` commits it. `occurrences` lets a caller note when
/// `old_text` was ambiguous (matched more than once) even though only the
/// first match is ever replaced.
pub fn preview_edit(
    root: &Path,
    relative: &str,
    old_text: &str,
    new_text: &str,
) -> Result<EditPreview, CoreError> {
    let resolved = require_file(root, relative)?;
    let original = fs::read_to_string(resolved.canonical()).map_err(|_| {
        CoreError::BinaryOrInvalidEncoding {
            path: resolved.canonical().to_path_buf(),
        }
    })?;
    let occurrences = original.matches(old_text).count();
    if occurrences == 0 {
        return Err(CoreError::EditAnchorMissing {
            path: resolved.canonical().to_path_buf(),
        });
    }
    let position = original.find(old_text).expect("occurrences > 0");
    let mut updated = String::with_capacity(original.len());
    updated.push_str(&original[..position]);
    updated.push_str(new_text);
    updated.push_str(&original[position + old_text.len()..]);

    let diff = similar::TextDiff::from_lines(&original, &updated)
        .unified_diff()
        .header(relative, relative)
        .to_string();
    let preview = updated.chars().take(PREVIEW_CHARS).collect();

    Ok(EditPreview {
        updated_contents: updated,
        diff,
        preview,
        occurrences,
    })
}

/// Commits an already-computed edit body, verifying the write the same
/// way `write_file` does (including the `.bak` backup).
pub fn apply_edit(
    root: &Path,
    relative: &str,
    updated_contents: &str,
) -> Result<WriteOutcome, CoreError> {
    write_file(root, relative, updated_contents)
}

/// Replaces the first occurrence of `old_text` with `new_text` and writes
/// the result immediately, returning the preview (including its diff).
/// Callers that need human approval before committing should use
/// [`preview_edit`] and [`apply_edit`] instead.
pub fn edit_file(
    root: &Path,
    relative: &str,
    old_text: &str,
    new_text: &str,
) -> Result<EditPreview, CoreError> {
    let preview = preview_edit(root, relative, old_text, new_text)?;
    apply_edit(root, relative, &preview.updated_contents)?;
    Ok(preview)
}

/// Creates `relative` and any missing parent directories. Idempotent when
/// `relative` already exists as a directory; an error when it exists as
/// something else.
pub fn create_directory(root: &Path, relative: &str) -> Result<(), CoreError> {
    let resolved = path::resolve(root, relative)?;
    let target = resolved.canonical();
    if let Ok(meta) = fs::metadata(target) {
        if !meta.is_dir() {
            return Err(CoreError::NotADirectory {
                path: target.to_path_buf(),
            });
        }
        return Ok(());
    }
    fs::create_dir_all(target).map_err(|source| CoreError::Io {
        path: target.to_path_buf(),
        source,
    })
}

/// Recursively searches text files under `relative` for a case-insensitive
/// `query`, honoring the ignore filter, an optional filename `pattern`
/// glob, and a `max_files_per_scan` safety guard — a cap on blast radius,
/// not a tuning knob, so the scan simply stops (without error) once it has
/// been applied. The literal default pattern `"**/*"` (and an empty
/// pattern) match every filename, since arbitrary-depth `**` globbing
/// itself is not implemented; any other pattern is matched against each
/// file's basename.
///
/// Before scanning, `root` itself is measured against `max_dir_size_gb`;
/// a watched root over that size is refused outright as
/// [`CoreError::RootTooLarge`].
pub fn search_in_files(
    root: &Path,
    relative: &str,
    query: &str,
    pattern: &str,
    ignore: &GitignoreFilter,
    max_files_per_scan: usize,
    max_dir_size_gb: u64,
) -> Result<Vec<SearchMatch>, CoreError> {
    let cap_bytes = max_dir_size_gb * 1024 * 1024 * 1024;
    if directory_size_exceeds(root, cap_bytes) {
        return Err(CoreError::RootTooLarge {
            path: root.to_path_buf(),
        });
    }

    let resolved = path::resolve(root, relative)?;
    let query_lower = query.to_lowercase();
    let match_all_names = pattern.is_empty() || pattern == "**/*";
    let mut matches = Vec::new();
    let mut scanned = 0usize;
    let mut stack = vec![resolved.canonical().to_path_buf()];

    while let Some(dir) = stack.pop() {
        if scanned >= max_files_per_scan {
            break;
        }
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if scanned >= max_files_per_scan {
                break;
            }
            let entry_path = entry.path();
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            let rel = entry_path
                .strip_prefix(root)
                .unwrap_or(&entry_path)
                .to_string_lossy()
                .replace('\\', "/");
            if ignore.is_ignored(&rel, meta.is_dir()) {
                continue;
            }
            if meta.is_dir() {
                stack.push(entry_path);
                continue;
            }
            if !match_all_names {
                let basename = entry_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !fgd_ignore::glob_match(pattern, &basename) {
                    continue;
                }
            }
            scanned += 1;
            let Ok(contents) = fs::read_to_string(&entry_path) else {
                continue;
            };
            for (idx, line) in contents.lines().enumerate() {
                if line.to_lowercase().contains(&query_lower) {
                    matches.push(SearchMatch {
                        path: rel.clone(),
                        line_number: idx + 1,
                        line: line.to_string(),
                    });
                }
            }
        }
    }
    Ok(matches)
}

/// Sums file sizes under `root` breadth-first, stopping as soon as the
/// running total exceeds `cap_bytes` rather than walking the whole tree.
fn directory_size_exceeds(root: &Path, cap_bytes: u64) -> bool {
    let mut total: u64 = 0;
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
                if total > cap_bytes {
                    return true;
                }
            }
        }
    }
    false
}

fn require_file(root: &Path, relative: &str) -> Result<SandboxedPath, CoreError> {
    let resolved = path::resolve(root, relative)?;
    let metadata = fs::metadata(resolved.canonical()).map_err(|_| CoreError::NotFound {
        path: resolved.canonical().to_path_buf(),
    })?;
    if !metadata.is_file() {
        return Err(CoreError::NotAFile {
            path: resolved.canonical().to_path_buf(),
        });
    }
    Ok(resolved)
}

fn join_relative(base: &Path, name: &str) -> String {
    if base.as_os_str().is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base.to_string_lossy(), name)
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_name = match path.file_name() {
        Some(name) => format!(".{}.tmp-{}", name.to_string_lossy(), std::process::id()),
        None => format!(".fgd-fileops.tmp-{}", std::process::id()),
    };
    let tmp_path: PathBuf = dir.join(tmp_name);

    fs::write(&tmp_path, bytes).map_err(|source| CoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;

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
            let result = fs::write(path, bytes).map_err(|source| CoreError::Io {
                path: path.to_path_buf(),
                source,
            });
            let _ = fs::remove_file(&tmp_path);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "hello").unwrap();
        assert_eq!(read_file(dir.path(), "a.txt", 512).unwrap().content, "hello");
    }

    #[test]
    fn write_file_backs_up_existing_content_before_overwrite() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "v1").unwrap();
        let outcome = write_file(dir.path(), "a.txt", "v2").unwrap();
        assert_eq!(outcome.backup.as_deref(), Some("a.txt.bak"));
        assert_eq!(fs::read_to_string(dir.path().join("a.txt.bak")).unwrap(), "v1");
        assert_eq!(read_file(dir.path(), "a.txt", 512).unwrap().content, "v2");
    }

    #[test]
    fn write_file_on_new_path_has_no_backup() {
        let dir = tempdir().unwrap();
        let outcome = write_file(dir.path(), "new.txt", "hi").unwrap();
        assert_eq!(outcome.backup, None);
    }

    #[test]
    fn read_file_rejects_oversized_files() {
        let dir = tempdir().unwrap();
        let big = "x".repeat(2048);
        write_file(dir.path(), "big.txt", &big).unwrap();
        let err = read_file(dir.path(), "big.txt", 1).unwrap_err();
        assert!(matches!(err, CoreError::FileTooLarge { .. }));
    }

    #[test]
    fn read_file_rejects_non_utf8_bytes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bin.dat"), [0xff, 0xfe, 0x00, 0xff]).unwrap();
        let err = read_file(dir.path(), "bin.dat", 512).unwrap_err();
        assert!(matches!(err, CoreError::BinaryOrInvalidEncoding { .. }));
    }

    #[test]
    fn read_file_reports_line_count() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "one\ntwo\nthree\n").unwrap();
        assert_eq!(read_file(dir.path(), "a.txt", 512).unwrap().lines, 3);
    }

    #[test]
    fn edit_file_replaces_anchor_and_returns_diff() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "line one\nline two\n").unwrap();
        let preview = edit_file(dir.path(), "a.txt", "line two", "line TWO").unwrap();
        assert_eq!(
            read_file(dir.path(), "a.txt", 512).unwrap().content,
            "line one\nline TWO\n"
        );
        assert!(preview.diff.contains("-line two"));
        assert!(preview.diff.contains("+line TWO"));
        assert_eq!(preview.occurrences, 1);
    }

    #[test]
    fn edit_file_missing_anchor_is_an_error() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "line one\n").unwrap();
        let err = edit_file(dir.path(), "a.txt", "nope", "x").unwrap_err();
        assert!(matches!(err, CoreError::EditAnchorMissing { .. }));
    }

    #[test]
    fn preview_edit_reports_multiple_occurrences() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "x\nx\nx\n").unwrap();
        let preview = preview_edit(dir.path(), "a.txt", "x", "y").unwrap();
        assert_eq!(preview.occurrences, 3);
        assert_eq!(preview.updated_contents, "y\nx\nx\n");
    }

    #[test]
    fn list_directory_skips_ignored_and_hidden_entries() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "keep.txt", "a").unwrap();
        write_file(dir.path(), "drop.log", "b").unwrap();
        write_file(dir.path(), ".hidden", "c").unwrap();
        let ignore = GitignoreFilter::parse("*.log\n");
        let listing = list_directory(dir.path(), ".", &ignore).unwrap();
        let names: Vec<_> = listing.files.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["keep.txt"]);
        assert_eq!(listing.file_count, 1);
        assert_eq!(listing.filtered_hidden, 1);
        assert_eq!(listing.filtered_gitignore, 1);
        assert_eq!(listing.total_entries, 3);
        assert_eq!(
            listing.file_count + listing.filtered_hidden + listing.filtered_gitignore,
            listing.total_entries
        );
    }

    #[test]
    fn create_directory_makes_nested_dirs() {
        let dir = tempdir().unwrap();
        create_directory(dir.path(), "a/b/c").unwrap();
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[test]
    fn create_directory_is_idempotent() {
        let dir = tempdir().unwrap();
        create_directory(dir.path(), "a").unwrap();
        create_directory(dir.path(), "a").unwrap();
    }

    #[test]
    fn create_directory_rejects_existing_non_directory() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a", "x").unwrap();
        let err = create_directory(dir.path(), "a").unwrap_err();
        assert!(matches!(err, CoreError::NotADirectory { .. }));
    }

    #[test]
    fn search_in_files_is_case_insensitive() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.txt", "alpha\nNeedle here\nbeta\n").unwrap();
        write_file(dir.path(), "b.txt", "nothing interesting\n").unwrap();
        let ignore = GitignoreFilter::empty();
        let matches =
            search_in_files(dir.path(), ".", "needle", "**/*", &ignore, 100, 2).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "a.txt");
        assert_eq!(matches[0].line_number, 2);
    }

    #[test]
    fn search_in_files_respects_scan_guard() {
        let dir = tempdir().unwrap();
        for i in 0..5 {
            write_file(dir.path(), &format!("f{i}.txt"), "needle\n").unwrap();
        }
        let ignore = GitignoreFilter::empty();
        let matches = search_in_files(dir.path(), ".", "needle", "**/*", &ignore, 2, 2).unwrap();
        assert!(matches.len() <= 2);
    }

    #[test]
    fn search_in_files_filters_by_filename_pattern() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "needle\n").unwrap();
        write_file(dir.path(), "a.txt", "needle\n").unwrap();
        let ignore = GitignoreFilter::empty();
        let matches =
            search_in_files(dir.path(), ".", "needle", "*.rs", &ignore, 100, 2).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "a.rs");
    }

    #[test]
    fn search_in_files_refuses_when_root_exceeds_size_guard() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "big.txt", &"x".repeat(2048)).unwrap();
        let ignore = GitignoreFilter::empty();
        let err = search_in_files(dir.path(), ".", "x", "**/*", &ignore, 100, 0).unwrap_err();
        assert!(matches!(err, CoreError::RootTooLarge { .. }));
    }
}
