use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::command::GitCli;
use crate::error::GitError;

static COMMIT_HASH_RE: OnceLock<Regex> = OnceLock::new();

fn commit_hash_re() -> &'static Regex {
    COMMIT_HASH_RE
        .get_or_init(|| Regex::new(r"\[(?:\S+\s+)?([0-9a-f]{4,40})\]").expect("valid regex"))
}

static GIT_AVAILABLE: OnceLock<bool> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub hash: String,
    pub subject: String,
}

/// Probes once per process whether `git` is on `PATH` at all; repo-ness is
/// still checked per call since the watched root can change underneath a
/// long-lived server.
pub fn git_available(cli: &GitCli) -> bool {
    *GIT_AVAILABLE.get_or_init(|| cli.run(Path::new("."), ["--version"]).is_ok())
}

pub fn is_repo(cli: &GitCli, path: &Path) -> bool {
    cli.run(path, ["rev-parse", "--is-inside-work-tree"])
        .map(|out| out.stdout.trim() == "true")
        .unwrap_or(false)
}

fn require_repo(cli: &GitCli, path: &Path) -> Result<(), GitError> {
    if !git_available(cli) {
        return Err(GitError::Unavailable);
    }
    if !is_repo(cli, path) {
        return Err(GitError::NotARepository {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

pub fn current_branch(cli: &GitCli, path: &Path) -> Result<String, GitError> {
    require_repo(cli, path)?;
    let out = cli.run(path, ["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(out.stdout.trim().to_string())
}

pub fn head_sha(cli: &GitCli, path: &Path) -> Result<String, GitError> {
    require_repo(cli, path)?;
    let out = cli.run(path, ["rev-parse", "HEAD"])?;
    Ok(out.stdout.trim().to_string())
}

pub fn diff(cli: &GitCli, path: &Path) -> Result<String, GitError> {
    require_repo(cli, path)?;
    let out = cli.run(path, ["diff"])?;
    Ok(out.stdout)
}

/// Stages all changes (`git add -A`) then runs `git commit -m <message>`,
/// extracting the new commit's short hash from the porcelain summary line
/// by regex, never by splitting on a fixed whitespace position (git's
/// summary format is not a stable positional contract across
/// versions/locales).
pub fn commit(cli: &GitCli, path: &Path, message: &str) -> Result<String, GitError> {
    require_repo(cli, path)?;
    cli.run(path, ["add", "-A"])?;
    let out = cli.run(path, ["commit", "-m", message])?;
    commit_hash_re()
        .captures(&out.stdout)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| GitError::Parse {
            context: format!("could not find commit hash in: {}", out.stdout.trim()),
        })
}

pub fn log(cli: &GitCli, path: &Path, limit: usize) -> Result<Vec<LogEntry>, GitError> {
    require_repo(cli, path)?;
    let limit_arg = limit.to_string();
    let out = cli.run(path, ["log", "--oneline", "-n", &limit_arg])?;
    Ok(out
        .stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(2, ' ');
            let hash = parts.next()?.to_string();
            let subject = parts.next().unwrap_or("").to_string();
            Some(LogEntry { hash, subject })
        })
        .collect())
}

pub fn discover_repo(cli: &GitCli, path: &Path) -> Result<PathBuf, GitError> {
    require_repo(cli, path)?;
    let out = cli.run(path, ["rev-parse", "--show-toplevel"])?;
    Ok(PathBuf::from(out.stdout.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::tempdir;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "Test"]);
        dir
    }

    #[test]
    fn detects_non_repo_directories() {
        let dir = tempdir().unwrap();
        let cli = GitCli::default();
        assert!(!is_repo(&cli, dir.path()));
    }

    #[test]
    fn commit_and_log_round_trip_on_a_real_repo() {
        let dir = init_repo();
        let cli = GitCli::default();
        std::fs::write(dir.path().join("a.txt"), "hi").unwrap();
        Command::new("git")
            .args(["add", "-A"])
            .current_dir(dir.path())
            .output()
            .unwrap();

        let hash = commit(&cli, dir.path(), "initial commit").unwrap();
        assert!(!hash.is_empty());
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));

        let entries = log(&cli, dir.path(), 10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].subject, "initial commit");
    }

    #[test]
    fn commit_hash_regex_extracts_hash_not_positional_split() {
        let caps = commit_hash_re()
            .captures("[main abc1234] a commit message with [brackets] in it")
            .unwrap();
        assert_eq!(&caps[1], "abc1234");
    }

    #[test]
    fn operations_on_non_repo_fail_with_not_a_repository() {
        let dir = tempdir().unwrap();
        let cli = GitCli::default();
        let err = current_branch(&cli, dir.path()).unwrap_err();
        assert!(matches!(err, GitError::NotARepository { .. }));
    }
}
