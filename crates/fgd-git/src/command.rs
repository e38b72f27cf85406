use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::GitError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A `git` subprocess wrapper with a per-call deadline, so a hung or
/// interactive git invocation cannot block the server forever — the same
/// spawn-then-poll-`try_wait`-against-a-deadline idiom used elsewhere in
/// this workspace for bounded subprocess waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitCli {
    pub binary: PathBuf,
    pub timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        GitCli {
            binary: PathBuf::from("git"),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        GitCli {
            binary: binary.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run<I, S>(&self, cwd: &Path, args: I) -> Result<GitOutput, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let owned_args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let rendered = render_command(&self.binary, &owned_args);

        let mut command = Command::new(&self.binary);
        command
            .current_dir(cwd)
            .args(&owned_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| GitError::Io {
            command: rendered.clone(),
            source,
        })?;

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait().map_err(|source| GitError::Io {
                command: rendered.clone(),
                source,
            })? {
                Some(status) => break status,
                None if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                None => {
                    let _ = child.kill();
                    let _ = child.wait();
                    log::warn!(
                        "git command timed out after {}s, killing it: {rendered}",
                        self.timeout.as_secs()
                    );
                    return Err(GitError::Timeout {
                        command: rendered,
                        seconds: self.timeout.as_secs(),
                    });
                }
            }
        };

        let mut stdout_bytes = Vec::new();
        let mut stderr_bytes = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_end(&mut stdout_bytes);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_end(&mut stderr_bytes);
        }

        let stdout = String::from_utf8(stdout_bytes).map_err(|source| GitError::NonUtf8Output {
            command: rendered.clone(),
            stream: "stdout",
            source,
        })?;
        let stderr = String::from_utf8(stderr_bytes).map_err(|source| GitError::NonUtf8Output {
            command: rendered.clone(),
            stream: "stderr",
            source,
        })?;

        if !status.success() {
            return Err(GitError::CommandFailed {
                command: rendered,
                status: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(GitOutput { stdout, stderr })
    }
}

fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn runs_a_real_git_invocation() {
        let dir = tempdir().unwrap();
        let cli = GitCli::default();
        let output = cli.run(dir.path(), ["--version"]).unwrap();
        assert!(output.stdout.to_lowercase().contains("git version"));
    }

    #[test]
    fn nonzero_exit_is_command_failed() {
        let dir = tempdir().unwrap();
        let cli = GitCli::default();
        let err = cli.run(dir.path(), ["this-is-not-a-git-subcommand"]).unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }

    #[test]
    fn missing_binary_is_an_io_error() {
        let dir = tempdir().unwrap();
        let cli = GitCli::new("definitely-not-a-real-binary-xyz");
        let err = cli.run(dir.path(), ["--version"]).unwrap_err();
        assert!(matches!(err, GitError::Io { .. }));
    }
}
