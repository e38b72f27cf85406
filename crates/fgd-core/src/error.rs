use std::path::PathBuf;

use thiserror::Error;

/// Unified error taxonomy surfaced at the tool boundary.
///
/// Component crates define their own narrower error enums and convert into
/// this one at the edge, the way `orchd` folds `orch_git::GitError` into its
/// own call sites rather than re-deriving git errors itself.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("path escapes watched root: {path}")]
    PathTraversal { path: String },

    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("not a file: {path}")]
    NotAFile { path: PathBuf },

    #[error("file too large: {path} ({size_kb} KiB > limit {limit_kb} KiB)")]
    FileTooLarge {
        path: PathBuf,
        size_kb: u64,
        limit_kb: u64,
    },

    #[error("file is binary or not valid UTF-8: {path}")]
    BinaryOrInvalidEncoding { path: PathBuf },

    #[error("write to {path} could not be verified after completion")]
    WriteVerificationFailed { path: PathBuf },

    #[error("edit anchor text not found in {path}")]
    EditAnchorMissing { path: PathBuf },

    #[error("timed out waiting for exclusive lock on {path}")]
    LockTimeout { path: PathBuf },

    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("unknown llm provider: {provider}")]
    ProviderUnknown { provider: String },

    #[error("missing credentials for llm provider: {provider}")]
    ProviderAuthMissing { provider: String },

    #[error("llm provider request failed: {provider}: {message}")]
    ProviderHttp { provider: String, message: String },

    #[error("llm provider request timed out: {provider}")]
    ProviderTimeout { provider: String },

    #[error("approval is stale: {path}")]
    StaleApproval { path: PathBuf },

    #[error("git is unavailable in this workspace")]
    GitUnavailable,

    #[error("git command timed out after {seconds}s")]
    GitTimeout { seconds: u64 },

    #[error("not a git repository: {path}")]
    NotAGitRepo { path: PathBuf },

    #[error("watched root exceeds configured size guard: {path}")]
    RootTooLarge { path: PathBuf },

    #[error("unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Render the `Error: ...` text the MCP tool envelope wraps every
    /// failure in, per the dispatcher's uniform error-content convention.
    pub fn as_tool_message(&self) -> String {
        format!("Error: {self}")
    }
}
