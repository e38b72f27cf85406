pub mod command;
pub mod error;
pub mod repo;

pub use command::{GitCli, GitOutput};
pub use error::GitError;
pub use repo::{commit, current_branch, diff, discover_repo, git_available, head_sha, is_repo, log, LogEntry};

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    #[test]
    fn reexports_are_reachable_from_crate_root() {
        assert_eq!(TypeId::of::<GitCli>(), TypeId::of::<command::GitCli>());
        assert_eq!(TypeId::of::<GitError>(), TypeId::of::<error::GitError>());
    }
}
