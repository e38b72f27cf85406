pub mod config;
pub mod error;
pub mod model;
pub mod path;

pub use config::{LlmConfig, ProviderConfig, ScanConfig, ServerConfig};
pub use error::CoreError;
pub use model::{Approval, ConversationEntry, ContextItem, Entry, MemoryDocument, PendingEdit};
pub use path::{resolve, SandboxedPath};

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::TypeId;

    #[test]
    fn reexports_are_reachable_from_crate_root() {
        assert_eq!(TypeId::of::<ServerConfig>(), TypeId::of::<config::ServerConfig>());
        assert_eq!(TypeId::of::<CoreError>(), TypeId::of::<error::CoreError>());
        assert_eq!(TypeId::of::<SandboxedPath>(), TypeId::of::<path::SandboxedPath>());
    }
}
