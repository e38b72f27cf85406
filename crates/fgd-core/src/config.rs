use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn default_memory_file() -> String {
    ".fgd_memory.json".to_string()
}

fn default_log_file() -> String {
    "fgd_server.log".to_string()
}

fn default_context_limit() -> usize {
    20
}

fn default_max_memory_entries() -> usize {
    1000
}

fn default_max_dir_size_gb() -> u64 {
    2
}

fn default_max_files_per_scan() -> usize {
    5
}

fn default_max_file_size_kb() -> u64 {
    250
}

fn default_provider() -> String {
    "grok".to_string()
}

/// Scan-time safety guards for C6 (ChangeObserver) and `search_in_files`.
///
/// `max_files_per_scan` is a safety guard against runaway scans of huge
/// trees, not a performance tuning knob — it is never relaxed just because a
/// scan is slow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanConfig {
    #[serde(default = "default_max_dir_size_gb")]
    pub max_dir_size_gb: u64,
    #[serde(default = "default_max_files_per_scan")]
    pub max_files_per_scan: usize,
    #[serde(default = "default_max_file_size_kb")]
    pub max_file_size_kb: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            max_dir_size_gb: default_max_dir_size_gb(),
            max_files_per_scan: default_max_files_per_scan(),
            max_file_size_kb: default_max_file_size_kb(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            default_provider: default_provider(),
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub watch_dir: PathBuf,
    #[serde(default = "default_memory_file")]
    pub memory_file: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<ServerConfig, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn memory_path(&self) -> PathBuf {
        self.watch_dir.join(&self.memory_file)
    }

    pub fn log_path(&self) -> PathBuf {
        self.watch_dir.join(&self.log_file)
    }
}
