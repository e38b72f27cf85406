use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use flexi_logger::{FileSpec, Logger, LoggerHandle, WriteMode};

/// Verifies the watched root exists and is both readable and writable
/// before the server starts serving requests; a process that cannot
/// touch its own root should refuse to start rather than fail on the
/// first tool call.
pub fn validate_watch_dir(path: &Path) -> Result<()> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("watched root does not exist: {}", path.display()))?;
    if !metadata.is_dir() {
        bail!("watched root is not a directory: {}", path.display());
    }

    let probe = path.join(format!(".fgd_startup_probe_{}", std::process::id()));
    fs::write(&probe, b"probe")
        .with_context(|| format!("watched root is not writable: {}", path.display()))?;
    let readable = fs::read(&probe).is_ok();
    let _ = fs::remove_file(&probe);
    if !readable {
        bail!("watched root is not readable: {}", path.display());
    }
    Ok(())
}

/// Starts file-appending structured logging inside the watched root, the
/// way the server's `log::{info,warn,error}` call sites expect a sink to
/// already exist.
pub fn init_logging(log_path: &Path) -> Result<LoggerHandle> {
    let spec = FileSpec::try_from(log_path)
        .with_context(|| format!("invalid log path: {}", log_path.display()))?;
    Logger::try_with_str("info")?
        .log_to_file(spec)
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .start()
        .context("failed to start logger")
}

/// Installs SIGINT/SIGTERM handlers that flip a shared flag rather than
/// terminating the process directly, so the main loop can drain pending
/// work and close background threads before exiting.
pub fn install_shutdown_signal() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, shutdown.clone())
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown.clone())
        .context("failed to register SIGTERM handler")?;
    Ok(shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn validates_an_existing_writable_directory() {
        let dir = tempdir().unwrap();
        assert!(validate_watch_dir(dir.path()).is_ok());
    }

    #[test]
    fn rejects_a_missing_directory() {
        let err = validate_watch_dir(Path::new("/nonexistent/fgd-root")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn rejects_a_path_that_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();
        let err = validate_watch_dir(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn probe_file_is_cleaned_up_after_validation() {
        let dir = tempdir().unwrap();
        validate_watch_dir(dir.path()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("fgd_startup_probe"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
