mod lifecycle;
mod mcp;
mod tools;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fgd_approval::ApprovalProtocol;
use fgd_core::config::ServerConfig;
use fgd_core::error::CoreError;
use fgd_git::GitCli;
use fgd_ignore::GitignoreFilter;
use fgd_llm::LlmRouter;
use fgd_memory::MemoryStore;
use fgd_watch::{ChangeKind, ChangeObserver};

use crate::mcp::McpServer;
use crate::tools::AppState;

const STDIN_POLL_INTERVAL: Duration = Duration::from_millis(200);
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Parser)]
#[command(name = "fgd-server", version, about = "MCP workspace server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Runs the MCP stdio server loop.
    Serve {
        #[arg(long, default_value = "fgd.yaml")]
        config: PathBuf,
        #[arg(long)]
        watch_dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { config, watch_dir } => serve(config, watch_dir),
    }
}

fn serve(config_path: PathBuf, watch_dir_override: Option<PathBuf>) -> Result<()> {
    let mut config = ServerConfig::load(&config_path)?;
    if let Some(watch_dir) = watch_dir_override {
        config.watch_dir = watch_dir;
    }

    lifecycle::validate_watch_dir(&config.watch_dir)?;
    let _logger = lifecycle::init_logging(&config.log_path())?;
    log::info!(
        "fgd-server starting, watching {}",
        config.watch_dir.display()
    );

    let memory = Arc::new(MemoryStore::new(
        config.memory_path(),
        config.context_limit,
        config.max_memory_entries,
    ));
    let ignore = GitignoreFilter::load(&config.watch_dir).unwrap_or_else(|err| {
        log::warn!("failed to load ignore file, proceeding without one: {err}");
        GitignoreFilter::empty()
    });
    let git = GitCli::default();
    let llm = LlmRouter::new(config.llm.clone());
    let approval = Arc::new(ApprovalProtocol::new(config.watch_dir.clone()));
    let cancel = lifecycle::install_shutdown_signal()?;

    let state = Arc::new(AppState {
        root: config.watch_dir.clone(),
        memory: memory.clone(),
        ignore: ignore.clone(),
        scan: config.scan.clone(),
        git,
        llm,
        approval,
        cancel: cancel.clone(),
    });

    let watch_handle = spawn_watch_thread(
        config.watch_dir.clone(),
        ignore,
        config.scan.max_files_per_scan,
        memory,
        cancel.clone(),
    );
    let approval_handle = spawn_approval_thread(state.clone(), cancel.clone());

    let mut server = McpServer::new("fgd-server", env!("CARGO_PKG_VERSION"));
    tools::register_builtin_tools(&mut server, state);

    run_stdio_loop(&mut server, &cancel)?;

    cancel.store(true, Ordering::Relaxed);
    if watch_handle.join().is_err() {
        log::warn!("change observer thread panicked during shutdown");
    }
    if approval_handle.join().is_err() {
        log::warn!("approval loop thread panicked during shutdown");
    }
    log::info!("fgd-server shut down cleanly");
    Ok(())
}

/// Reads stdin on a helper thread and polls for lines on the main thread
/// with a bounded timeout, so a SIGINT/SIGTERM-triggered `cancel` flag is
/// observed within one poll period instead of blocking forever on a
/// stdin read the signal cannot interrupt.
fn run_stdio_loop(server: &mut McpServer, cancel: &AtomicBool) -> Result<()> {
    let (tx, rx) = mpsc::channel::<String>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut stdout = io::stdout();
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Ok(());
        }
        match rx.recv_timeout(STDIN_POLL_INTERVAL) {
            Ok(line) => {
                if let Some(response) = server.process_line(&line) {
                    stdout.write_all(response.as_bytes())?;
                    stdout.write_all(b"\n")?;
                    stdout.flush()?;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        }
    }
}

/// The C5 background loop: polls the approval rendezvous every
/// [`fgd_approval::POLL_INTERVAL`], applying the staged edit on a
/// matching approval, recording a `file_edit_rejected` ContextItem on an
/// explicit rejection, and refusing (also as `file_edit_rejected`, logged
/// as `StaleApproval`) an approval whose filepath no longer matches
/// whatever is currently staged — without touching that unrelated
/// pending edit.
fn spawn_approval_thread(state: Arc<AppState>, cancel: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !cancel.load(Ordering::Relaxed) {
            match state.approval.take_approval() {
                Ok(Some(approval)) => handle_approval(&state, approval),
                Ok(None) => {}
                Err(err) => log::warn!("failed to poll approval file: {err}"),
            }
            thread::sleep(fgd_approval::POLL_INTERVAL);
        }
    })
}

fn handle_approval(state: &AppState, approval: fgd_core::model::Approval) {
    let pending = match state.approval.read_pending() {
        Ok(pending) => pending,
        Err(err) => {
            log::warn!("failed to read pending edit: {err}");
            return;
        }
    };

    let Some(pending) = pending else {
        let stale = CoreError::StaleApproval {
            path: PathBuf::from(&approval.filepath),
        };
        log::warn!("{stale} (no edit is currently staged)");
        let _ = state.memory.push_context("file_edit_rejected", &approval.filepath);
        return;
    };

    if pending.filepath != approval.filepath {
        let stale = CoreError::StaleApproval {
            path: PathBuf::from(&approval.filepath),
        };
        log::warn!("{stale} (staged edit is for {})", pending.filepath);
        let _ = state.memory.push_context("file_edit_rejected", &approval.filepath);
        return;
    }

    if !approval.approved {
        let _ = state.memory.push_context("file_edit_rejected", &pending.filepath);
        state.approval.clear_pending();
        return;
    }

    let applied = fgd_fileops::preview_edit(&state.root, &pending.filepath, &pending.old_text, &pending.new_text)
        .and_then(|preview| {
            fgd_fileops::apply_edit(&state.root, &pending.filepath, &preview.updated_contents)
        });
    match applied {
        Ok(_) => {
            let _ = state.memory.push_context("file_edit", &pending.filepath);
        }
        Err(err) => {
            log::warn!("approved edit to {} could not be applied: {err}", pending.filepath);
            let _ = state.memory.push_context("file_edit_rejected", &pending.filepath);
        }
    }
    state.approval.clear_pending();
}

fn spawn_watch_thread(
    root: PathBuf,
    ignore: GitignoreFilter,
    max_files: usize,
    memory: Arc<MemoryStore>,
    cancel: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut observer = ChangeObserver::new(root, ignore, max_files);
        observer.initial_scan();
        while !cancel.load(Ordering::Relaxed) {
            for event in observer.poll() {
                let kind = match event.kind {
                    ChangeKind::Created => "created",
                    ChangeKind::Modified => "modified",
                    ChangeKind::Deleted => "deleted",
                };
                if let Err(err) = memory.push_context(
                    "file_change",
                    &format!("{kind} {}", event.relative_path),
                ) {
                    log::warn!("failed to record file change in memory: {err}");
                }
            }
            thread::sleep(WATCH_POLL_INTERVAL);
        }
    })
}
