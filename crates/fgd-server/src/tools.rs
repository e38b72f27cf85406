use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Utc;
use fgd_core::config::ScanConfig;
use fgd_core::model::{ConversationEntry, PendingEdit};
use fgd_git::GitCli;
use fgd_ignore::GitignoreFilter;
use fgd_llm::LlmRouter;
use fgd_memory::{MemoryStore, RecallOutcome};
use serde_json::{json, Value};

use crate::mcp::{McpServer, ToolCallResult, ToolDefinition};

const DEFAULT_SEARCH_PATTERN: &str = "**/*";
const DEFAULT_CATEGORY: &str = "general";

/// Shared state every tool handler closes over. Held behind an `Arc` so
/// the dispatcher thread and the approval/watch background threads can
/// all reach the same memory store and configuration without a back
/// reference to the server itself.
pub struct AppState {
    pub root: PathBuf,
    pub memory: Arc<MemoryStore>,
    pub ignore: GitignoreFilter,
    pub scan: ScanConfig,
    pub git: GitCli,
    pub llm: LlmRouter,
    pub approval: Arc<fgd_approval::ApprovalProtocol>,
    pub cancel: Arc<AtomicBool>,
}

fn arg_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn register_builtin_tools(server: &mut McpServer, state: Arc<AppState>) {
    register_list_directory(server, state.clone());
    register_read_file(server, state.clone());
    register_write_file(server, state.clone());
    register_edit_file(server, state.clone());
    register_create_directory(server, state.clone());
    register_search_in_files(server, state.clone());
    register_git_diff(server, state.clone());
    register_git_commit(server, state.clone());
    register_git_log(server, state.clone());
    register_llm_query(server, state.clone());
    register_remember(server, state.clone());
    register_recall(server, state);
}

fn register_list_directory(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "list_directory".to_string(),
            description: "Lists entries in a directory relative to the watched root.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
            }),
        },
        move |args| {
            let path = arg_str(args, "path").unwrap_or(".");
            match fgd_fileops::list_directory(&state.root, path, &state.ignore) {
                Ok(listing) => ToolCallResult::text(
                    json!({
                        "path": listing.path,
                        "files": listing.files.iter().map(|e| json!({
                            "name": e.name,
                            "is_dir": e.is_dir,
                            "size": e.size,
                        })).collect::<Vec<_>>(),
                        "file_count": listing.file_count,
                        "filtered_hidden": listing.filtered_hidden,
                        "filtered_gitignore": listing.filtered_gitignore,
                        "total_entries": listing.total_entries,
                        "note": listing.note,
                    })
                    .to_string(),
                ),
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_read_file(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Reads a UTF-8 text file relative to the watched root.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "filepath": { "type": "string" } },
                "required": ["filepath"],
            }),
        },
        move |args| {
            let Some(filepath) = arg_str(args, "filepath") else {
                return ToolCallResult::error("Error: missing 'filepath' argument");
            };
            match fgd_fileops::read_file(&state.root, filepath, state.scan.max_file_size_kb) {
                Ok(outcome) => {
                    let _ = state.memory.push_context("file_read", filepath);
                    ToolCallResult::text(
                        json!({
                            "content": outcome.content,
                            "meta": {
                                "size_kb": outcome.size_kb,
                                "modified": outcome.modified.to_rfc3339(),
                                "lines": outcome.lines,
                            },
                        })
                        .to_string(),
                    )
                }
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_write_file(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "write_file".to_string(),
            description: "Creates or overwrites a file relative to the watched root.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["filepath", "content"],
            }),
        },
        move |args| {
            let (Some(filepath), Some(content)) =
                (arg_str(args, "filepath"), arg_str(args, "content"))
            else {
                return ToolCallResult::error("Error: missing 'filepath' or 'content' argument");
            };
            match fgd_fileops::write_file(&state.root, filepath, content) {
                Ok(outcome) => {
                    let _ = state.memory.push_context("file_write", filepath);
                    ToolCallResult::text(format!(
                        "✅ {filepath}, {} bytes{}",
                        outcome.bytes_written,
                        outcome
                            .backup
                            .map(|b| format!(", backup: {b}"))
                            .unwrap_or_default()
                    ))
                }
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_edit_file(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "edit_file".to_string(),
            description:
                "Replaces text in a file; without confirm=true, stages the edit for human approval instead of applying it."
                    .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "filepath": { "type": "string" },
                    "old_text": { "type": "string" },
                    "new_text": { "type": "string" },
                    "confirm": { "type": "boolean" },
                },
                "required": ["filepath", "old_text", "new_text"],
            }),
        },
        move |args| {
            let (Some(filepath), Some(old_text), Some(new_text)) = (
                arg_str(args, "filepath"),
                arg_str(args, "old_text"),
                arg_str(args, "new_text"),
            ) else {
                return ToolCallResult::error(
                    "Error: missing 'filepath', 'old_text', or 'new_text' argument",
                );
            };
            let confirm = args.get("confirm").and_then(Value::as_bool).unwrap_or(false);

            let preview = match fgd_fileops::preview_edit(&state.root, filepath, old_text, new_text)
            {
                Ok(preview) => preview,
                Err(err) => return ToolCallResult::error(err.as_tool_message()),
            };
            let ambiguity_note = (preview.occurrences > 1).then(|| {
                format!(
                    "old_text occurs {} times; only the first occurrence was replaced",
                    preview.occurrences
                )
            });

            if !confirm {
                let pending = PendingEdit {
                    filepath: filepath.to_string(),
                    old_text: old_text.to_string(),
                    new_text: new_text.to_string(),
                    diff: preview.diff.clone(),
                    preview: preview.preview.clone(),
                    timestamp: Utc::now(),
                };
                if let Err(err) = state.approval.stage(&pending) {
                    return ToolCallResult::error(format!("Error: {err}"));
                }
                return ToolCallResult::text(
                    json!({
                        "action": "confirm_edit",
                        "diff": preview.diff,
                        "preview": preview.preview,
                        "message": "pending approval",
                        "note": ambiguity_note,
                    })
                    .to_string(),
                );
            }

            match fgd_fileops::apply_edit(&state.root, filepath, &preview.updated_contents) {
                Ok(outcome) => {
                    let _ = state.memory.push_context("file_edit", filepath);
                    ToolCallResult::text(format!(
                        "✅ Applied edit to {filepath}{}{}",
                        outcome
                            .backup
                            .map(|b| format!(", backup: {b}"))
                            .unwrap_or_default(),
                        ambiguity_note.map(|n| format!(" ({n})")).unwrap_or_default()
                    ))
                }
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_create_directory(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "create_directory".to_string(),
            description: "Creates a directory (and any missing parents).".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        },
        move |args| {
            let Some(path) = arg_str(args, "path") else {
                return ToolCallResult::error("Error: missing 'path' argument");
            };
            match fgd_fileops::create_directory(&state.root, path) {
                Ok(()) => ToolCallResult::text(format!("created {path}")),
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_search_in_files(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "search_in_files".to_string(),
            description: "Case-insensitively searches text files under the watched root for a query, optionally restricted to a filename glob."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "pattern": { "type": "string" },
                },
                "required": ["query"],
            }),
        },
        move |args| {
            let Some(query) = arg_str(args, "query") else {
                return ToolCallResult::error("Error: missing 'query' argument");
            };
            let pattern = arg_str(args, "pattern").unwrap_or(DEFAULT_SEARCH_PATTERN);
            match fgd_fileops::search_in_files(
                &state.root,
                ".",
                query,
                pattern,
                &state.ignore,
                state.scan.max_files_per_scan,
                state.scan.max_dir_size_gb,
            ) {
                Ok(matches) => ToolCallResult::text(
                    json!({
                        "matches": matches.iter().map(|m| json!({
                            "path": m.path,
                            "line_number": m.line_number,
                            "line": m.line,
                        })).collect::<Vec<_>>(),
                    })
                    .to_string(),
                ),
                Err(err) => ToolCallResult::error(err.as_tool_message()),
            }
        },
    );
}

fn register_git_diff(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "git_diff".to_string(),
            description: "Shows the working-tree diff of the watched root's git repository."
                .to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        move |_args| match fgd_git::diff(&state.git, &state.root) {
            Ok(diff) => ToolCallResult::text(diff),
            Err(err) => ToolCallResult::error(format!("Error: {err}")),
        },
    );
}

fn register_git_commit(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "git_commit".to_string(),
            description: "Stages all changes and commits them in the watched root's git repository."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"],
            }),
        },
        move |args| {
            let Some(message) = arg_str(args, "message") else {
                return ToolCallResult::error("Error: missing 'message' argument");
            };
            match fgd_git::commit(&state.git, &state.root, message) {
                Ok(hash) => {
                    let _ = state.memory.remember("commits", &hash, message);
                    ToolCallResult::text(format!("Committed: {hash}"))
                }
                Err(err) => ToolCallResult::error(format!("Error: {err}")),
            }
        },
    );
}

fn register_git_log(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "git_log".to_string(),
            description: "Shows recent commits in the watched root's git repository.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "limit": { "type": "integer" } },
            }),
        },
        move |args| {
            let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10) as usize;
            match fgd_git::log(&state.git, &state.root, limit) {
                Ok(entries) => {
                    let rendered = entries
                        .iter()
                        .map(|e| format!("{} {}", e.hash, e.subject))
                        .collect::<Vec<_>>()
                        .join("\n");
                    ToolCallResult::text(rendered)
                }
                Err(err) => ToolCallResult::error(format!("Error: {err}")),
            }
        },
    );
}

fn register_llm_query(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "llm_query".to_string(),
            description: "Sends a prompt, with recent context, to a configured LLM provider."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": { "type": "string" },
                    "provider": { "type": "string" },
                },
                "required": ["prompt"],
            }),
        },
        move |args| {
            let Some(prompt) = arg_str(args, "prompt") else {
                return ToolCallResult::error("Error: missing 'prompt' argument");
            };
            let provider = arg_str(args, "provider");

            let context = state.memory.recent_context(5).unwrap_or_default();
            match state.llm.query(provider, prompt, &context) {
                Ok(result) => {
                    let chat_id = fgd_llm::new_chat_id();
                    let _ = state.memory.record_conversation(
                        &chat_id,
                        ConversationEntry {
                            id: chat_id.clone(),
                            provider: result.provider,
                            prompt: prompt.to_string(),
                            response: result.text.clone(),
                            context_used: result.context_used,
                            timestamp: Utc::now(),
                        },
                    );
                    ToolCallResult::text(result.text)
                }
                Err(err) => ToolCallResult::error(format!("Error: {err}")),
            }
        },
    );
}

fn register_remember(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "remember".to_string(),
            description: "Stores a categorized key/value fact in persistent memory.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "value": { "type": "string" },
                    "category": { "type": "string" },
                },
                "required": ["key", "value"],
            }),
        },
        move |args| {
            let (Some(key), Some(value)) = (arg_str(args, "key"), arg_str(args, "value")) else {
                return ToolCallResult::error("Error: missing 'key' or 'value' argument");
            };
            let category = arg_str(args, "category").unwrap_or(DEFAULT_CATEGORY);
            match state.memory.remember(category, key, value) {
                Ok(()) => ToolCallResult::text(format!("remembered {category}.{key}")),
                Err(err) => ToolCallResult::error(format!("Error: {err}")),
            }
        },
    );
}

fn register_recall(server: &mut McpServer, state: Arc<AppState>) {
    server.register_tool(
        ToolDefinition {
            name: "recall".to_string(),
            description: "Retrieves remembered facts: one value (key+category), a whole category, or everything remembered."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "key": { "type": "string" },
                    "category": { "type": "string" },
                },
            }),
        },
        move |args| {
            let key = arg_str(args, "key");
            let category = arg_str(args, "category");
            match state.memory.recall(category, key) {
                Ok(RecallOutcome::Value(Some(value))) => ToolCallResult::text(value),
                Ok(RecallOutcome::Value(None)) => ToolCallResult::error(format!(
                    "Error: no memory for {}.{}",
                    category.unwrap_or(DEFAULT_CATEGORY),
                    key.unwrap_or("")
                )),
                Ok(RecallOutcome::Category(bucket)) => {
                    ToolCallResult::text(json!(bucket).to_string())
                }
                Ok(RecallOutcome::All(all)) => ToolCallResult::text(json!(all).to_string()),
                Err(err) => ToolCallResult::error(format!("Error: {err}")),
            }
        },
    );
}
