use std::collections::HashMap;
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> ToolCallResult {
        ToolCallResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> ToolCallResult {
        ToolCallResult {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: true,
        }
    }
}

pub type ToolHandler = dyn Fn(&Value) -> ToolCallResult;

/// A stdio JSON-RPC MCP server: one `tools/list` catalogue plus a handler
/// table keyed by tool name, dispatched through `tools/call`.
pub struct McpServer {
    info: ServerInfo,
    tools: Vec<ToolDefinition>,
    tool_handlers: HashMap<String, Box<ToolHandler>>,
    initialized: bool,
}

impl McpServer {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> McpServer {
        McpServer {
            info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
            tools: Vec::new(),
            tool_handlers: HashMap::new(),
            initialized: false,
        }
    }

    pub fn register_tool<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&Value) -> ToolCallResult + 'static,
    {
        self.tools.retain(|existing| existing.name != definition.name);
        self.tool_handlers
            .insert(definition.name.clone(), Box::new(handler));
        self.tools.push(definition);
    }

    pub fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let is_notification = request.id.is_none();
        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request)),
            "initialized" | "notifications/initialized" => None,
            "tools/list" => Some(self.handle_tools_list(request)),
            "tools/call" => Some(self.handle_tools_call(request)),
            _ if is_notification => None,
            _ => Some(error_response(
                request.id,
                METHOD_NOT_FOUND,
                format!("method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        self.initialized = true;
        success_response(
            request.id,
            json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": self.info,
                "capabilities": ServerCapabilities {
                    tools: ToolsCapability { list_changed: false },
                },
            }),
        )
    }

    fn handle_tools_list(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return error_response(request.id, INVALID_REQUEST, "server not initialized".into());
        }
        success_response(request.id, json!({ "tools": self.tools }))
    }

    fn handle_tools_call(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.initialized {
            return error_response(request.id, INVALID_REQUEST, "server not initialized".into());
        }
        let Some(params) = request.params else {
            return error_response(request.id, INVALID_PARAMS, "missing params".into());
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(request.id, INVALID_PARAMS, "missing tool name".into());
        };
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        let result = match self.tool_handlers.get(name) {
            Some(handler) => handler(&arguments),
            None => ToolCallResult::error(format!("Error: unknown tool '{name}'")),
        };

        match serde_json::to_value(&result) {
            Ok(value) => success_response(request.id, value),
            Err(err) => error_response(request.id, INTERNAL_ERROR, err.to_string()),
        }
    }

    /// Reads newline-framed JSON-RPC requests from stdin, dispatches each,
    /// and writes newline-framed responses to stdout. The sole transport
    /// this server supports.
    pub fn run_stdio(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        for line in stdin.lock().lines() {
            let line = line?;
            if let Some(response) = self.process_line(&line) {
                stdout.write_all(response.as_bytes())?;
                stdout.write_all(b"\n")?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    pub fn process_line(&mut self, line: &str) -> Option<String> {
        if line.trim().is_empty() {
            return None;
        }
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                let response = error_response(None, PARSE_ERROR, err.to_string());
                return Some(serde_json::to_string(&response).unwrap_or_default());
            }
        };
        self.handle_request(request)
            .map(|response| serde_json::to_string(&response).unwrap_or_default())
    }
}

fn success_response(id: Option<Value>, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: Some(result),
        error: None,
    }
}

fn error_response(id: Option<Value>, code: i64, message: String) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(JsonRpcError {
            code,
            message,
            data: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_server() -> McpServer {
        let mut server = McpServer::new("fgd-server", "0.1.0");
        server.register_tool(
            ToolDefinition {
                name: "echo".to_string(),
                description: "echoes its input".to_string(),
                input_schema: json!({"type": "object"}),
            },
            |args| ToolCallResult::text(args.to_string()),
        );
        server
    }

    fn initialize(server: &mut McpServer) {
        server.process_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#);
    }

    #[test]
    fn tools_list_is_rejected_before_initialize() {
        let mut server = make_server();
        let response = server
            .process_line(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#)
            .unwrap();
        assert!(response.contains("not initialized"));
    }

    #[test]
    fn tools_list_after_initialize_includes_registered_tool() {
        let mut server = make_server();
        initialize(&mut server);
        let response = server
            .process_line(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .unwrap();
        assert!(response.contains("\"echo\""));
    }

    #[test]
    fn tools_call_dispatches_to_registered_handler() {
        let mut server = make_server();
        initialize(&mut server);
        let response = server
            .process_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"x":1}}}"#,
            )
            .unwrap();
        assert!(response.contains("\"x\":1"));
    }

    #[test]
    fn unknown_tool_name_yields_uniform_error_envelope() {
        let mut server = make_server();
        initialize(&mut server);
        let response = server
            .process_line(
                r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope","arguments":{}}}"#,
            )
            .unwrap();
        assert!(response.contains("Error: unknown tool 'nope'"));
        assert!(response.contains("\"isError\":true"));
    }

    #[test]
    fn malformed_json_is_a_parse_error_response() {
        let mut server = make_server();
        let response = server.process_line("not json").unwrap();
        assert!(response.contains(&PARSE_ERROR.to_string()));
    }

    #[test]
    fn notifications_produce_no_response() {
        let mut server = make_server();
        let response = server.process_line(r#"{"jsonrpc":"2.0","method":"initialized"}"#);
        assert!(response.is_none());
    }

    #[test]
    fn blank_lines_produce_no_response() {
        let mut server = make_server();
        assert!(server.process_line("   ").is_none());
    }

    #[test]
    fn unknown_method_with_an_id_is_method_not_found() {
        let mut server = make_server();
        let response = server
            .process_line(r#"{"jsonrpc":"2.0","id":9,"method":"bogus/method"}"#)
            .unwrap();
        assert!(response.contains(&METHOD_NOT_FOUND.to_string()));
    }

    #[test]
    fn re_registering_a_tool_name_replaces_rather_than_duplicates() {
        let mut server = make_server();
        server.register_tool(
            ToolDefinition {
                name: "echo".to_string(),
                description: "replacement".to_string(),
                input_schema: json!({"type": "object"}),
            },
            |_| ToolCallResult::text("replaced"),
        );
        assert_eq!(server.tools.len(), 1);
        assert_eq!(server.tools[0].description, "replacement");
    }
}
