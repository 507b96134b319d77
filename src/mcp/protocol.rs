//! JSON-RPC 2.0 envelope and MCP payload types.
//!
//! Only the client side of `initialize`, `notifications/initialized`,
//! `tools/list`, and `tools/call` is modeled; everything else a server
//! sends is routed to the notification handler or ignored.

use crate::tools::{ToolContent, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Any single incoming JSON-RPC message: response, notification, or
/// server-initiated request.
#[derive(Debug, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorBody>,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcMessage {
    /// Numeric response id, when this is a response to one of our requests.
    pub fn response_id(&self) -> Option<i64> {
        if self.result.is_none() && self.error.is_none() {
            return None;
        }
        self.id.as_ref().and_then(Value::as_i64)
    }

    pub fn is_notification(&self) -> bool {
        self.method.is_some() && self.id.is_none()
    }
}

// ---------------------------------------------------------------------------
// MCP payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Feature flags advertised by the server. The values are opaque option
/// objects; presence is what matters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
}

impl ServerCapabilities {
    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Client half of the `initialize` handshake.
pub fn initialize_params() -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": {} },
        "clientInfo": {
            "name": "pi",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ListToolsResult {
    #[serde(default)]
    pub tools: Vec<McpToolDescriptor>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<McpContent>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum McpContent {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "mimeType", default)]
        mime_type: Option<String>,
    },
    Resource {
        resource: McpResource,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpResource {
    pub uri: String,
    #[serde(default)]
    pub text: Option<String>,
}

/// Convert a `tools/call` result into the runtime's [`ToolResult`].
///
/// Adjacent text parts merge into one block; images become `[Image: mime]`
/// references; resources keep their URI plus inline text when present.
pub fn tool_result_from_call(result: CallToolResult) -> ToolResult {
    let mut content = Vec::new();
    let mut text_block = String::new();

    for part in result.content {
        match part {
            McpContent::Text { text } => {
                if !text_block.is_empty() {
                    text_block.push('\n');
                }
                text_block.push_str(&text);
            }
            McpContent::Image { mime_type } => {
                flush_text(&mut text_block, &mut content);
                content.push(ToolContent::Image {
                    mime_type: mime_type.unwrap_or_else(|| "image".to_string()),
                });
            }
            McpContent::Resource { resource } => {
                flush_text(&mut text_block, &mut content);
                content.push(ToolContent::Resource {
                    uri: resource.uri,
                    text: resource.text,
                });
            }
            McpContent::Unknown => {}
        }
    }
    flush_text(&mut text_block, &mut content);

    ToolResult {
        content,
        details: None,
        is_error: result.is_error,
    }
}

fn flush_text(block: &mut String, content: &mut Vec<ToolContent>) {
    if !block.is_empty() {
        content.push(ToolContent::Text {
            text: std::mem::take(block),
        });
    }
}
