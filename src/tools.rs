//! Tool model and registry.
//!
//! A tool is a named, schema-typed operation exposed to the LLM. Built-in
//! tools are native functions; dynamic tools come from user manifests on
//! disk; MCP-backed tools proxy a remote server. The registry is the single
//! process-wide name → tool mapping with a deterministic collision policy.

pub mod bash;
pub mod loader;

#[cfg(test)]
mod proptests;

pub use bash::BashTool;
pub use loader::{DynamicTool, LoadReport, ToolApi, ToolManifest};

use crate::mcp::McpManager;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// One typed part of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    Text { text: String },
    Image { mime_type: String },
    Resource { uri: String, text: Option<String> },
}

/// Result of executing a tool.
///
/// `is_error: true` is still a *successful* execution; it tells the LLM
/// the tool reported a problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            details: None,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            details: None,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Flat text rendering: image parts become `[Image: mime]`, resources
    /// show their URI plus inline text when present.
    pub fn rendered_text(&self) -> String {
        let mut out = String::new();
        for part in &self.content {
            if !out.is_empty() {
                out.push('\n');
            }
            match part {
                ToolContent::Text { text } => out.push_str(text),
                ToolContent::Image { mime_type } => {
                    out.push_str("[Image: ");
                    out.push_str(mime_type);
                    out.push(']');
                }
                ToolContent::Resource { uri, text } => {
                    out.push_str(uri);
                    if let Some(text) = text {
                        out.push('\n');
                        out.push_str(text);
                    }
                }
            }
        }
        out
    }
}

/// Definition handed to the LLM client.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Trait for native tools implemented in the host.
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn name(&self) -> &str;

    fn label(&self) -> String {
        self.name().to_string()
    }

    /// Tool description for the LLM.
    fn description(&self) -> String;

    /// JSON schema for tool input.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Long-running tools must watch the cancellation
    /// token and terminate their children when it trips.
    async fn run(&self, input: Value, cancel: CancellationToken) -> ToolResult;
}

/// Where a tool registration came from. Determines collision behavior and
/// bulk unregistration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ToolSource {
    Bundled,
    User,
    Project,
    /// Tools exposed by a connected MCP server, keyed by server name.
    Mcp(String),
}

enum ToolBackend {
    Builtin(Arc<dyn BuiltinTool>),
    Dynamic(DynamicTool),
    Mcp {
        manager: McpManager,
        server: String,
        remote_name: String,
    },
}

/// A registered tool: uniform metadata over one of the three backends.
pub struct RegisteredTool {
    pub name: String,
    pub label: String,
    pub description: String,
    pub parameters: Value,
    pub source: ToolSource,
    backend: ToolBackend,
}

impl RegisteredTool {
    pub fn builtin(tool: Arc<dyn BuiltinTool>, source: ToolSource) -> Self {
        Self {
            name: tool.name().to_string(),
            label: tool.label(),
            description: tool.description(),
            parameters: tool.input_schema(),
            source,
            backend: ToolBackend::Builtin(tool),
        }
    }

    pub fn dynamic(tool: DynamicTool, source: ToolSource) -> Self {
        Self {
            name: tool.name().to_string(),
            label: tool.label(),
            description: tool.description(),
            parameters: tool.input_schema(),
            source,
            backend: ToolBackend::Dynamic(tool),
        }
    }

    pub fn mcp(
        manager: McpManager,
        server: impl Into<String>,
        remote_name: impl Into<String>,
        description: String,
        parameters: Value,
    ) -> Self {
        let server = server.into();
        let remote_name = remote_name.into();
        Self {
            name: mcp_tool_name(&server, &remote_name),
            label: remote_name.clone(),
            description,
            parameters,
            source: ToolSource::Mcp(server.clone()),
            backend: ToolBackend::Mcp {
                manager,
                server,
                remote_name,
            },
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.parameters.clone(),
        }
    }

    async fn execute(
        &self,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<ToolResult, RegistryError> {
        match &self.backend {
            ToolBackend::Builtin(tool) => Ok(tool.run(input, cancel).await),
            ToolBackend::Dynamic(tool) => Ok(tool.run(input, cancel).await),
            ToolBackend::Mcp {
                manager,
                server,
                remote_name,
            } => Ok(manager.call_tool(server, remote_name, input, cancel).await?),
        }
    }
}

/// Synthesized registry name for a remote tool.
pub fn mcp_tool_name(server: &str, remote_name: &str) -> String {
    format!("mcp_{server}_{remote_name}")
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool '{name}' is already registered (from {existing:?})")]
    NameCollision { name: String, existing: ToolSource },
    #[error("tool '{0}' is not registered")]
    NotFound(String),
    /// Transport failure while calling a remote tool. A tool-level
    /// failure is *not* this; it comes back as `ToolResult.is_error`.
    #[error(transparent)]
    Mcp(#[from] crate::mcp::McpError),
}

/// Process-wide tool table. Cheap to clone; registrations serialize on an
/// internal lock, reads take a snapshot.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<Mutex<BTreeMap<String, Arc<RegisteredTool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A collision is rejected unless the earlier
    /// registration came from `Bundled`, which later sources may override.
    pub fn register(&self, tool: RegisteredTool) -> Result<(), RegistryError> {
        let mut tools = self.tools.lock().expect("registry lock");
        if let Some(existing) = tools.get(&tool.name) {
            if existing.source != ToolSource::Bundled {
                return Err(RegistryError::NameCollision {
                    name: tool.name.clone(),
                    existing: existing.source.clone(),
                });
            }
            tracing::debug!(tool = %tool.name, "overriding bundled tool");
        }
        tools.insert(tool.name.clone(), Arc::new(tool));
        Ok(())
    }

    /// Remove every tool registered from `source`. Returns how many.
    pub fn unregister_by_source(&self, source: &ToolSource) -> usize {
        let mut tools = self.tools.lock().expect("registry lock");
        let before = tools.len();
        tools.retain(|_, tool| tool.source != *source);
        before - tools.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.lock().expect("registry lock").get(name).cloned()
    }

    pub fn list(&self) -> Vec<Arc<RegisteredTool>> {
        self.tools
            .lock()
            .expect("registry lock")
            .values()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.tools.lock().expect("registry lock").clear();
    }

    /// All tool definitions for the LLM request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list().iter().map(|t| t.definition()).collect()
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        input: Value,
        cancel: CancellationToken,
    ) -> Result<ToolResult, RegistryError> {
        let tool = self
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        tool.execute(input, cancel).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .tools
            .lock()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
