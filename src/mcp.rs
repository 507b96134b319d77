//! MCP (remote tool server) manager.
//!
//! Owns every connection: discovery of `.pi/mcp.json` configs, parallel
//! connect with per-server error isolation, the initialize handshake,
//! paginated tool listing, tool registration under `mcp_<server>_<tool>`
//! names, refresh, and disconnect. Tools never hold a connection — they
//! carry the server name and look the live connection up here on every
//! call.

pub mod config;
pub mod http;
pub mod protocol;
pub mod stdio;
pub mod transport;

pub use config::{load_server_configs, McpServerConfig, McpTransportKind};
pub use protocol::{McpToolDescriptor, ServerCapabilities, ServerInfo};
pub use transport::{Transport, TransportError};

use crate::tools::{RegisteredTool, ToolDefinition, ToolRegistry, ToolResult, ToolSource};
use config::ConfigError;
use futures::future::join_all;
use protocol::{
    initialize_params, tool_result_from_call, CallToolResult, InitializeResult, ListToolsResult,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use transport::CONNECT_TIMEOUT;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("invalid MCP config: {0}")]
    Validation(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("MCP server '{0}' is not connected")]
    NotConnected(String),
    #[error("connecting to '{0}' timed out")]
    ConnectTimeout(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("unexpected response from server: {0}")]
    Response(String),
}

/// A live server connection. Owned exclusively by the manager.
pub struct McpConnection {
    pub name: String,
    pub config: McpServerConfig,
    transport: Arc<dyn Transport>,
    pub server_info: Option<ServerInfo>,
    pub capabilities: ServerCapabilities,
    tools: tokio::sync::RwLock<Option<Vec<McpToolDescriptor>>>,
}

impl McpConnection {
    pub async fn cached_tools(&self) -> Option<Vec<McpToolDescriptor>> {
        self.tools.read().await.clone()
    }
}

/// Per-call progress callback for `connect_servers`.
pub type ConnectingFn = dyn Fn(&str) + Send + Sync;

/// Result of a `connect_servers` call: what connected and what failed.
/// Failures never abort sibling servers.
#[derive(Debug, Default)]
pub struct ConnectReport {
    pub connected: Vec<String>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Clone)]
pub struct McpManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    registry: ToolRegistry,
    connections: tokio::sync::RwLock<BTreeMap<String, Arc<McpConnection>>>,
}

impl McpManager {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                registry,
                connections: tokio::sync::RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Discover `.pi/mcp.json` configs for `cwd` and connect to them.
    ///
    /// `extra_env` overlays the process environment during `${VAR}`
    /// expansion. Config-file errors surface under the reserved `_config`
    /// key so they ride the same report as per-server failures.
    pub async fn connect_from_config(
        &self,
        cwd: &std::path::Path,
        extra_env: &std::collections::HashMap<String, String>,
        on_connecting: Option<&ConnectingFn>,
    ) -> ConnectReport {
        match load_server_configs(cwd, extra_env) {
            Ok(configs) => self.connect_servers(&configs, on_connecting).await,
            Err(e) => {
                let mut report = ConnectReport::default();
                report.errors.insert("_config".to_string(), e.to_string());
                report
            }
        }
    }

    /// Connect to every server in `configs` that is not already connected,
    /// in parallel. Each successful connection registers the server's
    /// tools; each failure lands in `errors` under the server name.
    pub async fn connect_servers(
        &self,
        configs: &BTreeMap<String, McpServerConfig>,
        on_connecting: Option<&ConnectingFn>,
    ) -> ConnectReport {
        let mut report = ConnectReport::default();
        let mut attempts = Vec::new();

        {
            let connections = self.inner.connections.read().await;
            for (name, config) in configs {
                if connections.contains_key(name) {
                    continue;
                }
                if let Err(message) = config.validate(name) {
                    report.errors.insert(name.clone(), message);
                    continue;
                }
                attempts.push((name.clone(), config.clone()));
            }
        }

        let results = join_all(attempts.into_iter().map(|(name, config)| async move {
            if let Some(on_connecting) = on_connecting {
                on_connecting(&name);
            }
            let result = self.connect_one(&name, config).await;
            (name, result)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(connection) => {
                    let tool_count = self.register_server_tools(&connection).await;
                    tracing::info!(server = %name, tools = tool_count, "MCP server connected");
                    self.inner
                        .connections
                        .write()
                        .await
                        .insert(name.clone(), connection);
                    report.connected.push(name);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "MCP server failed to connect");
                    report.errors.insert(name, e.to_string());
                }
            }
        }
        report
    }

    async fn connect_one(
        &self,
        name: &str,
        config: McpServerConfig,
    ) -> Result<Arc<McpConnection>, McpError> {
        let (transport, push_channel): (Arc<dyn Transport>, Option<Arc<http::HttpTransport>>) =
            match config.kind {
                McpTransportKind::Stdio => (
                    stdio::StdioTransport::spawn(
                        config.command.as_deref().unwrap_or_default(),
                        &config.args,
                        &config.env,
                    )?,
                    None,
                ),
                McpTransportKind::Http => (
                    http::HttpTransport::new(
                        config.url.as_deref().unwrap_or_default(),
                        &config.headers,
                    )?,
                    None,
                ),
                McpTransportKind::Sse => {
                    let transport = http::HttpTransport::new(
                        config.url.as_deref().unwrap_or_default(),
                        &config.headers,
                    )?;
                    (transport.clone(), Some(transport))
                }
            };

        {
            let server = name.to_string();
            transport.set_notification_handler(Arc::new(move |method, _params| {
                tracing::debug!(server = %server, method, "MCP notification");
            }));
        }
        {
            let server = name.to_string();
            transport.set_close_handler(Arc::new(move || {
                tracing::warn!(server = %server, "MCP transport closed");
            }));
        }

        // On any handshake failure the transport must be torn down, or
        // the spawned server would outlive the failed attempt.
        match Self::handshake(name, transport.as_ref(), push_channel.as_ref()).await {
            Ok((init, tools)) => Ok(Arc::new(McpConnection {
                name: name.to_string(),
                config,
                transport,
                server_info: init.server_info,
                capabilities: init.capabilities,
                tools: tokio::sync::RwLock::new(tools),
            })),
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        name: &str,
        transport: &dyn Transport,
        push_channel: Option<&Arc<http::HttpTransport>>,
    ) -> Result<(InitializeResult, Option<Vec<McpToolDescriptor>>), McpError> {
        let init = tokio::time::timeout(
            CONNECT_TIMEOUT,
            transport.request("initialize", initialize_params(), CancellationToken::new()),
        )
        .await
        .map_err(|_| McpError::ConnectTimeout(name.to_string()))??;

        let init: InitializeResult =
            serde_json::from_value(init).map_err(|e| McpError::Response(e.to_string()))?;

        transport
            .notify("notifications/initialized", json!({}))
            .await?;

        // Servers of type "sse" keep a push channel open for
        // server-initiated notifications.
        if let Some(http) = push_channel {
            match http.start_sse_listener().await {
                Ok(true) => tracing::debug!(server = %name, "SSE listener started"),
                Ok(false) => tracing::debug!(server = %name, "server does not support push"),
                Err(e) => tracing::warn!(server = %name, error = %e, "SSE listener failed"),
            }
        }

        let tools = if init.capabilities.supports_tools() {
            Some(list_tools(transport).await?)
        } else {
            tracing::info!(server = %name, "server does not advertise tools");
            None
        };
        Ok((init, tools))
    }

    /// Register every cached tool of `connection`; returns how many made
    /// it into the registry.
    async fn register_server_tools(&self, connection: &Arc<McpConnection>) -> usize {
        let Some(descriptors) = connection.cached_tools().await else {
            return 0;
        };
        let mut registered = 0;
        for descriptor in descriptors {
            let tool = RegisteredTool::mcp(
                self.clone(),
                &connection.name,
                &descriptor.name,
                descriptor.description.clone().unwrap_or_default(),
                descriptor
                    .input_schema
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            );
            match self.inner.registry.register(tool) {
                Ok(()) => registered += 1,
                Err(e) => {
                    tracing::warn!(server = %connection.name, tool = %descriptor.name, error = %e,
                        "skipping remote tool");
                }
            }
        }
        registered
    }

    /// Close one server and drop every `mcp_<name>_*` tool.
    pub async fn disconnect_server(&self, name: &str) -> Result<(), McpError> {
        let connection = self
            .inner
            .connections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::NotConnected(name.to_string()))?;
        connection.transport.close().await;
        let removed = self
            .inner
            .registry
            .unregister_by_source(&ToolSource::Mcp(name.to_string()));
        tracing::info!(server = %name, tools_removed = removed, "MCP server disconnected");
        Ok(())
    }

    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        for name in names {
            let _ = self.disconnect_server(&name).await;
        }
    }

    /// Invalidate the cached tool list and re-list from the server,
    /// replacing the registered tools.
    pub async fn refresh_server_tools(&self, name: &str) -> Result<usize, McpError> {
        let connection = self
            .get_connection(name)
            .await
            .ok_or_else(|| McpError::NotConnected(name.to_string()))?;

        *connection.tools.write().await = None;
        self.inner
            .registry
            .unregister_by_source(&ToolSource::Mcp(name.to_string()));

        if !connection.capabilities.supports_tools() {
            return Ok(0);
        }

        let listed = list_tools(connection.transport.as_ref()).await?;
        *connection.tools.write().await = Some(listed);
        Ok(self.register_server_tools(&connection).await)
    }

    pub async fn refresh_all_tools(&self) -> BTreeMap<String, Result<usize, McpError>> {
        let names: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        let mut results = BTreeMap::new();
        for name in names {
            let result = self.refresh_server_tools(&name).await;
            results.insert(name, result);
        }
        results
    }

    /// Definitions of every registered remote tool.
    pub fn get_tools(&self) -> Vec<ToolDefinition> {
        self.inner
            .registry
            .list()
            .iter()
            .filter(|t| matches!(t.source, ToolSource::Mcp(_)))
            .map(|t| t.definition())
            .collect()
    }

    pub async fn get_connection(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.inner.connections.read().await.get(name).cloned()
    }

    pub async fn get_connected_servers(&self) -> Vec<String> {
        self.inner.connections.read().await.keys().cloned().collect()
    }

    /// Reverse a synthesized `mcp_<server>_<tool>` name against the live
    /// connection set. Longest server name wins for names with
    /// underscores.
    pub async fn parse_tool_name(&self, tool_name: &str) -> Option<(String, String)> {
        let rest = tool_name.strip_prefix("mcp_")?;
        let connections = self.inner.connections.read().await;
        let mut names: Vec<&String> = connections.keys().collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        for name in names {
            if let Some(remote) = rest.strip_prefix(&format!("{name}_")) {
                return Some((name.clone(), remote.to_string()));
            }
        }
        None
    }

    /// Call a remote tool. A failing call is a successful execution with
    /// `is_error: true`; a missing connection is a tool-result error;
    /// transport failures are real errors.
    pub async fn call_tool(
        &self,
        server: &str,
        remote_name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<ToolResult, McpError> {
        let Some(connection) = self.get_connection(server).await else {
            return Ok(ToolResult::error(format!(
                "MCP server '{server}' is not connected"
            )));
        };
        if !connection.capabilities.supports_tools() {
            return Ok(ToolResult::error(format!(
                "MCP server '{server}' does not expose tools"
            )));
        }

        let params = json!({"name": remote_name, "arguments": arguments});
        match connection
            .transport
            .request("tools/call", params, cancel)
            .await
        {
            Ok(value) => {
                let call: CallToolResult =
                    serde_json::from_value(value).map_err(|e| McpError::Response(e.to_string()))?;
                Ok(tool_result_from_call(call))
            }
            // A JSON-RPC error body is the server reporting a failed call.
            Err(TransportError::Rpc { code, message }) => Ok(ToolResult::error(format!(
                "server error {code}: {message}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Drain `tools/list` pages in order until the cursor runs out.
async fn list_tools(transport: &dyn Transport) -> Result<Vec<McpToolDescriptor>, McpError> {
    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let params = match &cursor {
            Some(cursor) => json!({"cursor": cursor}),
            None => json!({}),
        };
        let value = transport
            .request("tools/list", params, CancellationToken::new())
            .await?;
        let page: ListToolsResult =
            serde_json::from_value(value).map_err(|e| McpError::Response(e.to_string()))?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok(tools)
}
