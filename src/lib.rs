//! pi core — tool and agent runtime for the pi coding assistant.
//!
//! This crate is the non-interactive core: tool discovery and the
//! registry, the MCP client (stdio and streamable HTTP transports), the
//! process executor with spill-file truncation and process-tree kill,
//! the sub-agent dispatcher, the append-only context log, and the web
//! terminal mirror. The interactive host (TUI, LLM client, CLI parsing)
//! lives elsewhere and consumes these pieces.

pub mod context_log;
pub mod exec;
pub mod mcp;
pub mod paths;
pub mod subagents;
pub mod tools;
pub mod ui;
pub mod webterm;

pub use exec::{ExecInvocation, ExecOutcome, Executor};
pub use mcp::{McpManager, McpServerConfig};
pub use tools::{ToolRegistry, ToolResult};
