//! Bundled bash tool: shell commands through the process executor.
//!
//! The one built-in every configuration ships with. Streaming, spill
//! files, timeouts, and kill semantics all come from the executor, so a
//! cancelled LLM turn tears down the whole process tree.

use super::{BuiltinTool, ToolContent, ToolResult};
use crate::exec::{ExecInvocation, Executor, TruncationKind};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SLOW_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Execution mode selected by the model.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum ExecutionMode {
    #[default]
    Default,
    Slow,
}

#[derive(Debug, Deserialize)]
struct BashInput {
    command: String,
    #[serde(default)]
    mode: ExecutionMode,
}

pub struct BashTool {
    working_dir: PathBuf,
    executor: Executor,
}

impl BashTool {
    pub fn new(working_dir: PathBuf, executor: Executor) -> Self {
        Self {
            working_dir,
            executor,
        }
    }
}

#[async_trait]
impl BuiltinTool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> String {
        format!(
            r#"Executes shell commands, returning combined stdout/stderr.
Shell state (working dir, variables, aliases) does not persist between calls.

Use mode="slow" for potentially slow commands: builds, downloads,
installs, tests, or any other substantive operation.

Output is tail-truncated; when a command produces more than the budget,
the full output is available at the reported file path.

<pwd>{}</pwd>"#,
            self.working_dir.display()
        )
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                },
                "mode": {
                    "type": "string",
                    "enum": ["default", "slow"],
                    "description": "Execution mode: default (30s timeout) or slow (15min timeout)"
                }
            }
        })
    }

    async fn run(&self, input: Value, cancel: CancellationToken) -> ToolResult {
        let input: BashInput = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => return ToolResult::error(format!("Invalid input: {e}")),
        };
        if input.command.is_empty() {
            return ToolResult::error("Command cannot be empty");
        }

        let timeout = match input.mode {
            ExecutionMode::Default => DEFAULT_TIMEOUT,
            ExecutionMode::Slow => SLOW_TIMEOUT,
        };
        let invocation = ExecInvocation::new(&input.command, &self.working_dir)
            .timeout(timeout)
            .cancel_token(cancel);

        let outcome = match self.executor.run(invocation).await {
            Ok(outcome) => outcome,
            Err(e) => return ToolResult::error(e.to_string()),
        };

        let mut details = json!({
            "exit_code": outcome.exit_code,
            "total_bytes": outcome.total_bytes,
            "total_lines": outcome.total_lines,
        });
        if let Some(path) = &outcome.full_output_path {
            details["full_output_path"] = json!(path.display().to_string());
        }

        let mut text = outcome.output;
        match outcome.truncation {
            Some(TruncationKind::Bytes) => {
                text = format!(
                    "[output truncated: showing the last {} of {} bytes]\n{text}",
                    text.len(),
                    outcome.total_bytes
                );
            }
            Some(TruncationKind::Lines) => {
                text = format!(
                    "[output truncated: showing the last {} of {} lines]\n{text}",
                    text.lines().count(),
                    outcome.total_lines
                );
            }
            None => {}
        }

        if outcome.cancelled {
            ToolResult::error("[command cancelled]").with_details(details)
        } else if outcome.timed_out {
            ToolResult::error(format!("[command timed out after {timeout:?}]\n{text}"))
                .with_details(details)
        } else if outcome.exit_code == 0 {
            ToolResult {
                content: vec![ToolContent::Text { text }],
                details: Some(details),
                is_error: false,
            }
        } else {
            ToolResult {
                content: vec![ToolContent::Text {
                    text: format!("[command failed: exit code {}]\n{text}", outcome.exit_code),
                }],
                details: Some(details),
                is_error: true,
            }
        }
    }
}
