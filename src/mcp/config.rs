//! MCP server configuration: `.pi/mcp.json` discovery, merge, and
//! environment expansion.
//!
//! The user-level file and the project-level file are merged with the
//! project winning per server name. String values support `${VAR}` and
//! `${VAR:-default}`, applied recursively through arrays and objects.

use crate::paths::agent_config_dir;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

pub const MCP_CONFIG_FILE: &str = ".pi/mcp.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    #[default]
    Stdio,
    Http,
    Sse,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct McpServerConfig {
    #[serde(rename = "type", default)]
    pub kind: McpTransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl McpServerConfig {
    /// Structural validation, applied before any connect attempt.
    pub fn validate(&self, name: &str) -> Result<(), String> {
        match self.kind {
            McpTransportKind::Stdio => {
                if self.command.as_deref().unwrap_or("").is_empty() {
                    return Err(format!("server '{name}': stdio type requires a command"));
                }
            }
            McpTransportKind::Http | McpTransportKind::Sse => {
                if self.url.as_deref().unwrap_or("").is_empty() {
                    return Err(format!("server '{name}': http/sse type requires a url"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct McpConfigFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, Value>,
}

/// Load and merge the user- and project-level config files.
///
/// `extra_env` overlays the process environment for `${VAR}` expansion.
/// Missing files are fine; unreadable or unparsable files are errors.
pub fn load_server_configs(
    cwd: &Path,
    extra_env: &HashMap<String, String>,
) -> Result<BTreeMap<String, McpServerConfig>, ConfigError> {
    load_config_files(
        &[agent_config_dir().join("mcp.json"), cwd.join(MCP_CONFIG_FILE)],
        extra_env,
    )
}

/// Merge an ordered list of config files; later files override per server.
pub fn load_config_files(
    paths: &[std::path::PathBuf],
    extra_env: &HashMap<String, String>,
) -> Result<BTreeMap<String, McpServerConfig>, ConfigError> {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();

    for path in paths {
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: McpConfigFile =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                source: e,
            })?;
        // Later files override whole server entries by name.
        merged.extend(file.mcp_servers);
    }

    let mut configs = BTreeMap::new();
    for (name, raw) in merged {
        let expanded = expand_env_value(raw, extra_env);
        match serde_json::from_value::<McpServerConfig>(expanded) {
            Ok(config) => {
                configs.insert(name, config);
            }
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "skipping malformed server entry");
            }
        }
    }
    Ok(configs)
}

fn expansion_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("valid regex")
    })
}

/// Expand `${VAR}` / `${VAR:-default}` in a string against `extra_env`
/// overlaying the process environment. Unset variables without a default
/// expand to the empty string.
pub fn expand_env_str(input: &str, extra_env: &HashMap<String, String>) -> String {
    expansion_pattern()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let var = &caps[1];
            if let Some(value) = extra_env.get(var) {
                return value.clone();
            }
            if let Ok(value) = std::env::var(var) {
                return value;
            }
            caps.get(2).map_or(String::new(), |d| d.as_str().to_string())
        })
        .into_owned()
}

/// Recursive expansion across strings, arrays, and objects.
pub fn expand_env_value(value: Value, extra_env: &HashMap<String, String>) -> Value {
    match value {
        Value::String(s) => Value::String(expand_env_str(&s, extra_env)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| expand_env_value(v, extra_env))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_env_value(v, extra_env)))
                .collect(),
        ),
        other => other,
    }
}
