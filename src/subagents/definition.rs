//! Agent definitions: Markdown files with YAML front-matter.
//!
//! Discovery precedence is project > user > bundled; within a level a
//! `.pi/agents` tree overrides a `.claude/agents` tree. Definitions are
//! immutable once loaded.

use crate::paths::agent_config_dir;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSource {
    Bundled,
    User,
    Project,
}

/// Which definition levels a dispatch call searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentScope {
    User,
    Project,
    Both,
}

#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// Restricted tool set; `None` means the full set.
    pub tools: Option<Vec<String>>,
    pub model: Option<String>,
    /// Whether this agent may itself spawn sub-agents.
    pub recursive: bool,
    pub source: AgentSource,
    pub file_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    name: String,
    description: String,
    #[serde(default)]
    tools: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    recursive: bool,
}

/// Parse one agent Markdown file. The body after the front-matter is the
/// system prompt.
pub fn parse_agent_file(path: &Path, source: AgentSource) -> Result<AgentDefinition, String> {
    let text =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let (front, body) = split_front_matter(&text)
        .ok_or_else(|| format!("{}: missing YAML front-matter", path.display()))?;
    let front: FrontMatter =
        serde_yaml::from_str(front).map_err(|e| format!("{}: {e}", path.display()))?;

    Ok(AgentDefinition {
        name: front.name,
        description: front.description,
        system_prompt: body.trim().to_string(),
        tools: front.tools.map(|t| {
            t.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
        model: front.model,
        recursive: front.recursive,
        source,
        file_path: path.to_path_buf(),
    })
}

fn split_front_matter(text: &str) -> Option<(&str, &str)> {
    let rest = text.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n"))?;
    let end = rest.find("\n---")?;
    let front = &rest[..end];
    let body = rest[end + 4..].trim_start_matches('-');
    Some((front, body))
}

/// Discover agent definitions for `scope`, later levels overriding
/// earlier ones by name.
pub fn discover_agents(
    cwd: &Path,
    scope: AgentScope,
    bundled: &[AgentDefinition],
) -> BTreeMap<String, AgentDefinition> {
    let mut roots: Vec<(PathBuf, AgentSource)> = Vec::new();

    if matches!(scope, AgentScope::User | AgentScope::Both) {
        if let Some(home) = std::env::var_os("HOME").map(PathBuf::from) {
            roots.push((home.join(".claude/agents"), AgentSource::User));
        }
        roots.push((agent_config_dir().join("agents"), AgentSource::User));
    }
    if matches!(scope, AgentScope::Project | AgentScope::Both) {
        roots.push((cwd.join(".claude/agents"), AgentSource::Project));
        roots.push((cwd.join(".pi/agents"), AgentSource::Project));
    }

    discover_in_roots(&roots, bundled)
}

/// Shared walk over an ordered root list; later roots win by name.
pub(crate) fn discover_in_roots(
    roots: &[(PathBuf, AgentSource)],
    bundled: &[AgentDefinition],
) -> BTreeMap<String, AgentDefinition> {
    let mut agents: BTreeMap<String, AgentDefinition> = BTreeMap::new();
    for agent in bundled {
        agents.insert(agent.name.clone(), agent.clone());
    }

    for (root, source) in roots {
        let Ok(entries) = std::fs::read_dir(root) else {
            continue;
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "md"))
            .collect();
        paths.sort();
        for path in paths {
            match parse_agent_file(&path, *source) {
                Ok(agent) => {
                    agents.insert(agent.name.clone(), agent);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed agent definition");
                }
            }
        }
    }
    agents
}
