//! Dynamic tool discovery and loading.
//!
//! A dynamic tool lives in a directory named for it containing a
//! `tool.yaml` manifest: metadata, a JSON-schema parameter block, and a
//! shell command run through the process executor with the tool input in
//! `PI_TOOL_INPUT`. Discovery walks the global config tree, the project
//! tree, installed plugins, and any explicit paths, collecting per-path
//! errors without aborting the walk.

use super::{RegisteredTool, ToolRegistry, ToolResult, ToolSource};
use crate::exec::{exec_program, ExecError, ExecInvocation, ExecOutcome, Executor};
use crate::paths::{agent_config_dir, plugins_dir};
use crate::ui::{UiContext, UiError, UserInterface};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const MANIFEST_FILE: &str = "tool.yaml";
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Shared API handed to every dynamic tool: the working directory, the
/// executor shim, and the swappable UI handle.
#[derive(Clone, Debug)]
pub struct ToolApi {
    pub cwd: PathBuf,
    pub executor: Executor,
    pub ui: UiContext,
}

impl ToolApi {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            executor: Executor::new(),
            ui: UiContext::new(),
        }
    }

    /// Inject or revoke the UI after load (headless ↔ interactive).
    pub fn set_ui_context(&self, ui: Option<Arc<dyn UserInterface>>) {
        self.ui.set_ui(ui);
    }

    /// Run a program directly (not through the shell), in the tool cwd.
    pub async fn exec(
        &self,
        program: impl AsRef<Path>,
        args: &[String],
        cancel: CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<ExecOutcome, ExecError> {
        exec_program(program, args, &self.cwd, &[], cancel, timeout).await
    }
}

/// One `tool.yaml` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    pub description: String,
    /// JSON schema for the tool input, written as YAML.
    #[serde(default)]
    pub parameters: Option<serde_yaml::Value>,
    /// Shell command; receives the input JSON in `PI_TOOL_INPUT`.
    pub command: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Ask the user before running. Fails recoverably when headless.
    #[serde(default)]
    pub confirm: bool,
}

/// A manifest file either defines one tool or an ordered sequence.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestFile {
    Many { tools: Vec<ToolManifest> },
    One(ToolManifest),
}

/// A loaded dynamic tool, executed through the process executor.
#[derive(Clone)]
pub struct DynamicTool {
    manifest: ToolManifest,
    dir: PathBuf,
    api: ToolApi,
}

impl DynamicTool {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn label(&self) -> String {
        self.manifest
            .label
            .clone()
            .unwrap_or_else(|| self.manifest.name.clone())
    }

    pub fn description(&self) -> String {
        self.manifest.description.clone()
    }

    pub fn input_schema(&self) -> Value {
        self.manifest
            .parameters
            .as_ref()
            .and_then(|p| serde_json::to_value(p).ok())
            .unwrap_or_else(|| json!({"type": "object", "properties": {}}))
    }

    pub async fn run(&self, input: Value, cancel: CancellationToken) -> ToolResult {
        if self.manifest.confirm {
            match self.api.ui.confirm(&format!("Run tool '{}'?", self.name())).await {
                Ok(true) => {}
                Ok(false) => return ToolResult::error("user declined to run the tool"),
                Err(UiError::Unavailable) => {
                    return ToolResult::error(format!(
                        "tool '{}' requires confirmation but no UI is attached",
                        self.name()
                    ));
                }
                Err(e) => return ToolResult::error(e.to_string()),
            }
        }

        let timeout = self
            .manifest
            .timeout_ms
            .map_or(DEFAULT_TOOL_TIMEOUT, Duration::from_millis);
        let invocation = ExecInvocation::new(&self.manifest.command, &self.api.cwd)
            .timeout(timeout)
            .cancel_token(cancel)
            .env("PI_TOOL_INPUT", input.to_string())
            .env("PI_TOOL_DIR", self.dir.display().to_string());

        match self.api.executor.run(invocation).await {
            Ok(outcome) => {
                let mut details = json!({"exit_code": outcome.exit_code});
                if let Some(path) = &outcome.full_output_path {
                    details["full_output_path"] = json!(path.display().to_string());
                }
                if outcome.cancelled {
                    ToolResult::error("tool execution cancelled").with_details(details)
                } else if outcome.timed_out {
                    ToolResult::error(format!("tool timed out after {timeout:?}"))
                        .with_details(details)
                } else if outcome.exit_code == 0 {
                    ToolResult::text(outcome.output).with_details(details)
                } else {
                    ToolResult {
                        content: vec![super::ToolContent::Text {
                            text: format!(
                                "[command failed: exit code {}]\n{}",
                                outcome.exit_code, outcome.output
                            ),
                        }],
                        details: Some(details),
                        is_error: true,
                    }
                }
            }
            Err(e) => ToolResult::error(e.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct LoadError {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a discovery walk: what loaded and what did not.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub errors: Vec<LoadError>,
}

impl ToolRegistry {
    /// Walk all dynamic tool locations and register what parses.
    ///
    /// Order: global config tools, project tools, installed plugins,
    /// explicit paths. Identical canonical paths load once. Names that
    /// collide with built-ins are rejected; later dynamic/dynamic
    /// collisions are rejected with a descriptive error.
    pub fn discover_and_load(
        &self,
        cwd: &Path,
        built_in_names: &[String],
        api: &ToolApi,
        explicit_paths: &[PathBuf],
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();

        let mut roots: Vec<(PathBuf, ToolSource)> = vec![
            (agent_config_dir().join("tools"), ToolSource::User),
            (cwd.join(".pi/tools"), ToolSource::Project),
        ];
        if let Ok(plugins) = std::fs::read_dir(plugins_dir()) {
            for plugin in plugins.flatten() {
                roots.push((plugin.path().join("tools"), ToolSource::User));
            }
        }

        for (root, source) in roots {
            let Ok(entries) = std::fs::read_dir(&root) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    self.load_tool_dir(
                        &entry.path(),
                        source.clone(),
                        built_in_names,
                        api,
                        &mut seen,
                        &mut report,
                    );
                }
            }
        }

        for path in explicit_paths {
            self.load_tool_dir(
                path,
                ToolSource::User,
                built_in_names,
                api,
                &mut seen,
                &mut report,
            );
        }

        report
    }

    fn load_tool_dir(
        &self,
        dir: &Path,
        source: ToolSource,
        built_in_names: &[String],
        api: &ToolApi,
        seen: &mut HashSet<PathBuf>,
        report: &mut LoadReport,
    ) {
        let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        if !seen.insert(canonical) {
            return;
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifests = match read_manifests(&manifest_path, dir) {
            Ok(manifests) => manifests,
            Err(message) => {
                report.errors.push(LoadError {
                    path: manifest_path,
                    message,
                });
                return;
            }
        };

        for manifest in manifests {
            let name = manifest.name.clone();
            if built_in_names.contains(&name) {
                report.errors.push(LoadError {
                    path: manifest_path.clone(),
                    message: format!("tool '{name}' conflicts with a built-in tool"),
                });
                continue;
            }
            let tool = DynamicTool {
                manifest,
                dir: dir.to_path_buf(),
                api: api.clone(),
            };
            match self.register(RegisteredTool::dynamic(tool, source.clone())) {
                Ok(()) => {
                    tracing::debug!(tool = %name, path = %dir.display(), "loaded dynamic tool");
                    report.loaded.push(name);
                }
                Err(e) => report.errors.push(LoadError {
                    path: manifest_path.clone(),
                    message: e.to_string(),
                }),
            }
        }
    }
}

fn read_manifests(manifest_path: &Path, dir: &Path) -> Result<Vec<ToolManifest>, String> {
    let text = std::fs::read_to_string(manifest_path)
        .map_err(|e| format!("failed to read manifest: {e}"))?;
    let file: ManifestFile =
        serde_yaml::from_str(&text).map_err(|e| format!("failed to parse manifest: {e}"))?;

    match file {
        ManifestFile::One(manifest) => {
            // A single-tool directory must be named for its tool.
            let dir_name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if manifest.name != dir_name {
                return Err(format!(
                    "tool '{}' must live in a directory named for it (found '{dir_name}')",
                    manifest.name
                ));
            }
            Ok(vec![manifest])
        }
        ManifestFile::Many { tools } => Ok(tools),
    }
}
