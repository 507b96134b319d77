//! Sub-agent dispatcher: fan out tasks to isolated child agent processes.
//!
//! Each task runs a fresh child agent (the host binary, injectable for
//! tests) with its own context; the dispatcher enforces the concurrency
//! cap, parses streamed JSON progress events, persists artifacts, blocks
//! runaway recursion, and returns results in input order.

pub mod definition;

pub use definition::{AgentDefinition, AgentScope, AgentSource};

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Environment flag that forbids spawning further sub-agents.
pub const NO_SUBAGENTS_ENV: &str = "PI_NO_SUBAGENTS";

/// Hard cap on tasks in one batch; larger requests fail fast.
pub const MAX_PARALLEL_TASKS: usize = 32;
/// How many children run at once; the rest queue FIFO.
pub const MAX_CONCURRENCY: usize = 16;

const RECENT_TOOLS_KEPT: usize = 5;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("batch of {0} tasks exceeds the maximum of {MAX_PARALLEL_TASKS}")]
    TooManyTasks(usize),
    #[error("no tasks given")]
    Empty,
    #[error("failed to create artifacts directory: {0}")]
    Artifacts(std::io::Error),
}

/// One requested task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub agent: String,
    pub task: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Live progress of one task, fed by the child's stdout event stream.
#[derive(Debug, Clone, Serialize)]
pub struct TaskProgress {
    pub index: usize,
    pub status: TaskStatus,
    pub current_tool: Option<String>,
    pub recent_tools: Vec<String>,
    pub tool_count: u32,
    pub tokens: u64,
    pub duration_ms: u64,
}

impl TaskProgress {
    fn new(index: usize) -> Self {
        Self {
            index,
            status: TaskStatus::Pending,
            current_tool: None,
            recent_tools: Vec::new(),
            tool_count: 0,
            tokens: 0,
            duration_ms: 0,
        }
    }
}

/// Artifact files persisted for one task run.
#[derive(Debug, Clone, Default)]
pub struct TaskArtifacts {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub event_log_path: Option<PathBuf>,
}

/// Final result of one task, in input order.
#[derive(Debug)]
pub struct TaskRun {
    pub index: usize,
    pub agent: String,
    pub task: String,
    pub status: TaskStatus,
    pub output: String,
    pub error: Option<String>,
    pub artifacts: TaskArtifacts,
    pub metrics: TaskProgress,
}

/// Combined progress callback: a snapshot of every task.
pub type UpdateFn = dyn Fn(&[TaskProgress]) + Send + Sync;

/// Dispatcher configuration. `agent_command` is the child agent program
/// plus fixed leading arguments; the dispatcher appends the input file
/// path.
#[derive(Clone)]
pub struct DispatcherConfig {
    pub agent_command: Vec<String>,
    pub cwd: PathBuf,
    /// Current session directory; artifacts land in its sibling folder.
    pub session_dir: Option<PathBuf>,
    pub bundled_agents: Vec<AgentDefinition>,
    /// Known model ids for fuzzy model overrides.
    pub available_models: Vec<String>,
    pub max_concurrency: usize,
}

impl DispatcherConfig {
    pub fn new(agent_command: Vec<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            agent_command,
            cwd: cwd.into(),
            session_dir: None,
            bundled_agents: Vec::new(),
            available_models: Vec::new(),
            max_concurrency: MAX_CONCURRENCY,
        }
    }
}

pub struct SubagentDispatcher {
    config: DispatcherConfig,
    /// Temp artifact dirs kept alive until the dispatcher goes away.
    scratch_dirs: Mutex<Vec<PathBuf>>,
}

impl SubagentDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            scratch_dirs: Mutex::new(Vec::new()),
        }
    }

    /// Run a batch of tasks. Results come back in input order regardless
    /// of completion order.
    pub async fn run(
        &self,
        tasks: Vec<TaskSpec>,
        context: Option<String>,
        scope: AgentScope,
        cancel: CancellationToken,
        on_update: Option<Arc<UpdateFn>>,
    ) -> Result<Vec<TaskRun>, DispatchError> {
        if tasks.is_empty() {
            return Err(DispatchError::Empty);
        }
        if tasks.len() > MAX_PARALLEL_TASKS {
            return Err(DispatchError::TooManyTasks(tasks.len()));
        }

        // Recursion guard: a child agent must not fan out again unless
        // its definition opted in.
        if std::env::var_os(NO_SUBAGENTS_ENV).is_some() {
            let spec = tasks.into_iter().next().expect("nonempty");
            return Ok(vec![TaskRun {
                index: 0,
                agent: spec.agent,
                task: spec.task,
                status: TaskStatus::Failed,
                output: String::new(),
                error: Some(format!(
                    "sub-agents are disabled in this process ({NO_SUBAGENTS_ENV} is set)"
                )),
                artifacts: TaskArtifacts::default(),
                metrics: TaskProgress::new(0),
            }]);
        }

        let agents = definition::discover_agents(
            &self.config.cwd,
            scope,
            &self.config.bundled_agents,
        );
        let artifacts_dir = self.artifacts_dir()?;

        let progress: Arc<Vec<Mutex<TaskProgress>>> = Arc::new(
            (0..tasks.len()).map(|i| Mutex::new(TaskProgress::new(i))).collect(),
        );
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));

        let mut handles = Vec::with_capacity(tasks.len());
        for (index, spec) in tasks.into_iter().enumerate() {
            let agent = agents.get(&spec.agent).cloned();
            let config = self.config.clone();
            let context = context.clone();
            let artifacts_dir = artifacts_dir.clone();
            let progress = progress.clone();
            let on_update = on_update.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                run_task(
                    index,
                    spec,
                    agent,
                    &config,
                    context.as_deref(),
                    &artifacts_dir,
                    &progress,
                    on_update.as_deref(),
                    cancel,
                )
                .await
            }));
        }

        // Join in spawn order; input order falls out directly.
        let mut results = Vec::with_capacity(handles.len());
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(run) => results.push(run),
                Err(e) => results.push(TaskRun {
                    index,
                    agent: String::new(),
                    task: String::new(),
                    status: TaskStatus::Failed,
                    output: String::new(),
                    error: Some(format!("task panicked: {e}")),
                    artifacts: TaskArtifacts::default(),
                    metrics: TaskProgress::new(index),
                }),
            }
        }
        Ok(results)
    }

    /// Pick the artifacts directory: the session directory's sibling when
    /// a session exists, else a scratch dir cleaned up with the
    /// dispatcher.
    fn artifacts_dir(&self) -> Result<PathBuf, DispatchError> {
        let dir = match &self.config.session_dir {
            Some(session) => {
                let parent = session.parent().unwrap_or(Path::new("."));
                parent.join("subagents")
            }
            None => {
                let dir =
                    std::env::temp_dir().join(format!("pi-subagents-{}", uuid::Uuid::new_v4()));
                self.scratch_dirs.lock().expect("scratch lock").push(dir.clone());
                dir
            }
        };
        std::fs::create_dir_all(&dir).map_err(DispatchError::Artifacts)?;
        Ok(dir)
    }
}

impl Drop for SubagentDispatcher {
    fn drop(&mut self) {
        for dir in self.scratch_dirs.lock().expect("scratch lock").drain(..) {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

/// Resolve a model override by fuzzy pattern: substring match first, then
/// each `,`-separated alternative.
pub fn resolve_model(pattern: &str, available: &[String]) -> Option<String> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return None;
    }
    if let Some(hit) = available.iter().find(|m| m.contains(pattern)) {
        return Some(hit.clone());
    }
    for alternative in pattern.split(',') {
        let alternative = alternative.trim();
        if alternative.is_empty() {
            continue;
        }
        if let Some(hit) = available.iter().find(|m| m.contains(alternative)) {
            return Some(hit.clone());
        }
    }
    None
}

/// One streamed child event. Unknown lines are treated as raw output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChildEvent {
    ToolStart { tool: String },
    ToolEnd { tool: String },
    Tokens { total: u64 },
    Result { text: String },
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    index: usize,
    spec: TaskSpec,
    agent: Option<AgentDefinition>,
    config: &DispatcherConfig,
    context: Option<&str>,
    artifacts_dir: &Path,
    progress: &[Mutex<TaskProgress>],
    on_update: Option<&UpdateFn>,
    cancel: CancellationToken,
) -> TaskRun {
    let started = Instant::now();
    let mut artifacts = TaskArtifacts::default();

    let fail = |error: String, artifacts: TaskArtifacts| TaskRun {
        index,
        agent: spec.agent.clone(),
        task: spec.task.clone(),
        status: TaskStatus::Failed,
        output: String::new(),
        error: Some(error),
        artifacts,
        metrics: snapshot(progress, index),
    };

    let Some(agent) = agent else {
        set_status(progress, index, TaskStatus::Failed, started, on_update);
        return fail(format!("unknown agent '{}'", spec.agent), artifacts);
    };

    // Expanded input: everything the child needs to build its context.
    let prompt = match context {
        Some(context) => format!("{context}\n\n{}", spec.task),
        None => spec.task.clone(),
    };
    let model = agent
        .model
        .as_deref()
        .and_then(|pattern| resolve_model(pattern, &config.available_models));
    let input = json!({
        "agent": agent.name,
        "systemPrompt": agent.system_prompt,
        "task": prompt,
        "tools": agent.tools,
        "model": model,
    });

    let input_path = artifacts_dir.join(format!("task-{index}-input.json"));
    if let Err(e) = std::fs::write(&input_path, input.to_string()) {
        return fail(format!("failed to write task input: {e}"), artifacts);
    }
    artifacts.input_path = Some(input_path.clone());

    let Some((program, fixed_args)) = config.agent_command.split_first() else {
        return fail("no agent command configured".to_string(), artifacts);
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(fixed_args)
        .arg(&input_path)
        .current_dir(&config.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if !agent.recursive {
        cmd.env(NO_SUBAGENTS_ENV, "1");
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            set_status(progress, index, TaskStatus::Failed, started, on_update);
            return fail(format!("failed to spawn agent process: {e}"), artifacts);
        }
    };

    set_status(progress, index, TaskStatus::Running, started, on_update);

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let mut event_log = String::new();
    let mut raw_output = String::new();
    let mut result_text: Option<String> = None;

    let stderr_task = tokio::spawn(async move {
        let mut text = String::new();
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            text.push_str(&line);
            text.push('\n');
        }
        text
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut cancelled = false;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    handle_child_line(
                        &line,
                        index,
                        progress,
                        started,
                        on_update,
                        &mut event_log,
                        &mut raw_output,
                        &mut result_text,
                    );
                }
                Ok(None) | Err(_) => break,
            },
            () = cancel.cancelled() => {
                cancelled = true;
                if let Some(pid) = child.id() {
                    crate::exec::kill_process_tree(pid, crate::exec::DEFAULT_KILL_GRACE).await;
                }
                break;
            }
        }
    }

    let status = child.wait().await;
    let stderr_text = stderr_task.await.unwrap_or_default();

    let output = result_text.unwrap_or_else(|| raw_output.trim_end().to_string());
    let output_path = artifacts_dir.join(format!("task-{index}-output.txt"));
    if std::fs::write(&output_path, &output).is_ok() {
        artifacts.output_path = Some(output_path);
    }
    if !event_log.is_empty() {
        let event_path = artifacts_dir.join(format!("task-{index}-events.jsonl"));
        if std::fs::write(&event_path, &event_log).is_ok() {
            artifacts.event_log_path = Some(event_path);
        }
    }

    let (final_status, error) = if cancelled {
        (TaskStatus::Failed, Some("cancelled".to_string()))
    } else {
        match status {
            Ok(status) if status.success() => (TaskStatus::Completed, None),
            Ok(status) => (
                TaskStatus::Failed,
                Some(format!(
                    "agent exited with {}: {}",
                    status.code().unwrap_or(-1),
                    stderr_text.trim_end()
                )),
            ),
            Err(e) => (TaskStatus::Failed, Some(format!("wait failed: {e}"))),
        }
    };
    set_status(progress, index, final_status, started, on_update);

    TaskRun {
        index,
        agent: spec.agent,
        task: spec.task,
        status: final_status,
        output,
        error,
        artifacts,
        metrics: snapshot(progress, index),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_child_line(
    line: &str,
    index: usize,
    progress: &[Mutex<TaskProgress>],
    started: Instant,
    on_update: Option<&UpdateFn>,
    event_log: &mut String,
    raw_output: &mut String,
    result_text: &mut Option<String>,
) {
    match serde_json::from_str::<ChildEvent>(line) {
        Ok(event) => {
            event_log.push_str(line);
            event_log.push('\n');
            {
                let mut task = progress[index].lock().expect("progress lock");
                task.duration_ms = started.elapsed().as_millis() as u64;
                match event {
                    ChildEvent::ToolStart { tool } => {
                        task.tool_count += 1;
                        task.recent_tools.push(tool.clone());
                        if task.recent_tools.len() > RECENT_TOOLS_KEPT {
                            task.recent_tools.remove(0);
                        }
                        task.current_tool = Some(tool);
                    }
                    ChildEvent::ToolEnd { tool } => {
                        if task.current_tool.as_deref() == Some(tool.as_str()) {
                            task.current_tool = None;
                        }
                    }
                    ChildEvent::Tokens { total } => task.tokens = total,
                    ChildEvent::Result { text } => *result_text = Some(text),
                }
            }
            emit_update(progress, on_update);
        }
        Err(_) => {
            raw_output.push_str(line);
            raw_output.push('\n');
        }
    }
}

fn set_status(
    progress: &[Mutex<TaskProgress>],
    index: usize,
    status: TaskStatus,
    started: Instant,
    on_update: Option<&UpdateFn>,
) {
    {
        let mut task = progress[index].lock().expect("progress lock");
        task.status = status;
        task.duration_ms = started.elapsed().as_millis() as u64;
    }
    emit_update(progress, on_update);
}

fn emit_update(progress: &[Mutex<TaskProgress>], on_update: Option<&UpdateFn>) {
    if let Some(on_update) = on_update {
        let snapshot: Vec<TaskProgress> = progress
            .iter()
            .map(|p| p.lock().expect("progress lock").clone())
            .collect();
        on_update(&snapshot);
    }
}

fn snapshot(progress: &[Mutex<TaskProgress>], index: usize) -> TaskProgress {
    progress[index].lock().expect("progress lock").clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A stand-in agent binary: reads the input file, emits a couple of
    /// progress events, then a result naming its task.
    fn fake_agent_command() -> Vec<String> {
        let script = r#"
input_file="$1"
task=$(sed -n 's/.*"task":"\([^"]*\)".*/\1/p' "$input_file")
printf '{"type":"tool_start","tool":"bash"}\n'
printf '{"type":"tool_end","tool":"bash"}\n'
printf '{"type":"tokens","total":7}\n'
case "$task" in
  *B*) ;;
  *) sleep 0.3 ;;
esac
printf '{"type":"result","text":"done: %s"}\n' "$task"
"#;
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()]
    }

    fn explore_agent() -> AgentDefinition {
        AgentDefinition {
            name: "explore".to_string(),
            description: "test agent".to_string(),
            system_prompt: "explore things".to_string(),
            tools: Some(vec!["bash".to_string()]),
            model: None,
            recursive: false,
            source: AgentSource::Bundled,
            file_path: PathBuf::new(),
        }
    }

    fn dispatcher(tmp: &Path) -> SubagentDispatcher {
        let mut config = DispatcherConfig::new(fake_agent_command(), tmp);
        config.bundled_agents = vec![explore_agent()];
        SubagentDispatcher::new(config)
    }

    fn task(name: &str) -> TaskSpec {
        TaskSpec {
            agent: "explore".to_string(),
            task: name.to_string(),
        }
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(tmp.path());

        // Task B finishes first (no sleep); order must still be A, B, C.
        let results = dispatcher
            .run(
                vec![task("A"), task("B"), task("C")],
                None,
                AgentScope::Both,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("run");

        assert_eq!(results.len(), 3);
        for (i, expected) in ["A", "B", "C"].iter().enumerate() {
            assert_eq!(results[i].index, i);
            assert_eq!(results[i].task, *expected);
            assert_eq!(results[i].status, TaskStatus::Completed);
            assert_eq!(results[i].output, format!("done: {expected}"));
        }
    }

    #[tokio::test]
    async fn progress_events_are_parsed() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(tmp.path());

        let updates: Arc<Mutex<Vec<Vec<TaskProgress>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = updates.clone();
        let on_update: Arc<UpdateFn> = Arc::new(move |snapshot| {
            sink.lock().expect("lock").push(snapshot.to_vec());
        });

        let results = dispatcher
            .run(
                vec![task("A")],
                None,
                AgentScope::Both,
                CancellationToken::new(),
                Some(on_update),
            )
            .await
            .expect("run");

        assert_eq!(results[0].metrics.tool_count, 1);
        assert_eq!(results[0].metrics.tokens, 7);
        assert!(results[0].metrics.recent_tools.contains(&"bash".to_string()));
        assert!(!updates.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn artifacts_are_persisted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let session = tmp.path().join("sessions/current");
        std::fs::create_dir_all(&session).expect("mkdir");

        let mut config = DispatcherConfig::new(fake_agent_command(), tmp.path());
        config.bundled_agents = vec![explore_agent()];
        config.session_dir = Some(session.clone());
        let dispatcher = SubagentDispatcher::new(config);

        let results = dispatcher
            .run(
                vec![task("A")],
                Some("shared context".to_string()),
                AgentScope::Both,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("run");

        let artifacts = &results[0].artifacts;
        let input_path = artifacts.input_path.as_ref().expect("input");
        assert!(input_path.starts_with(session.parent().expect("parent")));
        let input = std::fs::read_to_string(input_path).expect("read input");
        assert!(input.contains("shared context"));
        assert!(input.contains("explore things"));

        // The escaped newlines in the input JSON round-trip back into
        // real newlines in the parsed result event.
        let output = std::fs::read_to_string(artifacts.output_path.as_ref().expect("output"))
            .expect("read output");
        assert_eq!(output, "done: shared context\n\nA");

        assert!(artifacts.event_log_path.is_some());
    }

    #[tokio::test]
    async fn unknown_agent_fails_that_task_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(tmp.path());

        let results = dispatcher
            .run(
                vec![
                    task("A"),
                    TaskSpec {
                        agent: "ghost".to_string(),
                        task: "B".to_string(),
                    },
                ],
                None,
                AgentScope::Both,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("run");

        assert_eq!(results[0].status, TaskStatus::Completed);
        assert_eq!(results[1].status, TaskStatus::Failed);
        assert!(results[1].error.as_deref().expect("error").contains("ghost"));
    }

    #[tokio::test]
    async fn oversized_batches_fail_fast() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dispatcher = dispatcher(tmp.path());
        let tasks: Vec<TaskSpec> = (0..MAX_PARALLEL_TASKS + 1).map(|i| task(&i.to_string())).collect();
        let err = dispatcher
            .run(tasks, None, AgentScope::Both, CancellationToken::new(), None)
            .await
            .expect_err("too many");
        assert!(matches!(err, DispatchError::TooManyTasks(n) if n == MAX_PARALLEL_TASKS + 1));
    }

    #[tokio::test]
    async fn crashing_agent_reports_stderr() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = DispatcherConfig::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo boom >&2; exit 3".to_string(),
                "sh".to_string(),
            ],
            tmp.path(),
        );
        config.bundled_agents = vec![explore_agent()];
        let dispatcher = SubagentDispatcher::new(config);

        let results = dispatcher
            .run(
                vec![task("A")],
                None,
                AgentScope::Both,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("run");

        assert_eq!(results[0].status, TaskStatus::Failed);
        let error = results[0].error.as_deref().expect("error");
        assert!(error.contains('3'));
        assert!(error.contains("boom"));
    }

    #[tokio::test]
    async fn children_inherit_the_recursion_guard() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // The fake agent reports the guard variable back as its result.
        let script = r#"printf '{"type":"result","text":"guard=%s"}\n' "${PI_NO_SUBAGENTS:-unset}""#;
        let mut config = DispatcherConfig::new(
            vec![
                "sh".to_string(),
                "-c".to_string(),
                script.to_string(),
                "sh".to_string(),
            ],
            tmp.path(),
        );
        let mut recursive_agent = explore_agent();
        recursive_agent.name = "deep".to_string();
        recursive_agent.recursive = true;
        config.bundled_agents = vec![explore_agent(), recursive_agent];
        let dispatcher = SubagentDispatcher::new(config);

        let results = dispatcher
            .run(
                vec![
                    task("A"),
                    TaskSpec {
                        agent: "deep".to_string(),
                        task: "B".to_string(),
                    },
                ],
                None,
                AgentScope::Both,
                CancellationToken::new(),
                None,
            )
            .await
            .expect("run");

        // Default agents get the guard; recursive ones do not.
        assert_eq!(results[0].output, "guard=1");
        assert_eq!(results[1].output, "guard=unset");
    }

    #[test]
    fn model_resolution_is_fuzzy() {
        let available = vec![
            "claude-sonnet-4".to_string(),
            "claude-haiku-4".to_string(),
            "gpt-5-mini".to_string(),
        ];
        assert_eq!(
            resolve_model("sonnet", &available).as_deref(),
            Some("claude-sonnet-4")
        );
        assert_eq!(
            resolve_model("gemini,haiku", &available).as_deref(),
            Some("claude-haiku-4")
        );
        assert_eq!(resolve_model("nonexistent", &available), None);
        assert_eq!(resolve_model("", &available), None);
    }
}
