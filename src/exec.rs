//! Process executor: streamed shell commands with tail truncation,
//! spill files, timeouts, and cooperative cancellation.
//!
//! Every long-running child in the runtime (tool commands, MCP stdio
//! servers are killed through the same helpers) flows through here so that
//! cancellation and truncation semantics stay uniform.

mod kill;
mod shell;
mod truncate;

#[cfg(test)]
mod proptests;

pub use kill::{kill_process_tree, DEFAULT_KILL_GRACE};
pub use shell::{resolve_shell, ShellError};
pub use truncate::{TailBuffer, TruncationKind};

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default in-memory output budget: 50 KiB.
pub const MAX_OUTPUT_BYTES: usize = 50 * 1024;

/// Callback receiving each raw chunk as it is read.
pub type ChunkFn = dyn Fn(&[u8]) + Send + Sync;
/// Callback receiving the truncated text view after each chunk.
pub type UpdateFn = dyn Fn(&str) + Send + Sync;
/// Pre-spawn interception predicate; an `Err` message rejects the command.
pub type InterceptFn = dyn Fn(&str) -> Result<(), String> + Send + Sync;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Shell(#[from] ShellError),
    #[error("command rejected: {0}")]
    Rejected(String),
    #[error("failed to spawn process: {0}")]
    Spawn(std::io::Error),
    #[error("spill file error: {0}")]
    Spill(std::io::Error),
}

/// One command invocation.
pub struct ExecInvocation {
    pub command: String,
    pub workdir: PathBuf,
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    pub env: Vec<(String, String)>,
    /// In-memory output budget; the rolling window holds twice this.
    pub max_output_bytes: usize,
    /// Optional line budget for grep-like callers.
    pub max_output_lines: Option<usize>,
    pub on_chunk: Option<Box<ChunkFn>>,
    pub on_update: Option<Box<UpdateFn>>,
}

impl ExecInvocation {
    pub fn new(command: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            workdir: workdir.into(),
            timeout: None,
            cancel: None,
            env: Vec::new(),
            max_output_bytes: MAX_OUTPUT_BYTES,
            max_output_lines: None,
            on_chunk: None,
            on_update: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    pub fn max_output_lines(mut self, max: usize) -> Self {
        self.max_output_lines = Some(max);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn on_update(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }

    pub fn on_chunk(mut self, f: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }
}

/// Outcome of a finished (or killed) invocation.
#[derive(Debug)]
pub struct ExecOutcome {
    /// Tail-truncated combined stdout/stderr, interleaved in arrival order.
    pub output: String,
    /// Spill file holding the full output when it exceeded the budget.
    pub full_output_path: Option<PathBuf>,
    pub exit_code: i32,
    pub cancelled: bool,
    pub timed_out: bool,
    pub truncation: Option<TruncationKind>,
    pub total_bytes: u64,
    pub total_lines: u64,
}

/// Shared executor; cheap to clone and safe across tasks. Holds only the
/// intercept hook and shell override — each run is otherwise self-contained.
#[derive(Clone, Default)]
pub struct Executor {
    shell: Option<PathBuf>,
    intercept: Option<Arc<InterceptFn>>,
    kill_grace: Option<Duration>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the resolved shell (must be an absolute path to a file).
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Install a predicate that can reject commands before they spawn.
    pub fn with_intercept(
        mut self,
        f: impl Fn(&str) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.intercept = Some(Arc::new(f));
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = Some(grace);
        self
    }

    /// Run a command to completion, streaming output through the
    /// invocation's callbacks.
    pub async fn run(&self, invocation: ExecInvocation) -> Result<ExecOutcome, ExecError> {
        if let Some(intercept) = &self.intercept {
            intercept(&invocation.command).map_err(ExecError::Rejected)?;
        }

        let shell = resolve_shell(self.shell.as_deref())?;
        let cancel = invocation.cancel.clone().unwrap_or_default();
        let grace = self.kill_grace.unwrap_or(DEFAULT_KILL_GRACE);

        let mut cmd = Command::new(&shell);
        cmd.arg("-c")
            .arg(&invocation.command)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }

        // New process group so a kill covers the whole tree.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .ok();
                Ok(())
            });
        }

        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
        let pid = child.id();

        let mut stdout = child.stdout.take().expect("stdout piped");
        let mut stderr = child.stderr.take().expect("stderr piped");

        let mut buffer = TailBuffer::new(invocation.max_output_bytes, invocation.max_output_lines);
        let mut spill = Spill::new(invocation.max_output_bytes);

        let timeout_at = invocation.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut cancelled = false;
        let mut timed_out = false;

        let mut out_buf = [0u8; 8192];
        let mut err_buf = [0u8; 8192];
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            let sleep_until = async {
                match timeout_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => match read {
                    Ok(0) | Err(_) => out_open = false,
                    Ok(n) => {
                        Self::consume(&invocation, &mut buffer, &mut spill, &out_buf[..n]).await?;
                    }
                },
                read = stderr.read(&mut err_buf), if err_open => match read {
                    Ok(0) | Err(_) => err_open = false,
                    Ok(n) => {
                        Self::consume(&invocation, &mut buffer, &mut spill, &err_buf[..n]).await?;
                    }
                },
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                () = sleep_until => {
                    timed_out = true;
                    break;
                }
            }
        }

        let exit_code = if cancelled || timed_out {
            if let Some(pid) = pid {
                kill_process_tree(pid, grace).await;
            }
            // Bytes read after the kill are discarded.
            let _ = child.wait().await;
            -1
        } else {
            match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            }
        };

        spill.flush().await?;

        Ok(ExecOutcome {
            output: buffer.view(),
            full_output_path: spill.path(),
            exit_code,
            cancelled,
            timed_out,
            truncation: buffer.truncation(),
            total_bytes: buffer.total_bytes(),
            total_lines: buffer.total_lines(),
        })
    }

    async fn consume(
        invocation: &ExecInvocation,
        buffer: &mut TailBuffer,
        spill: &mut Spill,
        chunk: &[u8],
    ) -> Result<(), ExecError> {
        if let Some(on_chunk) = &invocation.on_chunk {
            on_chunk(chunk);
        }
        spill.write(buffer, chunk).await?;
        buffer.push(chunk);
        if let Some(on_update) = &invocation.on_update {
            on_update(&buffer.view());
        }
        Ok(())
    }
}

/// Lazily opened spill file in the system temp directory. Once open, every
/// chunk flows through it; the in-memory buffer keeps only the tail.
struct Spill {
    threshold: u64,
    file: Option<tokio::fs::File>,
    path: Option<PathBuf>,
}

impl Spill {
    fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold as u64,
            file: None,
            path: None,
        }
    }

    async fn write(&mut self, buffer: &TailBuffer, chunk: &[u8]) -> Result<(), ExecError> {
        if self.file.is_none() {
            if buffer.total_bytes() + chunk.len() as u64 <= self.threshold {
                return Ok(());
            }
            // Crossing the budget: open the file and replay everything
            // buffered so far, so the spill holds the full output.
            let path =
                std::env::temp_dir().join(format!("pi-exec-{}.log", uuid::Uuid::new_v4()));
            let mut file = tokio::fs::File::create(&path)
                .await
                .map_err(ExecError::Spill)?;
            file.write_all(buffer.view_raw()).await.map_err(ExecError::Spill)?;
            tracing::debug!(path = %path.display(), "opened spill file");
            self.file = Some(file);
            self.path = Some(path);
        }
        if let Some(file) = &mut self.file {
            file.write_all(chunk).await.map_err(ExecError::Spill)?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ExecError> {
        if let Some(file) = &mut self.file {
            file.flush().await.map_err(ExecError::Spill)?;
        }
        Ok(())
    }

    fn path(&self) -> Option<PathBuf> {
        self.path.clone()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("shell", &self.shell)
            .field("has_intercept", &self.intercept.is_some())
            .finish()
    }
}

/// Helper used by dynamic tools: run `cmd args` (not through the shell).
pub async fn exec_program(
    program: impl AsRef<Path>,
    args: &[String],
    workdir: &Path,
    env: &[(String, String)],
    cancel: CancellationToken,
    timeout: Option<Duration>,
) -> Result<ExecOutcome, ExecError> {
    let quoted: Vec<String> = std::iter::once(program.as_ref().display().to_string())
        .chain(args.iter().cloned())
        .map(|a| shell_quote(&a))
        .collect();
    let mut invocation = ExecInvocation::new(quoted.join(" "), workdir).cancel_token(cancel);
    if let Some(timeout) = timeout {
        invocation = invocation.timeout(timeout);
    }
    for (key, value) in env {
        invocation = invocation.env(key.clone(), value.clone());
    }
    Executor::new().run(invocation).await
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test]
    async fn simple_command() {
        let outcome = Executor::new()
            .run(ExecInvocation::new("echo hello", temp_dir()))
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.output.contains("hello"));
        assert!(outcome.full_output_path.is_none());
        assert!(!outcome.cancelled);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn failed_command_reports_exit_code() {
        let outcome = Executor::new()
            .run(ExecInvocation::new("exit 3", temp_dir()))
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, 3);
    }

    #[tokio::test]
    async fn stderr_is_interleaved() {
        let outcome = Executor::new()
            .run(ExecInvocation::new("echo out; echo err >&2", temp_dir()))
            .await
            .expect("run");
        assert!(outcome.output.contains("out"));
        assert!(outcome.output.contains("err"));
    }

    #[tokio::test]
    async fn spill_file_holds_full_output() {
        // ~100 KB of dots against a 50 KiB budget.
        let outcome = Executor::new()
            .run(
                ExecInvocation::new("printf '%0.s.' $(seq 1 100000)", temp_dir())
                    .max_output_bytes(MAX_OUTPUT_BYTES),
            )
            .await
            .expect("run");

        assert!(outcome.output.len() <= MAX_OUTPUT_BYTES);
        assert!(outcome.output.ends_with('.'));
        assert_eq!(outcome.truncation, Some(TruncationKind::Bytes));

        let path = outcome.full_output_path.expect("spill file");
        let full = std::fs::metadata(&path).expect("spill metadata");
        assert!(full.len() >= 100_000);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn cancellation_is_prompt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = Executor::new()
            .with_kill_grace(Duration::from_millis(100))
            .run(ExecInvocation::new("sleep 10", temp_dir()).cancel_token(cancel))
            .await
            .expect("run");

        assert!(outcome.cancelled);
        assert_eq!(outcome.exit_code, -1);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn timeout_kills_the_tree() {
        let outcome = Executor::new()
            .with_kill_grace(Duration::from_millis(50))
            .run(
                ExecInvocation::new("sleep 10", temp_dir())
                    .timeout(Duration::from_millis(100)),
            )
            .await
            .expect("run");
        assert!(outcome.timed_out);
        assert!(!outcome.cancelled);
        assert_eq!(outcome.exit_code, -1);
    }

    #[tokio::test]
    async fn on_update_sees_truncated_view() {
        let updates = Arc::new(AtomicUsize::new(0));
        let seen = updates.clone();
        let outcome = Executor::new()
            .run(
                ExecInvocation::new("seq 1 100", temp_dir())
                    .max_output_bytes(64)
                    .on_update(move |view| {
                        assert!(view.len() <= 64);
                        seen.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await
            .expect("run");
        assert!(updates.load(Ordering::SeqCst) > 0);
        assert!(outcome.total_lines >= 100);
    }

    #[tokio::test]
    async fn intercept_rejects_before_spawn() {
        let result = Executor::new()
            .with_intercept(|cmd| {
                if cmd.starts_with("grep") {
                    Err("use the search tool instead of grep".to_string())
                } else {
                    Ok(())
                }
            })
            .run(ExecInvocation::new("grep foo bar", temp_dir()))
            .await;
        assert!(matches!(result, Err(ExecError::Rejected(_))));
    }

    #[tokio::test]
    async fn env_overlay_is_applied() {
        let outcome = Executor::new()
            .run(ExecInvocation::new("echo $PI_TEST_MARKER", temp_dir()).env("PI_TEST_MARKER", "42"))
            .await
            .expect("run");
        assert!(outcome.output.contains("42"));
    }
}
