//! Stdio transport: a child server process speaking newline-delimited
//! JSON-RPC 2.0 on stdin/stdout.
//!
//! A dedicated reader task correlates responses to pending RPCs by id and
//! routes notifications to the manager's handler. Closing the transport
//! kills the child's process tree and rejects everything outstanding.

use super::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use super::transport::{
    CloseHandler, HandlerSlot, NotificationHandler, PendingRpcs, Transport, TransportError,
    REQUEST_TIMEOUT,
};
use crate::exec::{kill_process_tree, DEFAULT_KILL_GRACE};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio_util::sync::CancellationToken;

pub struct StdioTransport {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: std::sync::Mutex<Option<Child>>,
    pid: Option<u32>,
    pending: Arc<PendingRpcs>,
    next_id: AtomicI64,
    closed: AtomicBool,
    notifications: HandlerSlot<NotificationHandler>,
    on_close: HandlerSlot<CloseHandler>,
    reader: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawn the server process and start the reader task.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Arc<Self>, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{command}: {e}")))?;
        let stdin = child.stdin.take().expect("stdin piped");
        let stdout = child.stdout.take().expect("stdout piped");
        let pid = child.id();

        let transport = Arc::new(Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: std::sync::Mutex::new(Some(child)),
            pid,
            pending: Arc::new(PendingRpcs::default()),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            notifications: HandlerSlot::default(),
            on_close: HandlerSlot::default(),
            reader: std::sync::Mutex::new(None),
        });

        let reader = tokio::spawn(Self::read_loop(transport.clone(), stdout));
        *transport.reader.lock().expect("reader lock") = Some(reader);

        Ok(transport)
    }

    async fn read_loop(transport: Arc<Self>, stdout: tokio::process::ChildStdout) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcMessage>(line) {
                        Ok(message) => transport.dispatch(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "discarding malformed frame from server");
                        }
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        // Stream ended: the server is gone. Everything outstanding fails.
        transport.pending.fail_all(|| TransportError::Closed);
        transport.closed.store(true, Ordering::SeqCst);
        if let Some(on_close) = transport.on_close.take() {
            on_close();
        }
    }

    fn dispatch(&self, message: JsonRpcMessage) {
        if let Some(id) = message.response_id() {
            let result = match message.error {
                Some(error) => Err(TransportError::from_rpc(error)),
                None => Ok(message.result.unwrap_or(Value::Null)),
            };
            if !self.pending.resolve(id, result) {
                tracing::debug!(id, "response for unknown request id");
            }
        } else if message.is_notification() {
            if let (Some(method), Some(handler)) = (&message.method, self.notifications.get()) {
                handler(method, message.params.unwrap_or(Value::Null));
            }
        } else {
            // Server-initiated request; out of scope for a tools-only client.
            tracing::debug!(method = ?message.method, "ignoring server-initiated request");
        }
    }

    async fn send_line(&self, payload: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stdin
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        stdin
            .flush()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rx = self.pending.register(id);

        let request = JsonRpcRequest::new(id, method, params);
        let payload = serde_json::to_string(&request)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        if let Err(e) = self.send_line(payload).await {
            self.pending.forget(id);
            return Err(e);
        }

        tokio::select! {
            result = rx => result.unwrap_or(Err(TransportError::Closed)),
            () = cancel.cancelled() => {
                self.pending.forget(id);
                Err(TransportError::Cancelled)
            }
            () = tokio::time::sleep(REQUEST_TIMEOUT) => {
                self.pending.forget(id);
                Err(TransportError::Timeout(REQUEST_TIMEOUT))
            }
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let notification = JsonRpcNotification::new(method, params);
        let payload = serde_json::to_string(&notification)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        self.send_line(payload).await
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.notifications.set(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        self.on_close.set(handler);
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(reader) = self.reader.lock().expect("reader lock").take() {
            reader.abort();
        }
        if let Some(pid) = self.pid {
            kill_process_tree(pid, DEFAULT_KILL_GRACE).await;
        }
        let child = self.child.lock().expect("child lock").take();
        if let Some(mut child) = child {
            let _ = child.wait().await;
        }
        self.pending.fail_all(|| TransportError::Closed);
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// A stdio "server" written in shell: reads lines, answers initialize
    /// and tools/list with canned frames.
    fn echo_server_script() -> String {
        r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2025-03-26","capabilities":{"tools":{}},"serverInfo":{"name":"e","version":"1"}}}\n' "$id"
      ;;
    *'"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"ping","inputSchema":{"type":"object","properties":{}}}]}}\n' "$id"
      ;;
    *'"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id"
      ;;
    *'"boom"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"no such method"}}\n' "$id"
      ;;
  esac
done
"#
        .to_string()
    }

    fn spawn_echo_server() -> Arc<StdioTransport> {
        StdioTransport::spawn(
            "sh",
            &["-c".to_string(), echo_server_script()],
            &HashMap::new(),
        )
        .expect("spawn")
    }

    #[tokio::test]
    async fn round_trip_request() {
        let transport = spawn_echo_server();
        let result = transport
            .request("initialize", json!({}), CancellationToken::new())
            .await
            .expect("initialize");
        assert_eq!(result["serverInfo"]["name"], "e");
        transport.close().await;
    }

    #[tokio::test]
    async fn rpc_error_body_is_surfaced() {
        let transport = spawn_echo_server();
        let err = transport
            .request("boom", json!({}), CancellationToken::new())
            .await
            .expect_err("must fail");
        match err {
            TransportError::Rpc { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method");
            }
            other => panic!("expected rpc error, got {other:?}"),
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn cancellation_rejects_pending() {
        // Server that answers nothing: cancel must win.
        let transport =
            StdioTransport::spawn("sh", &["-c".to_string(), "sleep 30".to_string()], &HashMap::new())
                .expect("spawn");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = transport
            .request("initialize", json!({}), cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, TransportError::Cancelled));
        transport.close().await;
    }

    #[tokio::test]
    async fn close_rejects_in_flight_requests() {
        let transport =
            StdioTransport::spawn("sh", &["-c".to_string(), "sleep 30".to_string()], &HashMap::new())
                .expect("spawn");
        let pending = {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport
                    .request("initialize", json!({}), CancellationToken::new())
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        transport.close().await;
        let result = pending.await.expect("join");
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn notifications_reach_the_handler() {
        let script = r#"
sleep 0.2
printf '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info"}}\n'
sleep 1
"#;
        let transport =
            StdioTransport::spawn("sh", &["-c".to_string(), script.to_string()], &HashMap::new())
                .expect("spawn");
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        transport.set_notification_handler(Arc::new(move |method, _params| {
            sink.lock().expect("lock").push(method.to_string());
        }));
        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert_eq!(
            seen.lock().expect("lock").as_slice(),
            ["notifications/message"]
        );
        transport.close().await;
    }
}
