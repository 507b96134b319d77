//! Streamable HTTP transport: JSON-RPC over POST, with optional
//! server-sent-event response bodies and a long-lived notification stream.
//!
//! Sessions: when any response carries `Mcp-Session-Id` the transport
//! adopts it, echoes it on every subsequent request, and sends a
//! best-effort `DELETE` on close.

use super::protocol::{JsonRpcMessage, JsonRpcNotification, JsonRpcRequest};
use super::transport::{
    CloseHandler, HandlerSlot, NotificationHandler, Transport, TransportError, REQUEST_TIMEOUT,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

const SESSION_HEADER: &str = "Mcp-Session-Id";
const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// Incremental parser for `text/event-stream` bodies.
///
/// Feed raw chunks; complete `data:` payloads come back once their event
/// is terminated by a blank line (multi-line data is joined with `\n`).
#[derive(Default)]
pub(crate) struct SseParser {
    line_buf: String,
    data_buf: Option<String>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut events = Vec::new();
        self.line_buf.push_str(chunk);

        while let Some(nl) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=nl).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(data) = self.data_buf.take() {
                    events.push(data);
                }
            } else if let Some(data) = line.strip_prefix("data:") {
                let data = data.strip_prefix(' ').unwrap_or(data);
                match &mut self.data_buf {
                    Some(buf) => {
                        buf.push('\n');
                        buf.push_str(data);
                    }
                    None => self.data_buf = Some(data.to_string()),
                }
            }
            // event:/id:/retry:/comment lines are irrelevant here.
        }
        events
    }

    /// Flush a trailing unterminated event at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        self.data_buf.take()
    }
}

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
    notifications: HandlerSlot<NotificationHandler>,
    on_close: HandlerSlot<CloseHandler>,
    sse_abort: CancellationToken,
    sse_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &HashMap<String, String>) -> Result<Arc<Self>, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(super::transport::CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Arc::new(Self {
            client,
            url: url.to_string(),
            headers: headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
            notifications: HandlerSlot::default(),
            on_close: HandlerSlot::default(),
            sse_abort: CancellationToken::new(),
            sse_task: Mutex::new(None),
        }))
    }

    fn apply_headers(&self, mut req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }
        if let Some(session) = self.session_id.lock().expect("session lock").as_ref() {
            req = req.header(SESSION_HEADER, session);
        }
        req
    }

    fn adopt_session(&self, response: &reqwest::Response) {
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut session = self.session_id.lock().expect("session lock");
            if session.as_deref() != Some(id) {
                tracing::debug!(session = id, "adopted MCP session id");
                *session = Some(id.to_string());
            }
        }
    }

    fn dispatch_notification(&self, payload: &str) {
        let Ok(message) = serde_json::from_str::<JsonRpcMessage>(payload) else {
            return;
        };
        if message.is_notification() {
            if let (Some(method), Some(handler)) = (&message.method, self.notifications.get()) {
                handler(method, message.params.unwrap_or(Value::Null));
            }
        }
    }

    /// Read an SSE response body until the reply with `id` arrives.
    async fn read_sse_reply(
        &self,
        response: reqwest::Response,
        id: i64,
    ) -> Result<Value, TransportError> {
        let mut parser = SseParser::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Http(e.to_string()))?;
            for payload in parser.feed(&String::from_utf8_lossy(&chunk)) {
                if let Some(value) = self.match_reply(&payload, id)? {
                    return Ok(value);
                }
            }
        }
        if let Some(payload) = parser.finish() {
            if let Some(value) = self.match_reply(&payload, id)? {
                return Ok(value);
            }
        }
        Err(TransportError::Malformed(
            "event stream ended without a response".to_string(),
        ))
    }

    fn match_reply(&self, payload: &str, id: i64) -> Result<Option<Value>, TransportError> {
        let Ok(message) = serde_json::from_str::<JsonRpcMessage>(payload) else {
            return Ok(None);
        };
        if message.response_id() == Some(id) {
            return match message.error {
                Some(error) => Err(TransportError::from_rpc(error)),
                None => Ok(Some(message.result.unwrap_or(Value::Null))),
            };
        }
        if message.is_notification() {
            self.dispatch_notification(payload);
        }
        Ok(None)
    }

    async fn post_message(&self, body: String) -> Result<reqwest::Response, TransportError> {
        let req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", ACCEPT_BOTH)
            .body(body);
        let response = self
            .apply_headers(req)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        self.adopt_session(&response);
        Ok(response)
    }

    async fn request_inner(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;

        let response = self.post_message(body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("{method} HTTP {status}: {text}")));
        }

        let is_sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));

        if is_sse {
            self.read_sse_reply(response, id).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let message: JsonRpcMessage = serde_json::from_str(&text)
                .map_err(|e| TransportError::Malformed(format!("{e}: {text}")))?;
            match message.error {
                Some(error) => Err(TransportError::from_rpc(error)),
                None => Ok(message.result.unwrap_or(Value::Null)),
            }
        }
    }

    /// Open the optional long-lived GET stream for server-initiated
    /// notifications. A `405` means the server does not support push.
    pub async fn start_sse_listener(self: &Arc<Self>) -> Result<bool, TransportError> {
        let req = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        let response = self
            .apply_headers(req)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(TransportError::Http(format!(
                "SSE listener HTTP {}",
                response.status()
            )));
        }
        self.adopt_session(&response);

        let transport = self.clone();
        let abort = self.sse_abort.clone();
        let task = tokio::spawn(async move {
            let mut parser = SseParser::default();
            let mut stream = response.bytes_stream();
            loop {
                tokio::select! {
                    chunk = stream.next() => match chunk {
                        Some(Ok(chunk)) => {
                            for payload in parser.feed(&String::from_utf8_lossy(&chunk)) {
                                transport.dispatch_notification(&payload);
                            }
                        }
                        Some(Err(_)) | None => break,
                    },
                    () = abort.cancelled() => break,
                }
            }
        });
        *self.sse_task.lock().expect("sse lock") = Some(task);
        Ok(true)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, TransportError> {
        tokio::select! {
            result = self.request_inner(method, params) => result,
            () = cancel.cancelled() => Err(TransportError::Cancelled),
            () = tokio::time::sleep(REQUEST_TIMEOUT) => Err(TransportError::Timeout(REQUEST_TIMEOUT)),
        }
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError> {
        let notification = JsonRpcNotification::new(method, params);
        let body = serde_json::to_string(&notification)
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let response = self.post_message(body).await?;
        // 202 with an empty body is the normal acknowledgement.
        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Http(format!(
                "{method} HTTP {}",
                response.status()
            )))
        }
    }

    fn set_notification_handler(&self, handler: NotificationHandler) {
        self.notifications.set(handler);
    }

    fn set_close_handler(&self, handler: CloseHandler) {
        self.on_close.set(handler);
    }

    async fn close(&self) {
        self.sse_abort.cancel();
        if let Some(task) = self.sse_task.lock().expect("sse lock").take() {
            task.abort();
        }
        let session = self.session_id.lock().expect("session lock").clone();
        if let Some(session) = session {
            // Best-effort session termination.
            let _ = self
                .client
                .delete(&self.url)
                .header(SESSION_HEADER, &session)
                .send()
                .await;
        }
        if let Some(on_close) = self.on_close.take() {
            on_close();
        }
    }
}
