//! Transport abstraction under an MCP connection.
//!
//! Both transports expose the same capability set: correlated requests,
//! fire-and-forget notifications, and close. The manager installs a
//! notification handler to observe server-initiated messages.

use super::protocol::JsonRpcErrorBody;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Default per-RPC timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for the initialize handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
    #[error("request cancelled")]
    Cancelled,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// JSON-RPC error body from the server, surfaced verbatim.
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("failed to start server: {0}")]
    Spawn(String),
}

impl TransportError {
    pub fn from_rpc(body: JsonRpcErrorBody) -> Self {
        Self::Rpc {
            code: body.code,
            message: body.message,
        }
    }
}

/// Handler for server-initiated notifications: `(method, params)`.
pub type NotificationHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Handler invoked once when the transport shuts down.
pub type CloseHandler = Arc<dyn Fn() + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the correlated response.
    async fn request(
        &self,
        method: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, TransportError>;

    /// Send a notification; no response is expected.
    async fn notify(&self, method: &str, params: Value) -> Result<(), TransportError>;

    fn set_notification_handler(&self, handler: NotificationHandler);

    fn set_close_handler(&self, handler: CloseHandler);

    /// Tear down the transport, rejecting every pending RPC with `Closed`.
    async fn close(&self);
}

/// Table of outstanding requests, keyed by id. Exactly one entry exists
/// per in-flight request; the transport's read loop resolves them.
#[derive(Default)]
pub(crate) struct PendingRpcs {
    waiters: Mutex<HashMap<i64, oneshot::Sender<Result<Value, TransportError>>>>,
}

impl PendingRpcs {
    pub fn register(&self, id: i64) -> oneshot::Receiver<Result<Value, TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().expect("pending lock").insert(id, tx);
        rx
    }

    pub fn resolve(&self, id: i64, result: Result<Value, TransportError>) -> bool {
        match self.waiters.lock().expect("pending lock").remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    pub fn forget(&self, id: i64) {
        self.waiters.lock().expect("pending lock").remove(&id);
    }

    /// Fail every outstanding request, e.g. on stream close.
    pub fn fail_all(&self, make_error: impl Fn() -> TransportError) {
        let waiters: Vec<_> = {
            let mut map = self.waiters.lock().expect("pending lock");
            map.drain().collect()
        };
        for (_, tx) in waiters {
            let _ = tx.send(Err(make_error()));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.waiters.lock().expect("pending lock").len()
    }
}

/// Shared slot for the manager-installed handlers.
pub(crate) struct HandlerSlot<T> {
    inner: Arc<Mutex<Option<T>>>,
}

impl<T> Default for HandlerSlot<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
        }
    }
}

impl<T: Clone> HandlerSlot<T> {
    pub fn set(&self, handler: T) {
        *self.inner.lock().expect("handler lock") = Some(handler);
    }

    pub fn get(&self) -> Option<T> {
        self.inner.lock().expect("handler lock").clone()
    }

    pub fn take(&self) -> Option<T> {
        self.inner.lock().expect("handler lock").take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_rpcs_resolve_exactly_once() {
        let pending = PendingRpcs::default();
        let rx = pending.register(1);
        assert!(pending.resolve(1, Ok(Value::Null)));
        assert!(!pending.resolve(1, Ok(Value::Null)));
        assert!(rx.await.expect("resolved").is_ok());
    }

    #[tokio::test]
    async fn fail_all_rejects_every_waiter() {
        let pending = PendingRpcs::default();
        let rx1 = pending.register(1);
        let rx2 = pending.register(2);
        pending.fail_all(|| TransportError::Closed);
        assert!(matches!(rx1.await.expect("sent"), Err(TransportError::Closed)));
        assert!(matches!(rx2.await.expect("sent"), Err(TransportError::Closed)));
        assert_eq!(pending.len(), 0);
    }
}
