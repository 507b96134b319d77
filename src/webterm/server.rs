//! Web terminal server: one HTTP listener per configured binding, a
//! static bundle, and a `/ws` endpoint mirroring the terminal bridge.
//!
//! At most one client may be connected across every binding; concurrent
//! upgrade attempts receive HTTP 409. Reconfiguring bindings diffs the
//! live listener set and disconnects a client whose binding goes away.

use super::assets::{serve_asset, serve_index};
use super::bindings::InterfaceBinding;
use super::bridge::{ClientCapabilities, MirroredTerminal};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Callback for `client_debug` frames.
pub type DebugFn = dyn Fn(&str, &Value) + Send + Sync;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input {
        data: String,
    },
    Resize {
        cols: u16,
        rows: u16,
    },
    ClientCapabilities(ClientCapabilities),
    ClientDebug {
        reason: String,
        #[serde(default)]
        info: Value,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Output { data: &'a str },
    Status { state: &'a str, message: &'a str },
}

/// A binding that could not be established.
#[derive(Debug)]
pub struct BindingFailure {
    pub id: String,
    pub error: String,
}

struct Listener {
    addr: SocketAddr,
    shutdown: CancellationToken,
}

struct ServerState {
    bridge: RwLock<Option<MirroredTerminal>>,
    client_active: AtomicBool,
    /// Binding id of the connected client plus a token to kick it.
    client_kick: Mutex<Option<(String, CancellationToken)>>,
    debug: Option<Arc<DebugFn>>,
}

pub struct WebTermServer {
    state: Arc<ServerState>,
    listeners: tokio::sync::Mutex<BTreeMap<String, Listener>>,
    port: u16,
}

impl WebTermServer {
    pub fn new(port: u16, debug: Option<Arc<DebugFn>>) -> Self {
        Self {
            state: Arc::new(ServerState {
                bridge: RwLock::new(None),
                client_active: AtomicBool::new(false),
                client_kick: Mutex::new(None),
                debug,
            }),
            listeners: tokio::sync::Mutex::new(BTreeMap::new()),
            port,
        }
    }

    /// Attach (or detach) the bridge clients talk to.
    pub fn set_bridge(&self, bridge: Option<MirroredTerminal>) {
        *self.state.bridge.write().expect("bridge lock") = bridge;
    }

    /// Diff the live listener set against `bindings`: removed bindings
    /// stop listening (kicking a client bound there), added ones bind.
    /// Returns the failures; partial application is fine.
    pub async fn apply_bindings(&self, bindings: &[InterfaceBinding]) -> Vec<BindingFailure> {
        let mut failures = Vec::new();
        let mut listeners = self.listeners.lock().await;

        let wanted: BTreeMap<String, &InterfaceBinding> =
            bindings.iter().map(|b| (b.id(), b)).collect();

        let stale: Vec<String> = listeners
            .keys()
            .filter(|id| !wanted.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(listener) = listeners.remove(&id) {
                tracing::info!(binding = %id, "stopping web terminal listener");
                self.kick_client_on(&id);
                listener.shutdown.cancel();
            }
        }

        for (id, binding) in wanted {
            if listeners.contains_key(&id) {
                continue;
            }
            let addr = SocketAddr::V4(SocketAddrV4::new(binding.ip, self.port));
            match tokio::net::TcpListener::bind(addr).await {
                Ok(socket) => {
                    let addr = socket.local_addr().unwrap_or(addr);
                    let shutdown = CancellationToken::new();
                    let app = self.router(id.clone());
                    let token = shutdown.clone();
                    tokio::spawn(async move {
                        let serve = axum::serve(socket, app)
                            .with_graceful_shutdown(async move { token.cancelled().await });
                        if let Err(e) = serve.await {
                            tracing::warn!(error = %e, "web terminal listener failed");
                        }
                    });
                    tracing::info!(binding = %id, %addr, "web terminal listening");
                    listeners.insert(id, Listener { addr, shutdown });
                }
                Err(e) => failures.push(BindingFailure {
                    id,
                    error: e.to_string(),
                }),
            }
        }
        failures
    }

    fn router(&self, binding_id: String) -> Router {
        Router::new()
            .route("/", get(serve_index))
            .route("/assets/*path", get(serve_asset))
            .route("/ws", get(ws_handler))
            .with_state((self.state.clone(), binding_id))
    }

    fn kick_client_on(&self, binding_id: &str) {
        let kick = self.state.client_kick.lock().expect("kick lock");
        if let Some((bound_id, token)) = kick.as_ref() {
            if bound_id == binding_id {
                token.cancel();
            }
        }
    }

    /// URLs of the currently-live bindings only.
    pub async fn urls(&self) -> Vec<String> {
        self.listeners
            .lock()
            .await
            .values()
            .map(|l| format!("http://{}/", l.addr))
            .collect()
    }

    pub async fn bound_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.lock().await.values().map(|l| l.addr).collect()
    }

    /// Stop every listener, clear the bridge's size override, and ask the
    /// host UI to repaint the freed terminal.
    pub async fn stop(&self) {
        {
            let mut listeners = self.listeners.lock().await;
            for (id, listener) in std::mem::take(&mut *listeners) {
                self.kick_client_on(&id);
                listener.shutdown.cancel();
            }
        }
        let bridge = self.state.bridge.read().expect("bridge lock").clone();
        if let Some(bridge) = bridge {
            bridge.clear_size();
            bridge.request_full_render(true);
        }
    }
}

async fn ws_handler(
    State((state, binding_id)): State<(Arc<ServerState>, String)>,
    ws: WebSocketUpgrade,
) -> Response {
    // Single client across all bindings.
    if state.client_active.swap(true, Ordering::SeqCst) {
        return StatusCode::CONFLICT.into_response();
    }
    let kick = CancellationToken::new();
    *state.client_kick.lock().expect("kick lock") = Some((binding_id, kick.clone()));

    ws.on_upgrade(move |socket| async move {
        handle_session(&state, socket, kick).await;
        *state.client_kick.lock().expect("kick lock") = None;
        state.client_active.store(false, Ordering::SeqCst);
    })
}

async fn handle_session(state: &Arc<ServerState>, mut socket: WebSocket, kick: CancellationToken) {
    let bridge = state.bridge.read().expect("bridge lock").clone();
    let Some(bridge) = bridge else {
        let _ = send(&mut socket, &ServerMessage::Status {
            state: "error",
            message: "no active terminal session",
        })
        .await;
        return;
    };

    let _ = send(&mut socket, &ServerMessage::Status {
        state: "starting",
        message: "attaching to terminal",
    })
    .await;

    let mut subscription = match bridge.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            let _ = send(&mut socket, &ServerMessage::Status {
                state: "error",
                message: &e.to_string(),
            })
            .await;
            return;
        }
    };

    let _ = send(&mut socket, &ServerMessage::Status {
        state: "running",
        message: "attached",
    })
    .await;
    // Freshly attached clients start from a blank screen; have the host
    // paint it in full.
    bridge.request_full_render(true);

    loop {
        tokio::select! {
            chunk = subscription.output_rx.recv() => match chunk {
                Ok(chunk) => {
                    let filtered = bridge.filter_output(&chunk);
                    if send(&mut socket, &ServerMessage::Output { data: &filtered })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "web client lagged; output dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    let _ = send(&mut socket, &ServerMessage::Status {
                        state: "exited",
                        message: "terminal closed",
                    })
                    .await;
                    break;
                }
            },
            frame = socket.recv() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(state, &bridge, &text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            () = kick.cancelled() => {
                let _ = send(&mut socket, &ServerMessage::Status {
                    state: "exited",
                    message: "binding removed",
                })
                .await;
                break;
            }
        }
    }
}

fn handle_client_message(state: &Arc<ServerState>, bridge: &MirroredTerminal, text: &str) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed client frame");
            return;
        }
    };
    match message {
        ClientMessage::Input { data } => bridge.inject_input(&data),
        ClientMessage::Resize { cols, rows } => {
            bridge.set_size(cols, rows);
            bridge.request_full_render(true);
        }
        ClientMessage::ClientCapabilities(caps) => bridge.set_client_capabilities(caps),
        ClientMessage::ClientDebug { reason, info } => {
            if let Some(debug) = &state.debug {
                debug(&reason, &info);
            }
        }
    }
}

async fn send(socket: &mut WebSocket, message: &ServerMessage<'_>) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).expect("serializable message");
    socket.send(Message::Text(text)).await
}
