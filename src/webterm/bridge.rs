//! Single-writer terminal mirror.
//!
//! Wraps the host's controlling terminal: every chunk written through the
//! bridge reaches the real TTY and is rebroadcast to the (at most one)
//! attached web subscriber. The subscriber may inject input, dictate the
//! cell size, and ask the host UI for a full redraw.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("a terminal subscriber is already attached")]
    Occupied,
}

/// Render-request hook installed by the host UI; the flag asks for a
/// screen clear before redrawing.
pub type RenderFn = dyn Fn(bool) + Send + Sync;

/// Browser font capabilities reported by the web client.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ClientCapabilities {
    /// Whether the client can render Nerd Font private-use glyphs.
    #[serde(default)]
    pub nerd_font: bool,
}

#[derive(Clone)]
pub struct MirroredTerminal {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    output_tx: broadcast::Sender<String>,
    input_tx: mpsc::UnboundedSender<String>,
    size_override: Mutex<Option<(u16, u16)>>,
    subscriber: Mutex<Option<u64>>,
    next_subscriber: AtomicU64,
    render_hook: Mutex<Option<Arc<RenderFn>>>,
    substitute_glyphs: AtomicBool,
    /// Suppressed in tests so output does not hit the real stdout.
    mirror_to_tty: bool,
}

/// Held by the attached subscriber; dropping it frees the writer slot.
pub struct TerminalSubscription {
    id: u64,
    pub output_rx: broadcast::Receiver<String>,
    bridge: MirroredTerminal,
}

impl Drop for TerminalSubscription {
    fn drop(&mut self) {
        let mut slot = self.bridge.inner.subscriber.lock().expect("subscriber lock");
        if *slot == Some(self.id) {
            *slot = None;
        }
    }
}

impl MirroredTerminal {
    /// Create the bridge; the receiver yields input injected by the web
    /// client, to be fed to the host input handler as if typed.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::with_tty_mirroring(true)
    }

    /// Test constructor that skips writing to the real stdout.
    pub fn with_tty_mirroring(mirror_to_tty: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (output_tx, _) = broadcast::channel(256);
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                output_tx,
                input_tx,
                size_override: Mutex::new(None),
                subscriber: Mutex::new(None),
                next_subscriber: AtomicU64::new(1),
                render_hook: Mutex::new(None),
                substitute_glyphs: AtomicBool::new(false),
                mirror_to_tty,
            }),
        };
        (bridge, input_rx)
    }

    /// Write a chunk to the TTY and rebroadcast it to the subscriber.
    pub fn write(&self, chunk: &str) {
        if self.inner.mirror_to_tty {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
        let _ = self.inner.output_tx.send(chunk.to_string());
    }

    /// Attach the single allowed subscriber.
    pub fn subscribe(&self) -> Result<TerminalSubscription, BridgeError> {
        let mut slot = self.inner.subscriber.lock().expect("subscriber lock");
        if slot.is_some() {
            return Err(BridgeError::Occupied);
        }
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);
        *slot = Some(id);
        Ok(TerminalSubscription {
            id,
            output_rx: self.inner.output_tx.subscribe(),
            bridge: self.clone(),
        })
    }

    pub fn has_subscriber(&self) -> bool {
        self.inner.subscriber.lock().expect("subscriber lock").is_some()
    }

    /// Forward injected input to the host as if the user typed it.
    pub fn inject_input(&self, data: &str) {
        let _ = self.inner.input_tx.send(data.to_string());
    }

    /// Override the cell size dictated by the web client.
    pub fn set_size(&self, cols: u16, rows: u16) {
        *self.inner.size_override.lock().expect("size lock") = Some((cols, rows));
    }

    /// Drop the override and fall back to the TTY's own size.
    pub fn clear_size(&self) {
        *self.inner.size_override.lock().expect("size lock") = None;
    }

    /// Effective size: the override when set, else the controlling TTY.
    pub fn size(&self) -> (u16, u16) {
        if let Some(size) = *self.inner.size_override.lock().expect("size lock") {
            return size;
        }
        tty_size().unwrap_or((80, 24))
    }

    pub fn set_render_hook(&self, hook: Arc<RenderFn>) {
        *self.inner.render_hook.lock().expect("render lock") = Some(hook);
    }

    /// Ask the host UI to redraw, optionally clearing the screen first.
    pub fn request_full_render(&self, clear: bool) {
        let hook = self.inner.render_hook.lock().expect("render lock").clone();
        if let Some(hook) = hook {
            hook(clear);
        }
    }

    /// Record the web client's font capabilities; without Nerd Font
    /// support, private-use glyphs are substituted in the output stream.
    pub fn set_client_capabilities(&self, caps: ClientCapabilities) {
        self.inner
            .substitute_glyphs
            .store(!caps.nerd_font, Ordering::SeqCst);
    }

    /// Apply the glyph substitution the current client needs.
    pub fn filter_output(&self, chunk: &str) -> String {
        if self.inner.substitute_glyphs.load(Ordering::SeqCst) {
            substitute_glyphs(chunk)
        } else {
            chunk.to_string()
        }
    }
}

/// Replace Nerd Font private-use glyphs with plain Unicode the browser
/// can render.
fn substitute_glyphs(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{e0b0}' | '\u{e0b1}' => '\u{25b6}', // powerline arrows → ▶
            '\u{e0b2}' | '\u{e0b3}' => '\u{25c0}',
            '\u{f00c}' => '\u{2713}', // check
            '\u{f00d}' => '\u{2717}', // cross
            '\u{f061}' => '\u{2192}', // arrow-right
            '\u{f07b}' | '\u{e5fe}' => '\u{25a1}', // folder
            c if ('\u{e000}'..='\u{f8ff}').contains(&c) => '\u{25aa}',
            c => c,
        })
        .collect()
}

#[cfg(unix)]
fn tty_size() -> Option<(u16, u16)> {
    let mut size = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // Safety: TIOCGWINSZ only writes the winsize struct.
    let rc = unsafe { libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut size) };
    if rc == 0 && size.ws_col > 0 && size.ws_row > 0 {
        Some((size.ws_col, size.ws_row))
    } else {
        None
    }
}

#[cfg(not(unix))]
fn tty_size() -> Option<(u16, u16)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_bridge() -> (MirroredTerminal, mpsc::UnboundedReceiver<String>) {
        MirroredTerminal::with_tty_mirroring(false)
    }

    #[tokio::test]
    async fn written_chunks_reach_the_subscriber() {
        let (bridge, _input) = test_bridge();
        let mut sub = bridge.subscribe().expect("subscribe");
        bridge.write("hello\r\n");
        assert_eq!(sub.output_rx.recv().await.expect("chunk"), "hello\r\n");
    }

    #[test]
    fn only_one_subscriber_at_a_time() {
        let (bridge, _input) = test_bridge();
        let first = bridge.subscribe().expect("first");
        assert!(matches!(bridge.subscribe(), Err(BridgeError::Occupied)));

        drop(first);
        assert!(bridge.subscribe().is_ok());
    }

    #[tokio::test]
    async fn injected_input_reaches_the_host() {
        let (bridge, mut input) = test_bridge();
        bridge.inject_input("ls\r");
        assert_eq!(input.recv().await.expect("input"), "ls\r");
    }

    #[test]
    fn size_override_wins_until_cleared() {
        let (bridge, _input) = test_bridge();
        let fallback = bridge.size();
        bridge.set_size(120, 40);
        assert_eq!(bridge.size(), (120, 40));
        bridge.clear_size();
        assert_eq!(bridge.size(), fallback);
    }

    #[test]
    fn render_hook_receives_the_clear_flag() {
        let (bridge, _input) = test_bridge();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        bridge.set_render_hook(Arc::new(move |clear| {
            sink.lock().expect("lock").push(clear);
        }));
        bridge.request_full_render(true);
        bridge.request_full_render(false);
        assert_eq!(calls.lock().expect("lock").as_slice(), [true, false]);
    }

    #[test]
    fn glyphs_are_substituted_only_without_nerd_font() {
        let (bridge, _input) = test_bridge();
        let text = "ok \u{e0b0} \u{f00c} plain";

        bridge.set_client_capabilities(ClientCapabilities { nerd_font: true });
        assert_eq!(bridge.filter_output(text), text);

        bridge.set_client_capabilities(ClientCapabilities { nerd_font: false });
        let filtered = bridge.filter_output(text);
        assert!(!filtered.contains('\u{e0b0}'));
        assert!(filtered.contains('\u{2713}'));
        assert!(filtered.ends_with("plain"));
    }
}
