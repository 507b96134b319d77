//! Web terminal: mirror the interactive session to a local browser.
//!
//! Three pieces: the single-writer [`MirroredTerminal`] bridge over the
//! host TTY, binding enumeration/classification, and the HTTP/WebSocket
//! server that serves the client bundle and relays frames.

mod assets;
pub mod bindings;
pub mod bridge;
pub mod server;

pub use bindings::{enumerate_bindings, resolve_saved, InterfaceBinding, ResolvedBindings};
pub use bridge::{BridgeError, ClientCapabilities, MirroredTerminal, TerminalSubscription};
pub use server::{BindingFailure, WebTermServer};
