//! Host UI contract exposed to dynamic tools.
//!
//! The interactive host (TUI) implements [`UserInterface`]; headless runs
//! have none, and every capability then fails with a recoverable error
//! instead of blocking.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UiError {
    #[error("no interactive UI is attached")]
    Unavailable,
    #[error("UI interaction failed: {0}")]
    Interaction(String),
}

/// Capabilities an attached UI provides to tools.
#[async_trait]
pub trait UserInterface: Send + Sync {
    /// Present options; `None` means the user dismissed the prompt.
    async fn select(&self, title: &str, options: &[String]) -> Result<Option<String>, UiError>;
    async fn confirm(&self, title: &str) -> Result<bool, UiError>;
    async fn input(&self, prompt: &str) -> Result<Option<String>, UiError>;
    fn notify(&self, message: &str);
    fn set_status(&self, message: &str);
}

/// Shared, swappable handle to the current UI.
///
/// The host injects or revokes the UI after tools are loaded
/// (headless ↔ interactive transitions), so tools go through this handle
/// on every interaction rather than capturing the UI at load time.
#[derive(Clone, Default)]
pub struct UiContext {
    inner: Arc<RwLock<Option<Arc<dyn UserInterface>>>>,
}

impl UiContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ui(&self, ui: Option<Arc<dyn UserInterface>>) {
        *self.inner.write().expect("ui lock") = ui;
    }

    pub fn has_ui(&self) -> bool {
        self.inner.read().expect("ui lock").is_some()
    }

    fn current(&self) -> Result<Arc<dyn UserInterface>, UiError> {
        self.inner
            .read()
            .expect("ui lock")
            .clone()
            .ok_or(UiError::Unavailable)
    }

    pub async fn select(&self, title: &str, options: &[String]) -> Result<Option<String>, UiError> {
        self.current()?.select(title, options).await
    }

    pub async fn confirm(&self, title: &str) -> Result<bool, UiError> {
        self.current()?.confirm(title).await
    }

    pub async fn input(&self, prompt: &str) -> Result<Option<String>, UiError> {
        self.current()?.input(prompt).await
    }

    pub fn notify(&self, message: &str) {
        if let Ok(ui) = self.current() {
            ui.notify(message);
        }
    }

    pub fn set_status(&self, message: &str) {
        if let Ok(ui) = self.current() {
            ui.set_status(message);
        }
    }
}

impl std::fmt::Debug for UiContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiContext")
            .field("has_ui", &self.has_ui())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn headless_capabilities_fail_recoverably() {
        let ctx = UiContext::new();
        assert!(!ctx.has_ui());
        assert!(matches!(ctx.confirm("sure?").await, Err(UiError::Unavailable)));
        assert!(matches!(ctx.input("name?").await, Err(UiError::Unavailable)));
        // Fire-and-forget capabilities are silently dropped.
        ctx.notify("hello");
        ctx.set_status("working");
    }

    struct CannedUi;

    #[async_trait]
    impl UserInterface for CannedUi {
        async fn select(
            &self,
            _title: &str,
            options: &[String],
        ) -> Result<Option<String>, UiError> {
            Ok(options.first().cloned())
        }
        async fn confirm(&self, _title: &str) -> Result<bool, UiError> {
            Ok(true)
        }
        async fn input(&self, _prompt: &str) -> Result<Option<String>, UiError> {
            Ok(Some("typed".to_string()))
        }
        fn notify(&self, _message: &str) {}
        fn set_status(&self, _message: &str) {}
    }

    #[tokio::test]
    async fn injected_ui_takes_over_and_can_be_revoked() {
        let ctx = UiContext::new();
        ctx.set_ui(Some(Arc::new(CannedUi)));
        assert!(ctx.has_ui());
        assert!(ctx.confirm("sure?").await.expect("confirm"));
        assert_eq!(
            ctx.select("pick", &["a".into(), "b".into()]).await.expect("select"),
            Some("a".to_string())
        );

        ctx.set_ui(None);
        assert!(matches!(ctx.confirm("again?").await, Err(UiError::Unavailable)));
    }
}
