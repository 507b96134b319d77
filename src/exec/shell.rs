//! Shell resolution for the process executor.
//!
//! Resolved once per process and cached; tools and transports all run
//! commands through the same shell.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ShellError {
    #[error("shell not found at {0}")]
    NotFound(PathBuf),
    #[error(
        "no usable shell found. Install bash (on Windows, Git Bash from \
         https://git-scm.com/downloads) and ensure it is on PATH"
    )]
    NoShell,
}

static RESOLVED_SHELL: OnceLock<Result<PathBuf, ShellError>> = OnceLock::new();

/// Resolve the shell used for command execution.
///
/// A user-supplied absolute path wins when it exists; otherwise the
/// process-wide cached resolution is used: `$SHELL` → `bash` → `sh` on
/// POSIX, the Git Bash install locations → `bash.exe` on PATH on Windows.
pub fn resolve_shell(user_shell: Option<&Path>) -> Result<PathBuf, ShellError> {
    if let Some(path) = user_shell {
        if path.is_absolute() {
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            return Err(ShellError::NotFound(path.to_path_buf()));
        }
    }

    RESOLVED_SHELL
        .get_or_init(resolve_default_shell)
        .clone()
}

#[cfg(unix)]
fn resolve_default_shell() -> Result<PathBuf, ShellError> {
    if let Ok(shell) = std::env::var("SHELL") {
        let path = PathBuf::from(&shell);
        if path.is_file() {
            return Ok(path);
        }
    }
    for candidate in ["bash", "sh"] {
        if let Ok(path) = which::which(candidate) {
            return Ok(path);
        }
    }
    Err(ShellError::NoShell)
}

#[cfg(windows)]
fn resolve_default_shell() -> Result<PathBuf, ShellError> {
    // Standard Git for Windows install locations, then PATH.
    let known = [
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
        r"C:\Program Files\Git\usr\bin\bash.exe",
    ];
    for candidate in known {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    if let Ok(path) = which::which("bash.exe") {
        return Ok(path);
    }
    Err(ShellError::NoShell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_some_shell_on_posix() {
        let shell = resolve_shell(None).expect("a shell must exist in CI");
        assert!(shell.is_absolute());
    }

    #[test]
    fn user_shell_must_exist() {
        let missing = Path::new("/definitely/not/a/shell");
        assert!(matches!(
            resolve_shell(Some(missing)),
            Err(ShellError::NotFound(_))
        ));
    }

    #[test]
    fn relative_user_shell_falls_back() {
        // Relative paths are ignored; the cached default applies.
        let shell = resolve_shell(Some(Path::new("bash"))).expect("fallback");
        assert!(shell.is_absolute());
    }
}
