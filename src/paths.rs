//! Filesystem locations for pi configuration.

use std::path::PathBuf;

/// The user-level agent configuration directory.
///
/// `$PI_CONFIG_DIR` when set, else `$HOME/.pi` (`%USERPROFILE%` on
/// Windows), else `.pi` under the temp dir so headless environments still
/// have somewhere to write.
pub fn agent_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PI_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir());
    home.join(".pi")
}

/// Root directory for installed tool plugins.
pub fn plugins_dir() -> PathBuf {
    agent_config_dir().join("plugins")
}
