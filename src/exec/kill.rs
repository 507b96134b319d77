//! Cross-platform process-tree kill.
//!
//! The fast path signals the process group; when the target is not a group
//! leader the tree is walked via `pgrep -P` (or `/proc` when pgrep is
//! missing) and signalled deepest-first so children die before parents.

use std::time::Duration;

/// Grace between SIGTERM and SIGKILL when callers do not specify one.
pub const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(300);

/// Kill `pid` and every descendant. Idempotent; missing pids are ignored;
/// never returns an error.
pub async fn kill_process_tree(pid: u32, grace: Duration) {
    if pid == 0 {
        return;
    }

    #[cfg(windows)]
    {
        let _ = tokio::process::Command::new("taskkill")
            .args(["/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await;
        let _ = grace;
    }

    #[cfg(unix)]
    {
        unix::kill_tree(pid, grace).await;
    }
}

#[cfg(unix)]
mod unix {
    use super::Duration;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::{getpgid, Pid};

    pub async fn kill_tree(pid: u32, grace: Duration) {
        let target = Pid::from_raw(pid.cast_signed());

        // Fast path: the child was started as a process-group leader, so a
        // group signal covers the whole tree.
        if getpgid(Some(target)) == Ok(target) {
            if grace.is_zero() {
                let _ = killpg(target, Signal::SIGKILL);
            } else {
                let _ = killpg(target, Signal::SIGTERM);
                tokio::time::sleep(grace).await;
                let _ = killpg(target, Signal::SIGKILL);
            }
            return;
        }

        // Fallback: walk the tree breadth-first and signal deepest-first.
        let mut tree = vec![pid];
        let mut frontier = vec![pid];
        while let Some(parent) = frontier.pop() {
            for child in children_of(parent).await {
                if !tree.contains(&child) {
                    tree.push(child);
                    frontier.push(child);
                }
            }
        }

        for p in tree.iter().rev() {
            let _ = nix::sys::signal::kill(Pid::from_raw(p.cast_signed()), Signal::SIGTERM);
        }
        if !grace.is_zero() {
            tokio::time::sleep(grace).await;
        }
        for p in tree.iter().rev() {
            let _ = nix::sys::signal::kill(Pid::from_raw(p.cast_signed()), Signal::SIGKILL);
        }
    }

    /// Direct children of `parent`, via `pgrep -P` when available, else by
    /// scanning `/proc/[pid]/stat` ppid fields.
    async fn children_of(parent: u32) -> Vec<u32> {
        if let Ok(output) = tokio::process::Command::new("pgrep")
            .args(["-P", &parent.to_string()])
            .output()
            .await
        {
            if output.status.success() || output.status.code() == Some(1) {
                return String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .filter_map(|l| l.trim().parse().ok())
                    .collect();
            }
        }
        children_from_proc(parent)
    }

    fn children_from_proc(parent: u32) -> Vec<u32> {
        let mut children = Vec::new();
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return children;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            // Field 4 is ppid; comm (field 2) may contain spaces, so parse
            // from the closing paren.
            let Some(rest) = stat.rfind(')').map(|i| &stat[i + 1..]) else {
                continue;
            };
            if rest.split_whitespace().nth(1) == Some(parent.to_string().as_str()) {
                children.push(pid);
            }
        }
        children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[tokio::test]
    async fn missing_pid_is_ignored() {
        // Should not panic or error for a pid that cannot exist.
        kill_process_tree(u32::MAX - 1, Duration::ZERO).await;
    }

    #[tokio::test]
    async fn kill_is_idempotent() {
        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let pid = child.id().expect("pid");

        kill_process_tree(pid, Duration::ZERO).await;
        kill_process_tree(pid, Duration::ZERO).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kills_descendants() {
        // A shell that spawns a grandchild sleep; the whole tree must die.
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 30 & wait"])
            .stdout(Stdio::null())
            .spawn()
            .expect("spawn sh");
        let pid = child.id().expect("pid");

        tokio::time::sleep(Duration::from_millis(100)).await;
        kill_process_tree(pid, Duration::from_millis(50)).await;

        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .expect("child must exit after kill")
            .expect("wait");
        assert!(!status.success());
    }
}
