//! Per-channel conversation log: append-only JSONL that doubles as the
//! LLM context source.
//!
//! The first line is always a session header; entries are identified by
//! their line offset and never rewritten. Compaction appends a new entry
//! type instead of editing history, so the append-order invariant holds
//! across restarts.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextLogError {
    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("corrupt log: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEntry {
    Session {
        id: String,
        timestamp: DateTime<Utc>,
        cwd: String,
    },
    Message {
        timestamp: DateTime<Utc>,
        message: Value,
    },
    ThinkingLevelChange {
        timestamp: DateTime<Utc>,
        #[serde(rename = "thinkingLevel")]
        thinking_level: String,
    },
    ModelChange {
        timestamp: DateTime<Utc>,
        provider: String,
        #[serde(rename = "modelId")]
        model_id: String,
    },
    Compaction {
        timestamp: DateTime<Utc>,
        summary: String,
        #[serde(rename = "keptIndices")]
        kept_indices: Vec<usize>,
    },
}

/// One line of the companion human-readable channel log (read-only).
#[derive(Debug, Deserialize)]
pub struct ExternalLogEntry {
    pub ts: Value,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(rename = "userName", default)]
    pub user_name: Option<String>,
    pub text: String,
    #[serde(rename = "isBot", default)]
    pub is_bot: bool,
    #[serde(default)]
    pub date: Option<String>,
}

pub struct ContextLog {
    path: PathBuf,
    entries: Vec<ContextEntry>,
}

impl ContextLog {
    /// Open an existing log or start a new one with a session header.
    pub fn open(path: impl Into<PathBuf>, cwd: &Path) -> Result<Self, ContextLogError> {
        let path = path.into();
        if !path.exists() || std::fs::metadata(&path)?.len() == 0 {
            let mut log = Self {
                path,
                entries: Vec::new(),
            };
            log.write_session_header(cwd)?;
            return Ok(log);
        }

        let text = std::fs::read_to_string(&path)?;
        let mut entries = Vec::new();
        for (offset, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ContextEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(offset, error = %e, "skipping malformed log line");
                }
            }
        }
        if !matches!(entries.first(), Some(ContextEntry::Session { .. })) {
            return Err(ContextLogError::Corrupt(
                "first entry is not a session header".to_string(),
            ));
        }
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[ContextEntry] {
        &self.entries
    }

    pub fn session_id(&self) -> Option<&str> {
        match self.entries.first() {
            Some(ContextEntry::Session { id, .. }) => Some(id),
            _ => None,
        }
    }

    fn write_session_header(&mut self, cwd: &Path) -> Result<(), ContextLogError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.append(ContextEntry::Session {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            cwd: cwd.display().to_string(),
        })
    }

    /// Append one entry; writes are strictly ordered.
    pub fn append(&mut self, entry: ContextEntry) -> Result<(), ContextLogError> {
        let line = serde_json::to_string(&entry)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        self.entries.push(entry);
        Ok(())
    }

    pub fn append_message(&mut self, message: Value) -> Result<(), ContextLogError> {
        self.append(ContextEntry::Message {
            timestamp: Utc::now(),
            message,
        })
    }

    pub fn append_thinking_level_change(
        &mut self,
        level: impl Into<String>,
    ) -> Result<(), ContextLogError> {
        self.append(ContextEntry::ThinkingLevelChange {
            timestamp: Utc::now(),
            thinking_level: level.into(),
        })
    }

    pub fn append_model_change(
        &mut self,
        provider: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Result<(), ContextLogError> {
        self.append(ContextEntry::ModelChange {
            timestamp: Utc::now(),
            provider: provider.into(),
            model_id: model_id.into(),
        })
    }

    /// Truncate everything and start a fresh session.
    pub fn reset(&mut self, cwd: &Path) -> Result<(), ContextLogError> {
        std::fs::write(&self.path, b"")?;
        self.entries.clear();
        self.write_session_header(cwd)
    }

    /// Reconcile with the external channel log: every external entry
    /// whose `ts` is strictly before `anchor_ts` and whose normalized
    /// text is not already present is appended as a user message.
    /// Idempotent: running it twice adds nothing the second time.
    pub fn sync_from_log(
        &mut self,
        external_log: &Path,
        anchor_ts: DateTime<Utc>,
    ) -> Result<usize, ContextLogError> {
        let Ok(text) = std::fs::read_to_string(external_log) else {
            return Ok(0);
        };

        let mut known: HashSet<String> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                ContextEntry::Message { message, .. } => message_text(message).map(normalize_text),
                _ => None,
            })
            .collect();

        let mut appended = 0;
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<ExternalLogEntry>(line) else {
                continue;
            };
            let Some(ts) = parse_ts(&entry.ts) else {
                continue;
            };
            if ts >= anchor_ts {
                continue;
            }
            let normalized = normalize_text(&entry.text);
            if normalized.is_empty() || known.contains(&normalized) {
                continue;
            }
            self.append(ContextEntry::Message {
                timestamp: ts,
                message: serde_json::json!({"role": "user", "content": entry.text}),
            })?;
            known.insert(normalized);
            appended += 1;
        }
        if appended > 0 {
            tracing::debug!(appended, "synced entries from external log");
        }
        Ok(appended)
    }

    /// Record a compaction: a summary plus the line offsets of entries
    /// still considered live. History is never rewritten.
    pub fn compact(&mut self, summary: String, keep_last: usize) -> Result<(), ContextLogError> {
        let kept_indices: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, ContextEntry::Message { .. }))
            .map(|(i, _)| i)
            .rev()
            .take(keep_last)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        self.append(ContextEntry::Compaction {
            timestamp: Utc::now(),
            summary,
            kept_indices,
        })
    }

    /// Messages for the next LLM request, honoring the latest compaction:
    /// the summary stands in for everything before it, followed by the
    /// kept messages and everything after the compaction entry.
    pub fn messages_for_llm(&self) -> Vec<Value> {
        let last_compaction = self
            .entries
            .iter()
            .enumerate()
            .rev()
            .find_map(|(i, e)| match e {
                ContextEntry::Compaction {
                    summary,
                    kept_indices,
                    ..
                } => Some((i, summary.clone(), kept_indices.clone())),
                _ => None,
            });

        let Some((at, summary, kept_indices)) = last_compaction else {
            return self
                .entries
                .iter()
                .filter_map(|e| match e {
                    ContextEntry::Message { message, .. } => Some(message.clone()),
                    _ => None,
                })
                .collect();
        };

        let mut messages = vec![serde_json::json!({
            "role": "user",
            "content": format!("[conversation summary]\n{summary}"),
        })];
        for index in kept_indices {
            if let Some(ContextEntry::Message { message, .. }) = self.entries.get(index) {
                messages.push(message.clone());
            }
        }
        for entry in &self.entries[at + 1..] {
            if let ContextEntry::Message { message, .. } = entry {
                messages.push(message.clone());
            }
        }
        messages
    }
}

fn message_text(message: &Value) -> Option<&str> {
    message.get("content").and_then(Value::as_str)
}

/// `ts` in the external log is either epoch milliseconds or RFC 3339.
fn parse_ts(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(ms) = value.as_f64() {
        return DateTime::from_timestamp_millis(ms as i64);
    }
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn stamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:[+-]\d{2}:\d{2})?\]\s*",
        )
        .expect("valid regex")
    })
}

fn attachments_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)\s*<slack_attachments>.*</slack_attachments>\s*$").expect("valid regex")
    })
}

/// Strip the leading timestamp stamp and any trailing attachments block
/// so the same semantic message deduplicates.
pub fn normalize_text(text: &str) -> String {
    let text = stamp_pattern().replace(text, "");
    let text = attachments_pattern().replace(&text, "");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn open_log(dir: &Path) -> ContextLog {
        ContextLog::open(dir.join("context.jsonl"), dir).expect("open")
    }

    #[test]
    fn new_log_starts_with_session_header() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = open_log(tmp.path());
        assert_eq!(log.entries().len(), 1);
        assert!(matches!(log.entries()[0], ContextEntry::Session { .. }));
        assert!(log.session_id().is_some());
    }

    #[test]
    fn entries_survive_reopen_in_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("context.jsonl");
        let session_id;
        {
            let mut log = ContextLog::open(&path, tmp.path()).expect("open");
            session_id = log.session_id().expect("id").to_string();
            log.append_message(json!({"role": "user", "content": "hello"}))
                .expect("append");
            log.append(ContextEntry::ModelChange {
                timestamp: Utc::now(),
                provider: "anthropic".to_string(),
                model_id: "sonnet".to_string(),
            })
            .expect("append");
        }

        let log = ContextLog::open(&path, tmp.path()).expect("reopen");
        assert_eq!(log.entries().len(), 3);
        assert_eq!(log.session_id().expect("id"), session_id);
        assert!(matches!(&log.entries()[2], ContextEntry::ModelChange { model_id, .. }
            if model_id == "sonnet"));
    }

    #[test]
    fn reset_truncates_and_restarts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        let old_session = log.session_id().expect("id").to_string();
        log.append_message(json!({"role": "user", "content": "hello"}))
            .expect("append");

        log.reset(tmp.path()).expect("reset");
        assert_eq!(log.entries().len(), 1);
        assert_ne!(log.session_id().expect("id"), old_session);
    }

    #[test]
    fn wire_format_matches_the_contract() {
        let entry = ContextEntry::ThinkingLevelChange {
            timestamp: Utc::now(),
            thinking_level: "high".to_string(),
        };
        let line = serde_json::to_string(&entry).expect("serialize");
        assert!(line.contains(r#""type":"thinking_level_change""#));
        assert!(line.contains(r#""thinkingLevel":"high""#));

        let entry = ContextEntry::ModelChange {
            timestamp: Utc::now(),
            provider: "anthropic".to_string(),
            model_id: "sonnet".to_string(),
        };
        let line = serde_json::to_string(&entry).expect("serialize");
        assert!(line.contains(r#""modelId":"sonnet""#));
    }

    #[test]
    fn helper_appenders_write_typed_entries() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        log.append_thinking_level_change("high").expect("append");
        log.append_model_change("anthropic", "sonnet").expect("append");

        assert!(matches!(
            &log.entries()[1],
            ContextEntry::ThinkingLevelChange { thinking_level, .. } if thinking_level == "high"
        ));
        assert!(matches!(
            &log.entries()[2],
            ContextEntry::ModelChange { provider, .. } if provider == "anthropic"
        ));
    }

    #[test]
    fn normalization_strips_stamp_and_attachments() {
        assert_eq!(
            normalize_text("[2026-07-01 10:30:00+02:00] hello there"),
            "hello there"
        );
        assert_eq!(
            normalize_text("note<slack_attachments>{\"x\":1}</slack_attachments>"),
            "note"
        );
        assert_eq!(normalize_text("plain"), "plain");
    }

    fn write_external(dir: &Path, lines: &[Value]) -> PathBuf {
        let path = dir.join("channel.jsonl");
        let text: String = lines.iter().map(|l| format!("{l}\n")).collect();
        std::fs::write(&path, text).expect("write");
        path
    }

    #[test]
    fn sync_appends_only_older_unseen_messages() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        log.append_message(json!({"role": "user", "content": "already here"}))
            .expect("append");

        let anchor = Utc::now();
        let old_ts = (anchor.timestamp_millis() - 60_000) as f64;
        let future_ts = (anchor.timestamp_millis() + 60_000) as f64;
        let external = write_external(
            tmp.path(),
            &[
                json!({"ts": old_ts, "user": "u1", "text": "new message", "isBot": false, "date": "2026-07-01"}),
                json!({"ts": old_ts, "user": "u1", "text": "already here", "isBot": false, "date": "2026-07-01"}),
                json!({"ts": future_ts, "user": "u1", "text": "too new", "isBot": false, "date": "2026-07-01"}),
            ],
        );

        let appended = log.sync_from_log(&external, anchor).expect("sync");
        assert_eq!(appended, 1);
        let texts: Vec<String> = log
            .messages_for_llm()
            .iter()
            .filter_map(|m| m["content"].as_str().map(String::from))
            .collect();
        assert!(texts.contains(&"new message".to_string()));
        assert!(!texts.contains(&"too new".to_string()));
    }

    #[test]
    fn sync_is_idempotent() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        let anchor = Utc::now();
        let old_ts = (anchor.timestamp_millis() - 60_000) as f64;
        let external = write_external(
            tmp.path(),
            &[json!({
                "ts": old_ts,
                "user": "u1",
                "text": "[2026-07-01 10:30:00+02:00] stamped hello",
                "isBot": false,
                "date": "2026-07-01"
            })],
        );

        assert_eq!(log.sync_from_log(&external, anchor).expect("sync"), 1);
        let after_first = std::fs::read_to_string(log.path()).expect("read");
        assert_eq!(log.sync_from_log(&external, anchor).expect("sync"), 0);
        let after_second = std::fs::read_to_string(log.path()).expect("read");
        assert_eq!(after_first, after_second);
    }

    #[test]
    fn stamped_duplicates_are_deduplicated() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        log.append_message(json!({"role": "user", "content": "hello world"}))
            .expect("append");

        let anchor = Utc::now();
        let old_ts = (anchor.timestamp_millis() - 60_000) as f64;
        let external = write_external(
            tmp.path(),
            &[json!({
                "ts": old_ts,
                "user": "u1",
                "text": "[2026-07-01 10:30:00+02:00] hello world",
                "isBot": false,
                "date": "2026-07-01"
            })],
        );
        assert_eq!(log.sync_from_log(&external, anchor).expect("sync"), 0);
    }

    #[test]
    fn compaction_preserves_append_order() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        for i in 0..5 {
            log.append_message(json!({"role": "user", "content": format!("m{i}")}))
                .expect("append");
        }
        log.compact("earlier discussion about m0-m2".to_string(), 2)
            .expect("compact");
        log.append_message(json!({"role": "user", "content": "after"}))
            .expect("append");

        // History is intact: 1 header + 5 messages + compaction + 1 more.
        assert_eq!(log.entries().len(), 8);

        let messages = log.messages_for_llm();
        let texts: Vec<&str> = messages.iter().filter_map(|m| m["content"].as_str()).collect();
        assert!(texts[0].starts_with("[conversation summary]"));
        assert_eq!(&texts[1..], &["m3", "m4", "after"]);
    }

    #[test]
    fn rfc3339_timestamps_are_accepted() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut log = open_log(tmp.path());
        let anchor = Utc::now();
        let old = anchor - chrono::Duration::minutes(5);
        let external = write_external(
            tmp.path(),
            &[json!({
                "ts": old.to_rfc3339(),
                "user": "u1",
                "text": "iso stamped",
                "isBot": false,
                "date": "2026-07-01"
            })],
        );
        assert_eq!(log.sync_from_log(&external, anchor).expect("sync"), 1);
    }
}
