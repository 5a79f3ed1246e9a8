//! Append-only audit trail.
//!
//! Every lifecycle transition is recorded before the transition takes
//! effect, so the trail never lags the state machine. Entries are held
//! in memory in arrival order and optionally mirrored to a JSONL file;
//! a file write failure is logged and never blocks the action.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// One immutable audit record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub action_id: Uuid,
    pub action_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_id: Option<String>,
    pub status: String,
    /// Terminal disposition: "success", "error", or "blocked".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action_id: Uuid, action_type: &str, status: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            action_id,
            action_type: action_type.to_string(),
            skill_id: None,
            status: status.to_string(),
            outcome: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn skill_id(mut self, skill_id: Option<&str>) -> Self {
        self.skill_id = skill_id.map(str::to_string);
        self
    }

    pub fn outcome(mut self, outcome: &str) -> Self {
        self.outcome = Some(outcome.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// In-memory, append-only audit log with an optional file sink.
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    file: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            file,
        }
    }

    /// Appends one entry. The only mutation the log supports.
    pub fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            "action={} type={} status={}{}",
            entry.action_id,
            entry.action_type,
            entry.status,
            entry
                .outcome
                .as_deref()
                .map(|o| format!(" outcome={o}"))
                .unwrap_or_default()
        );
        if let Some(path) = &self.file {
            if let Err(e) = append_jsonl(path, &entry) {
                warn!("audit file write failed: {e}");
            }
        }
        self.entries.lock().expect("audit entries").push(entry);
    }

    /// Most recent entries first, at most `limit`.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock().expect("audit entries");
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// All entries in arrival order.
    pub fn all(&self) -> Vec<AuditEntry> {
        self.entries.lock().expect("audit entries").clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("audit entries").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn append_jsonl(path: &PathBuf, entry: &AuditEntry) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(entry)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    writeln!(file, "{line}")
}
