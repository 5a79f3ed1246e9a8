//! In-memory secrets vault with ordered access levels.
//!
//! Collaborator surface only: `store`/`retrieve` by key and access
//! level, plus an access trail. Values never leave process memory and
//! encryption at rest is out of scope here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Access levels, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Standard,
    Elevated,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessLevel::Public => "public",
            AccessLevel::Standard => "standard",
            AccessLevel::Elevated => "elevated",
            AccessLevel::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

struct VaultEntry {
    value: String,
    access_level: AccessLevel,
}

/// One recorded vault access.
#[derive(Debug, Clone, Serialize)]
pub struct VaultAccess {
    pub timestamp: DateTime<Utc>,
    pub action: &'static str,
    pub key: String,
    pub level: AccessLevel,
}

pub struct SecretsVault {
    entries: Mutex<HashMap<String, VaultEntry>>,
    access_log: Mutex<Vec<VaultAccess>>,
}

impl SecretsVault {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            access_log: Mutex::new(Vec::new()),
        }
    }

    /// Stores a value under `key`, readable only by requesters at
    /// `access_level` or above. Overwrites any previous entry.
    pub fn store(&self, key: &str, value: &str, access_level: AccessLevel) -> bool {
        let mut entries = self.entries.lock().expect("vault lock");
        entries.insert(
            key.to_string(),
            VaultEntry {
                value: value.to_string(),
                access_level,
            },
        );
        drop(entries);
        self.log_access("store", key, access_level);
        info!("vault: stored entry {key} ({access_level})");
        true
    }

    /// Retrieves a value. Returns None for unknown keys or when the
    /// requester's level is below the entry's; denials are logged but
    /// indistinguishable from misses to the caller.
    pub fn retrieve(&self, key: &str, requester_level: AccessLevel) -> Option<String> {
        let entries = self.entries.lock().expect("vault lock");
        let entry = entries.get(key)?;
        if requester_level < entry.access_level {
            warn!(
                "vault: access denied for {key} (requested {requester_level}, required {})",
                entry.access_level
            );
            return None;
        }
        let value = entry.value.clone();
        drop(entries);
        self.log_access("retrieve", key, requester_level);
        Some(value)
    }

    pub fn access_log(&self) -> Vec<VaultAccess> {
        self.access_log.lock().expect("vault log lock").clone()
    }

    fn log_access(&self, action: &'static str, key: &str, level: AccessLevel) {
        self.access_log
            .lock()
            .expect("vault log lock")
            .push(VaultAccess {
                timestamp: Utc::now(),
                action,
                key: key.to_string(),
                level,
            });
    }
}

impl Default for SecretsVault {
    fn default() -> Self {
        Self::new()
    }
}
