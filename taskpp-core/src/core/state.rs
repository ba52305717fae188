//! Singleton state rows and conflict records.

use crate::core::task::{opt_timestamp, timestamp};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier stored in [`KeyState::kdf`].
pub const KDF_SCRYPT: &str = "scrypt";

/// Persisted key-derivation metadata. The key itself is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyState {
    pub salt: Vec<u8>,
    pub kdf: String,
    pub updated_at: Option<DateTime<Utc>>,
}

impl KeyState {
    /// A non-empty salt is the only signal that keys were initialised.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        !self.salt.is_empty()
    }
}

/// Per-store sync bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Highest sequence number this device has assigned to a local event.
    pub last_seq: i64,
    #[serde(default, with = "opt_timestamp")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Stable identity of this store, assigned once.
    pub device_id: String,
    /// Opaque marker reserved for transport layers.
    #[serde(default)]
    pub server_tag: String,
}

/// How a recorded conflict was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The local task was kept; the remote snapshot was older.
    #[default]
    LwwLocal,
}

impl Resolution {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LwwLocal => "lww_local",
        }
    }
}

/// A remote event rejected because the local task had a newer `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub task_id: String,
    #[serde(with = "timestamp")]
    pub local_updated_at: DateTime<Utc>,
    pub remote_event_id: String,
    #[serde(with = "timestamp")]
    pub remote_ts: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub detected_at: DateTime<Utc>,
    pub resolution: Resolution,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_state_initialized_only_with_salt() {
        assert!(!KeyState::default().is_initialized());
        let state = KeyState {
            salt: vec![1; 16],
            kdf: KDF_SCRYPT.to_string(),
            updated_at: Some(Utc::now()),
        };
        assert!(state.is_initialized());
    }

    #[test]
    fn test_resolution_wire_name() {
        assert_eq!(
            serde_json::to_string(&Resolution::LwwLocal).unwrap(),
            r#""lww_local""#
        );
        assert_eq!(Resolution::LwwLocal.as_str(), "lww_local");
    }
}
