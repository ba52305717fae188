//! Open-time configuration for a [`crate::Core`].

use crate::core::crypto::KdfParams;
use crate::core::storage::IN_MEMORY;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Database file used when no `storage_path` is given.
pub const DEFAULT_STORAGE_PATH: &str = "taskpp.db";

/// Settings a host passes when opening a store.
///
/// Parsed from the JSON object hosts send, e.g.
/// `{"storage_path": "/data/tasks.db", "device_id": "laptop"}`. Missing or
/// empty fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite file to open. `":memory:"` selects a private in-memory database.
    pub storage_path: Option<PathBuf>,
    /// Identity for events emitted by this store, used only if none is persisted yet.
    pub device_id: Option<String>,
    #[serde(skip)]
    pub kdf: KdfParams,
}

impl CoreConfig {
    /// Parses the host's JSON config; an empty or blank string means "all defaults".
    pub fn from_json(json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            storage_path: Some(PathBuf::from(IN_MEMORY)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// The database path to open.
    #[must_use]
    pub fn storage_path(&self) -> &Path {
        match &self.storage_path {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => Path::new(DEFAULT_STORAGE_PATH),
        }
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.storage_path() == Path::new(IN_MEMORY)
    }

    /// The configured device id, or a fresh random UUID when none is set.
    #[must_use]
    pub fn device_id(&self) -> String {
        match &self.device_id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        }
    }
}
