//! Error types for the Task++ core library.

use thiserror::Error;

/// All errors that can occur within the Task++ core library.
#[derive(Debug, Error)]
pub enum TaskppError {
    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A record could not be serialised to or deserialised from JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An operation needs the encryption key but the keys are locked.
    #[error("Keys not unlocked")]
    NotUnlocked,

    /// `unlock_keys` was called on a store whose keys were never initialised.
    #[error("Keys not initialized")]
    NotInitialized,

    /// `init_keys` was called on a store that already has a salt.
    #[error("Keys already initialized")]
    AlreadyInitialized,

    /// An empty passphrase was supplied.
    #[error("Passphrase is required")]
    EmptyPassphrase,

    /// Key derivation was attempted with an empty salt.
    #[error("Salt is required")]
    EmptySalt,

    /// The key-derivation function rejected its parameters or output length.
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// A ciphertext is shorter than the nonce that must prefix it.
    #[error("Ciphertext too short")]
    CiphertextTooShort,

    /// AEAD authentication failed: the data was tampered with or the key is wrong.
    #[error("Decryption failed: authentication tag mismatch")]
    AuthFailure,

    /// Task fields were rejected by domain validation.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A mutation that needs a task id was called without one.
    #[error("Missing id")]
    MissingId,

    /// A task id was requested that does not exist in the store.
    #[error("Task not found: {0}")]
    NotFound(String),

    /// A due date string is not a `YYYY-MM-DD` calendar date.
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    /// A record could not be encoded or sealed for storage.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An event or stored record is malformed.
    #[error("Decode error: {0}")]
    Decode(String),

    /// A registry handle does not refer to a live core.
    #[error("Core handle not found: {0}")]
    HandleNotFound(u64),
}

/// Convenience alias that pins the error type to [`TaskppError`].
pub type Result<T> = std::result::Result<T, TaskppError>;

impl TaskppError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(e) => format!("Failed to save: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
            Self::NotUnlocked => "Unlock your task store first".to_string(),
            Self::NotInitialized => "Set a passphrase before unlocking".to_string(),
            Self::AlreadyInitialized => "A passphrase is already set for this store".to_string(),
            Self::EmptyPassphrase => "Please enter a passphrase".to_string(),
            Self::EmptySalt | Self::KeyDerivation(_) => "Could not derive the encryption key".to_string(),
            Self::CiphertextTooShort | Self::AuthFailure => {
                "Could not decrypt data. Check your passphrase".to_string()
            }
            Self::ValidationFailed(msg) => msg.clone(),
            Self::MissingId => "Task id is required".to_string(),
            Self::NotFound(_) => "Task no longer exists".to_string(),
            Self::InvalidDate(date) => format!("Not a valid date: {date}"),
            Self::Encode(msg) => format!("Could not save data: {msg}"),
            Self::Decode(msg) => format!("Sync data could not be read: {msg}"),
            Self::HandleNotFound(_) => "Task store is not open".to_string(),
        }
    }

    /// Returns `true` if calling `unlock_keys` and retrying can clear this error.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::NotUnlocked)
    }
}
