//! Core library for Task++, a local-first task tracker whose data is always
//! encrypted at rest and synced between devices through an event log.
//!
//! The primary entry point is [`Core`], which represents one open task store
//! and its key session. Every task mutation goes through `Core` methods, which
//! keep the encrypted task rows, the event log and the sync counter in step.
//! [`CoreRegistry`] hands out integer handles for hosts embedding several stores.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    config::{CoreConfig, DEFAULT_STORAGE_PATH},
    crypto::{Cipher, KdfParams, KeyManager},
    error::{Result, TaskppError},
    event::{Event, EventEnvelope, EventKind},
    event_log::EventLog,
    facade::{Core, ImportReport},
    reconcile::{apply_event, Verdict},
    registry::CoreRegistry,
    state::{Conflict, KeyState, Resolution, SyncState},
    storage::Storage,
    task::{Priority, ReorderItem, Task, TaskFilter, TaskInput, TaskStatus},
    task_store::{MigrationState, TaskStore},
    validate::{validate_task, ValidFields},
};
