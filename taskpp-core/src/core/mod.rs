//! Internal domain modules for the Task++ core library.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod config;
pub mod crypto;
pub mod error;
pub mod event;
pub mod event_log;
pub mod facade;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod storage;
pub mod task;
pub mod task_store;
pub mod validate;

#[doc(inline)]
pub use config::CoreConfig;
#[doc(inline)]
pub use crypto::{Cipher, KdfParams, KeyManager};
#[doc(inline)]
pub use error::{Result, TaskppError};
#[doc(inline)]
pub use event::{Event, EventEnvelope, EventKind};
#[doc(inline)]
pub use event_log::EventLog;
#[doc(inline)]
pub use facade::{Core, ImportReport};
#[doc(inline)]
pub use reconcile::Verdict;
#[doc(inline)]
pub use registry::CoreRegistry;
#[doc(inline)]
pub use state::{Conflict, KeyState, Resolution, SyncState};
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use task::{Priority, ReorderItem, Task, TaskFilter, TaskInput, TaskStatus};
#[doc(inline)]
pub use task_store::{MigrationState, TaskStore};
