//! Integer handles for hosts that cannot hold a [`Core`] directly.

use crate::{Core, CoreConfig, Result, TaskppError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Maps caller-visible handles to open [`Core`]s.
///
/// The map lock is held only to look a handle up; each core has its own lock,
/// so calls on different handles do not wait on each other and calls on the
/// same handle run one at a time. Handles start at 1 and are never reused.
#[derive(Debug, Default)]
pub struct CoreRegistry {
    inner: Mutex<Slots>,
}

#[derive(Debug, Default)]
struct Slots {
    last: u64,
    cores: HashMap<u64, Arc<Mutex<Core>>>,
}

impl CoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a core from `config` and registers it.
    pub fn open(&self, config: &CoreConfig) -> Result<u64> {
        let core = Core::open(config)?;
        Ok(self.insert(core))
    }

    /// Registers an already-open core and returns its new handle.
    pub fn insert(&self, core: Core) -> u64 {
        let mut slots = self.slots();
        slots.last += 1;
        let handle = slots.last;
        slots.cores.insert(handle, Arc::new(Mutex::new(core)));
        log::debug!("Registered core handle {handle}");
        handle
    }

    /// Runs `f` against the core behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::HandleNotFound`] for an unknown or closed handle,
    /// otherwise whatever `f` returns.
    pub fn with<R>(&self, handle: u64, f: impl FnOnce(&mut Core) -> Result<R>) -> Result<R> {
        let core = self
            .slots()
            .cores
            .get(&handle)
            .cloned()
            .ok_or(TaskppError::HandleNotFound(handle))?;
        let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut core)
    }

    /// Unregisters `handle` and closes its core once no call is using it.
    pub fn close(&self, handle: u64) -> Result<()> {
        let core = self
            .slots()
            .cores
            .remove(&handle)
            .ok_or(TaskppError::HandleNotFound(handle))?;
        log::debug!("Closed core handle {handle}");
        match Arc::try_unwrap(core) {
            Ok(core) => core.into_inner().unwrap_or_else(PoisonError::into_inner).close(),
            // A call still in flight holds the last reference; the core closes when it drops.
            Err(_) => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.slots().cores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
