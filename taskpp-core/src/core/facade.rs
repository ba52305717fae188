//! The `Core` facade: one open task store plus its key session.

use crate::core::crypto::{Cipher, KeyManager};
use crate::core::event::{decode_payload, dedupe, sort_for_apply};
use crate::core::reconcile::{decide, decode_snapshot, Verdict};
use crate::core::state::KDF_SCRYPT;
use crate::core::task::parse_date;
use crate::core::validate::validate_task;
use crate::{
    Conflict, CoreConfig, Event, EventEnvelope, EventKind, EventLog, KeyState, MigrationState,
    ReorderItem, Resolution, Result, Storage, SyncState, Task, TaskFilter, TaskInput, TaskStore,
    TaskppError,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

/// Counts of what an [`Core::import_events`] call did with each distinct event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Events whose snapshot replaced (or deleted) the local task.
    pub applied: usize,
    /// Events rejected because the local task was newer.
    pub conflicts: usize,
    /// Events that tied with local state and were dropped silently.
    pub ignored: usize,
    /// Events already present in the local log.
    pub skipped: usize,
}

/// An open task store.
///
/// Every local mutation validates its input, writes the task, appends one
/// event and bumps the sync counter in a single transaction. Task reads and
/// writes need unlocked keys; the first one after unlocking also migrates a
/// legacy plaintext store (see [`TaskStore::ensure_encrypted`]).
///
/// Calls on one `Core` must be serialized by the host; see
/// [`crate::CoreRegistry`] for sharing several stores in one process.
#[derive(Debug)]
pub struct Core {
    storage: Storage,
    keys: KeyManager,
    tasks: TaskStore,
    events: EventLog,
    device_id: String,
}

impl Core {
    /// Opens (creating if needed) the store described by `config`. Keys start locked.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::Database`] if the database cannot be opened.
    pub fn open(config: &CoreConfig) -> Result<Self> {
        let storage = if config.is_in_memory() {
            Storage::open_in_memory()?
        } else {
            Storage::open(config.storage_path())?
        };
        let tasks = TaskStore::open(&storage)?;
        let events = EventLog::new();

        let persisted = events.sync_state(storage.connection())?.device_id;
        let device_id = if persisted.is_empty() { config.device_id() } else { persisted };

        log::info!(
            "Opened task store {} ({:?})",
            config.storage_path().display(),
            tasks.migration_state()
        );
        Ok(Self {
            storage,
            keys: KeyManager::with_params(config.kdf),
            tasks,
            events,
            device_id,
        })
    }

    /// Drops the key and closes the database.
    pub fn close(mut self) -> Result<()> {
        self.keys.lock();
        self.storage.close()
    }

    // ── key lifecycle ──────────────────────────────────────────────

    /// Sets the passphrase of a fresh store: generates and persists a salt,
    /// derives the key and leaves the store unlocked.
    ///
    /// # Errors
    ///
    /// [`TaskppError::EmptyPassphrase`], [`TaskppError::AlreadyInitialized`] if
    /// a salt is already stored, or [`TaskppError::KeyDerivation`].
    pub fn init_keys(&mut self, passphrase: &str) -> Result<()> {
        if passphrase.is_empty() {
            return Err(TaskppError::EmptyPassphrase);
        }
        if self.storage.key_state()?.is_initialized() {
            return Err(TaskppError::AlreadyInitialized);
        }

        let salt = KeyManager::new_salt();
        self.keys.derive_key(passphrase, &salt)?;
        self.storage.save_key_state(&KeyState {
            salt,
            kdf: KDF_SCRYPT.to_string(),
            updated_at: Some(Utc::now()),
        })?;
        log::info!("Initialized encryption keys");
        Ok(())
    }

    /// Derives the key from `passphrase` and the stored salt.
    ///
    /// Success only means a key was derived. A wrong passphrase is detected
    /// by the first decrypt, which fails with [`TaskppError::AuthFailure`].
    ///
    /// # Errors
    ///
    /// [`TaskppError::EmptyPassphrase`], [`TaskppError::NotInitialized`] if no
    /// salt is stored, or [`TaskppError::KeyDerivation`].
    pub fn unlock_keys(&mut self, passphrase: &str) -> Result<()> {
        if passphrase.is_empty() {
            return Err(TaskppError::EmptyPassphrase);
        }
        let state = self.storage.key_state()?;
        if !state.is_initialized() {
            return Err(TaskppError::NotInitialized);
        }
        self.keys.derive_key(passphrase, &state.salt)?;
        log::info!("Unlocked encryption keys");
        Ok(())
    }

    /// Forgets the in-memory key.
    pub fn lock_keys(&mut self) {
        self.keys.lock();
        log::info!("Locked encryption keys");
    }

    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.keys.is_unlocked()
    }

    // ── migration ──────────────────────────────────────────────────

    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        self.tasks.migration_state()
    }

    /// Runs the plaintext-to-ciphertext migration now instead of on first task access.
    pub fn migrate(&mut self) -> Result<MigrationState> {
        self.tasks
            .ensure_encrypted(self.storage.connection_mut(), &self.keys)
    }

    // ── tasks ──────────────────────────────────────────────────────

    /// Lists tasks matching `filter` in display order.
    pub fn list_tasks(&mut self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.migrate()?;
        self.tasks.list(self.storage.connection(), &self.keys, filter)
    }

    pub fn get_task(&mut self, id: &str) -> Result<Option<Task>> {
        self.migrate()?;
        self.tasks.get(self.storage.connection(), &self.keys, id)
    }

    /// Creates a task from `input` and emits a `create` event.
    ///
    /// A missing id gets a random UUID, empty status and priority get their
    /// defaults, and an empty `created_at` becomes now. `updated_at` is always now.
    ///
    /// # Errors
    ///
    /// [`TaskppError::ValidationFailed`] before anything is written (including
    /// for an id that is already taken), or [`TaskppError::NotUnlocked`].
    pub fn create_task(&mut self, input: TaskInput) -> Result<Task> {
        let fields = validate_task(&input)?;
        self.migrate()?;

        let now = Utc::now();
        let id = if input.id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            if self.get_task(&input.id)?.is_some() {
                return Err(TaskppError::ValidationFailed(format!(
                    "id already exists: {}",
                    input.id
                )));
            }
            input.id
        };
        let task = Task {
            id,
            title: input.title,
            description: input.description,
            status: fields.status,
            priority: fields.priority,
            due_date: fields.due_date,
            order: input.order,
            created_at: fields.created_at.unwrap_or(now),
            updated_at: now,
            completed_at: fields.completed_at,
            archived: input.archived,
        };
        self.commit(EventKind::Create, &task)?;
        Ok(task)
    }

    /// Replaces the task `input.id` with `input` and emits an `update` event.
    ///
    /// The whole record is replaced; fields left empty take their defaults.
    /// An empty `created_at` keeps the stored one.
    ///
    /// # Errors
    ///
    /// [`TaskppError::MissingId`], [`TaskppError::ValidationFailed`] or
    /// [`TaskppError::NotUnlocked`].
    pub fn update_task(&mut self, input: TaskInput) -> Result<Task> {
        if input.id.is_empty() {
            return Err(TaskppError::MissingId);
        }
        let fields = validate_task(&input)?;
        let existing = self.get_task(&input.id)?;

        let now = Utc::now();
        let created_at = fields
            .created_at
            .or(existing.map(|t| t.created_at))
            .unwrap_or(now);
        let task = Task {
            id: input.id,
            title: input.title,
            description: input.description,
            status: fields.status,
            priority: fields.priority,
            due_date: fields.due_date,
            order: input.order,
            created_at,
            updated_at: now,
            completed_at: fields.completed_at,
            archived: input.archived,
        };
        self.commit(EventKind::Update, &task)?;
        Ok(task)
    }

    /// Hard-deletes a task. The emitted `delete` event carries its last
    /// snapshot, stamped with the deletion time as its `updated_at`.
    pub fn delete_task(&mut self, id: &str) -> Result<()> {
        let mut task = self.require_task(id)?;
        task.updated_at = Utc::now();
        self.commit(EventKind::Delete, &task)
    }

    /// Sets `order` (and, when given, `due_date`) on each listed task.
    ///
    /// Items are committed one at a time, so a failure leaves every earlier
    /// item applied.
    ///
    /// # Errors
    ///
    /// [`TaskppError::NotFound`] or [`TaskppError::InvalidDate`] for the first bad item.
    pub fn reorder_tasks(&mut self, items: &[ReorderItem]) -> Result<()> {
        for item in items {
            let mut task = self.require_task(&item.id)?;
            task.order = item.order;
            if let Some(due) = parse_date(&item.due_date)? {
                task.due_date = Some(due);
            }
            task.updated_at = Utc::now();
            self.commit(EventKind::Reorder, &task)?;
        }
        Ok(())
    }

    /// Sets the due date of a task; an empty `due_date` clears it.
    pub fn set_due_date(&mut self, id: &str, due_date: &str) -> Result<Task> {
        let due = parse_date(due_date)?;
        let mut task = self.require_task(id)?;
        task.due_date = due;
        task.updated_at = Utc::now();
        self.commit(EventKind::SetDueDate, &task)?;
        Ok(task)
    }

    /// Marks a task done (stamping `completed_at`) or active again.
    pub fn set_completed(&mut self, id: &str, completed: bool) -> Result<Task> {
        let mut task = self.require_task(id)?;
        let now = Utc::now();
        task.set_completed(completed, now);
        task.updated_at = now;
        self.commit(EventKind::SetCompleted, &task)?;
        Ok(task)
    }

    // ── sync ───────────────────────────────────────────────────────

    /// Returns the sync state, persisting this store's device id on first use.
    pub fn sync_state(&self) -> Result<SyncState> {
        let conn = self.storage.connection();
        let mut state = self.events.sync_state(conn)?;
        if state.device_id.is_empty() {
            state.device_id = self.device_id.clone();
            self.events.save_sync_state(conn, &state)?;
            log::info!("Assigned device id {}", state.device_id);
        }
        Ok(state)
    }

    /// Returns every logged event with `seq > since`, ascending, payloads base64-encoded.
    ///
    /// Needs no key: payloads leave the store still encrypted.
    pub fn export_events(&self, since: i64) -> Result<Vec<EventEnvelope>> {
        let events = self.events.list_since(self.storage.connection(), since)?;
        Ok(events.iter().map(EventEnvelope::from).collect())
    }

    /// Merges a batch of remote events into local state.
    ///
    /// The batch is deduplicated by event id (first occurrence wins), then
    /// applied in `(device_id, seq, ts)` order. Events already in the local log
    /// are skipped. Each remaining event is reconciled against the local task
    /// by last-writer-wins and then logged with its original encrypted
    /// payload, in one transaction per event: a failure keeps every earlier
    /// event committed.
    ///
    /// # Errors
    ///
    /// [`TaskppError::NotUnlocked`], [`TaskppError::Decode`] for a malformed
    /// event or payload, or [`TaskppError::AuthFailure`] for a payload sealed
    /// under another key.
    pub fn import_events(&mut self, envelopes: &[EventEnvelope]) -> Result<ImportReport> {
        if !self.keys.is_unlocked() {
            return Err(TaskppError::NotUnlocked);
        }
        self.migrate()?;

        let events = envelopes
            .iter()
            .map(Event::try_from)
            .collect::<Result<Vec<_>>>()?;
        let mut events = dedupe(events);
        sort_for_apply(&mut events);

        let mut report = ImportReport::default();
        for event in &events {
            if self.events.has_event(self.storage.connection(), &event.id)? {
                report.skipped += 1;
                continue;
            }

            let plaintext = self.keys.decrypt(&event.payload)?;
            let candidate = decode_snapshot(event, &plaintext)?;

            let tx = self.storage.connection_mut().transaction()?;
            let current = self.tasks.get(&tx, &self.keys, &candidate.id)?;
            match decide(current.as_ref(), candidate, event.seq) {
                Verdict::Apply(task) => {
                    if event.kind == EventKind::Delete {
                        self.tasks.delete(&tx, &task.id)?;
                    } else {
                        self.tasks.upsert(&tx, &self.keys, &task)?;
                    }
                    log::debug!("Applied {} event {} to task {}", event.kind, event.id, task.id);
                    report.applied += 1;
                }
                Verdict::Conflict => {
                    if let Some(local) = &current {
                        let conflict = Conflict {
                            id: Uuid::new_v4().to_string(),
                            task_id: local.id.clone(),
                            local_updated_at: local.updated_at,
                            remote_event_id: event.id.clone(),
                            remote_ts: event.ts,
                            detected_at: Utc::now(),
                            resolution: Resolution::LwwLocal,
                        };
                        self.tasks.add_conflict(&tx, &conflict)?;
                        log::warn!(
                            "Conflict on task {}: kept local version over event {}",
                            local.id,
                            event.id
                        );
                    }
                    report.conflicts += 1;
                }
                Verdict::Ignore => {
                    log::debug!("Ignored event {} (tied with local state)", event.id);
                    report.ignored += 1;
                }
            }
            self.events.append(&tx, std::slice::from_ref(event))?;
            tx.commit()?;
        }

        let mut state = self.sync_state()?;
        state.last_sync = Some(Utc::now());
        self.events.save_sync_state(self.storage.connection(), &state)?;

        log::info!(
            "Imported {} event(s): {} applied, {} conflict(s), {} ignored, {} already known",
            events.len(),
            report.applied,
            report.conflicts,
            report.ignored,
            report.skipped
        );
        Ok(report)
    }

    /// Recorded conflicts, oldest first.
    pub fn conflicts(&self) -> Result<Vec<Conflict>> {
        self.tasks.list_conflicts(self.storage.connection())
    }

    /// Decrypts one base64 event payload to its JSON snapshot. For local inspection only.
    pub fn decrypt_event_payload(&self, payload: &str) -> Result<String> {
        if !self.keys.is_unlocked() {
            return Err(TaskppError::NotUnlocked);
        }
        if payload.is_empty() {
            return Err(TaskppError::Decode("payload is required".to_string()));
        }
        let plaintext = self.keys.decrypt(&decode_payload(payload)?)?;
        String::from_utf8(plaintext)
            .map_err(|e| TaskppError::Decode(format!("payload is not UTF-8: {e}")))
    }

    // ── internals ──────────────────────────────────────────────────

    fn require_task(&mut self, id: &str) -> Result<Task> {
        if id.is_empty() {
            return Err(TaskppError::MissingId);
        }
        self.get_task(id)?
            .ok_or_else(|| TaskppError::NotFound(id.to_string()))
    }

    /// Persists a local mutation of `task` and logs it as one `kind` event.
    ///
    /// The task write, the event row and the sync-counter bump commit together.
    fn commit(&mut self, kind: EventKind, task: &Task) -> Result<()> {
        let snapshot = serde_json::to_vec(task)?;
        let payload = self.keys.encrypt(&snapshot)?;

        let tx = self.storage.connection_mut().transaction()?;
        if kind == EventKind::Delete {
            self.tasks.delete(&tx, &task.id)?;
        } else {
            self.tasks.upsert(&tx, &self.keys, task)?;
        }

        let mut state = self.events.sync_state(&tx)?;
        if state.device_id.is_empty() {
            state.device_id = self.device_id.clone();
        }
        state.last_seq += 1;
        let event = Event {
            id: Uuid::new_v4().to_string(),
            device_id: state.device_id.clone(),
            seq: state.last_seq,
            ts: Utc::now(),
            kind,
            payload,
        };
        self.events.append(&tx, std::slice::from_ref(&event))?;
        self.events.save_sync_state(&tx, &state)?;
        tx.commit()?;

        log::debug!("Logged {kind} event {} for task {} (seq {})", event.id, task.id, event.seq);
        Ok(())
    }
}
