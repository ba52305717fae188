//! Encrypted task persistence and the one-time migration from the plaintext layout.
//!
//! Each task is stored as a single ciphertext blob keyed by id. Stores written
//! by earlier releases keep a multi-column plaintext `tasks` table; the first
//! unlocked access re-encrypts it in one transaction. The progress of that
//! migration is tracked explicitly as a [`MigrationState`].

use crate::core::crypto::Cipher;
use crate::core::task::{parse_date, parse_timestamp};
use crate::{Conflict, Result, Storage, Task, TaskFilter, TaskppError};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Where the `tasks` table is in the plaintext-to-ciphertext migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    /// The legacy plaintext table is still in place; keys are needed to migrate it.
    Unmigrated,
    /// A migration transaction is in progress.
    Migrating,
    /// Tasks are stored as ciphertext only.
    Migrated,
}

/// Reads and writes encrypted task rows and the conflicts recorded against them.
#[derive(Debug)]
pub struct TaskStore {
    state: MigrationState,
}

impl TaskStore {
    /// Inspects the schema of `storage` to find the current migration state.
    pub fn open(storage: &Storage) -> Result<Self> {
        let state = if storage.has_column("tasks", "ciphertext")? {
            MigrationState::Migrated
        } else {
            MigrationState::Unmigrated
        };
        Ok(Self { state })
    }

    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        self.state
    }

    /// Moves the store to [`MigrationState::Migrated`], re-encrypting legacy rows if needed.
    ///
    /// A no-op once migrated. All legacy rows are copied into a new ciphertext
    /// table, the old table is dropped and the new one renamed into place, all
    /// inside one transaction: on failure nothing changes and the state stays
    /// [`MigrationState::Unmigrated`].
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::NotUnlocked`] while migration is pending and no key
    /// is loaded; plaintext is never read without a key to re-encrypt it.
    pub fn ensure_encrypted(
        &mut self,
        conn: &mut Connection,
        cipher: &dyn Cipher,
    ) -> Result<MigrationState> {
        if self.state == MigrationState::Migrated {
            return Ok(self.state);
        }
        if !cipher.is_unlocked() {
            return Err(TaskppError::NotUnlocked);
        }

        self.state = MigrationState::Migrating;
        match migrate_plaintext_tasks(conn, cipher) {
            Ok(count) => {
                log::info!("Re-encrypted {count} legacy plaintext task(s)");
                self.state = MigrationState::Migrated;
                Ok(self.state)
            }
            Err(e) => {
                log::warn!("Task migration rolled back: {e}");
                self.state = MigrationState::Unmigrated;
                Err(e)
            }
        }
    }

    /// Returns every task matching `filter`, in display order (see [`Task::display_cmp`]).
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::NotUnlocked`] without a key or before migration,
    /// [`TaskppError::AuthFailure`] if a row does not decrypt under the current key.
    pub fn list(&self, conn: &Connection, cipher: &dyn Cipher, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.require_ready(cipher)?;

        let mut stmt = conn.prepare("SELECT id, ciphertext FROM tasks")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut tasks = Vec::with_capacity(rows.len());
        for (id, ciphertext) in rows {
            let task = open_task(cipher, &id, &ciphertext)?;
            if filter.matches(&task) {
                tasks.push(task);
            }
        }
        tasks.sort_by(Task::display_cmp);
        Ok(tasks)
    }

    /// Looks up one task. A missing row is `Ok(None)`, not an error.
    pub fn get(&self, conn: &Connection, cipher: &dyn Cipher, id: &str) -> Result<Option<Task>> {
        self.require_ready(cipher)?;

        let ciphertext = conn
            .query_row(
                "SELECT ciphertext FROM tasks WHERE id = ?1",
                [id],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        ciphertext
            .map(|ciphertext| open_task(cipher, id, &ciphertext))
            .transpose()
    }

    /// Encrypts the full task record and inserts or replaces the row for `task.id`.
    pub fn upsert(&self, conn: &Connection, cipher: &dyn Cipher, task: &Task) -> Result<()> {
        self.require_ready(cipher)?;

        let ciphertext = seal_task(cipher, task)?;
        conn.execute(
            "INSERT INTO tasks (id, ciphertext) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET ciphertext = excluded.ciphertext",
            rusqlite::params![task.id, ciphertext],
        )?;
        Ok(())
    }

    /// Hard-deletes the row for `id`. Needs no key: ciphertext is removed unread.
    pub fn delete(&self, conn: &Connection, id: &str) -> Result<()> {
        conn.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
        Ok(())
    }

    pub fn add_conflict(&self, conn: &Connection, conflict: &Conflict) -> Result<()> {
        conn.execute(
            "INSERT INTO conflicts (id, task_id, local_updated_at, remote_event_id, remote_ts, detected_at, resolution)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                conflict.id,
                conflict.task_id,
                format_ts(&conflict.local_updated_at),
                conflict.remote_event_id,
                format_ts(&conflict.remote_ts),
                format_ts(&conflict.detected_at),
                conflict.resolution.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Returns all recorded conflicts, oldest detection first.
    pub fn list_conflicts(&self, conn: &Connection) -> Result<Vec<Conflict>> {
        let mut stmt = conn.prepare(
            "SELECT id, task_id, local_updated_at, remote_event_id, remote_ts, detected_at, resolution
             FROM conflicts ORDER BY detected_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, task_id, local, remote_event_id, remote_ts, detected, resolution)| {
                Ok(Conflict {
                    id,
                    task_id,
                    local_updated_at: parse_ts(&local)?,
                    remote_event_id,
                    remote_ts: parse_ts(&remote_ts)?,
                    detected_at: parse_ts(&detected)?,
                    resolution: serde_json::from_value(serde_json::Value::String(resolution))?,
                })
            })
            .collect()
    }

    fn require_ready(&self, cipher: &dyn Cipher) -> Result<()> {
        if !cipher.is_unlocked() || self.state != MigrationState::Migrated {
            return Err(TaskppError::NotUnlocked);
        }
        Ok(())
    }
}

fn seal_task(cipher: &dyn Cipher, task: &Task) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(task)
        .map_err(|e| TaskppError::Encode(format!("task {}: {e}", task.id)))?;
    cipher.encrypt(&plaintext)
}

fn open_task(cipher: &dyn Cipher, id: &str, ciphertext: &[u8]) -> Result<Task> {
    let plaintext = cipher.decrypt(ciphertext)?;
    let mut task: Task = serde_json::from_slice(&plaintext)
        .map_err(|e| TaskppError::Decode(format!("stored task {id}: {e}")))?;
    if task.id.is_empty() {
        task.id = id.to_string();
    }
    Ok(task)
}

fn format_ts(ts: &chrono::DateTime<chrono::Utc>) -> String {
    crate::core::task::format_timestamp(ts)
}

fn parse_ts(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    parse_timestamp(s)?.ok_or_else(|| TaskppError::Decode("missing timestamp".to_string()))
}

/// Raw 11-column row of the legacy plaintext `tasks` table.
type LegacyRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
    Option<String>,
    Option<String>,
    Option<String>,
    i64,
);

fn migrate_plaintext_tasks(conn: &mut Connection, cipher: &dyn Cipher) -> Result<usize> {
    let tx = conn.transaction()?;
    tx.execute_batch("CREATE TABLE tasks_new (id TEXT PRIMARY KEY, ciphertext BLOB NOT NULL);")?;

    let rows: Vec<LegacyRow> = {
        let mut stmt = tx.prepare(
            "SELECT id, title, description, status, priority, due_date, order_index,
                    created_at, updated_at, completed_at, archived
             FROM tasks",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get::<_, Option<i64>>(6)?.unwrap_or_default(),
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get::<_, Option<i64>>(10)?.unwrap_or_default(),
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    let count = rows.len();
    for row in rows {
        let task = legacy_row_to_task(row)?;
        let ciphertext = seal_task(cipher, &task)?;
        tx.execute(
            "INSERT INTO tasks_new (id, ciphertext) VALUES (?1, ?2)",
            rusqlite::params![task.id, ciphertext],
        )?;
    }

    tx.execute_batch(
        "DROP TABLE tasks;
         ALTER TABLE tasks_new RENAME TO tasks;",
    )?;
    tx.commit()?;
    Ok(count)
}

fn legacy_row_to_task(
    (id, title, description, status, priority, due_date, order, created_at, updated_at, completed_at, archived): LegacyRow,
) -> Result<Task> {
    let status = status.unwrap_or_default();
    let priority = priority.unwrap_or_default();
    let created_at = parse_timestamp(&created_at.unwrap_or_default())?;
    let updated_at = parse_timestamp(&updated_at.unwrap_or_default())?;

    Ok(Task {
        status: status.parse().unwrap_or_else(|_| {
            log::warn!("Legacy task {id} has unknown status {status:?}; using default");
            Default::default()
        }),
        priority: priority.parse().unwrap_or_else(|_| {
            log::warn!("Legacy task {id} has unknown priority {priority:?}; using default");
            Default::default()
        }),
        title: title.unwrap_or_default(),
        description: description.unwrap_or_default(),
        due_date: parse_date(&due_date.unwrap_or_default())
            .map_err(|e| TaskppError::Decode(format!("legacy task {id}: {e}")))?,
        order,
        created_at: created_at.or(updated_at).unwrap_or_default(),
        updated_at: updated_at.or(created_at).unwrap_or_default(),
        completed_at: parse_timestamp(&completed_at.unwrap_or_default())?,
        archived: archived == 1,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::crypto::{KdfParams, KeyManager};
    use crate::core::state::Resolution;
    use crate::{Priority, TaskStatus};
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use tempfile::NamedTempFile;

    fn keys() -> KeyManager {
        let mut keys = KeyManager::with_params(KdfParams::for_test());
        keys.derive_key("passphrase", b"0123456789abcdef").unwrap();
        keys
    }

    fn setup() -> (Storage, TaskStore, KeyManager) {
        let storage = Storage::open_in_memory().unwrap();
        let store = TaskStore::open(&storage).unwrap();
        (storage, store, keys())
    }

    fn task(id: &str, title: &str) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: "desc".to_string(),
            status: TaskStatus::Active,
            priority: Priority::Med,
            due_date: None,
            order: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            archived: false,
        }
    }

    #[test]
    fn test_new_store_is_migrated() {
        let (_storage, store, _keys) = setup();
        assert_eq!(store.migration_state(), MigrationState::Migrated);
    }

    #[test]
    fn test_upsert_list_delete() {
        let (storage, store, keys) = setup();
        let conn = storage.connection();
        let mut t = task("t1", "First");

        store.upsert(conn, &keys, &t).unwrap();
        assert_eq!(store.list(conn, &keys, &TaskFilter::default()).unwrap(), vec![t.clone()]);

        t.title = "Updated".to_string();
        t.updated_at += Duration::minutes(1);
        store.upsert(conn, &keys, &t).unwrap();
        let rows = store.list(conn, &keys, &TaskFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Updated");

        store.delete(conn, "t1").unwrap();
        assert!(store.list(conn, &keys, &TaskFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_get_missing_is_none() {
        let (storage, store, keys) = setup();
        assert_eq!(store.get(storage.connection(), &keys, "nope").unwrap(), None);
    }

    #[test]
    fn test_rows_hold_only_ciphertext() {
        let (storage, store, keys) = setup();
        store.upsert(storage.connection(), &keys, &task("t1", "Very Secret Title")).unwrap();

        let blob: Vec<u8> = storage
            .connection()
            .query_row("SELECT ciphertext FROM tasks WHERE id = 't1'", [], |row| row.get(0))
            .unwrap();
        let needle = b"Very Secret Title";
        assert!(!blob.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_locked_store_refuses_reads_and_writes_but_deletes() {
        let (storage, store, keys) = setup();
        let conn = storage.connection();
        store.upsert(conn, &keys, &task("t1", "x")).unwrap();

        let locked = KeyManager::with_params(KdfParams::for_test());
        assert!(matches!(
            store.list(conn, &locked, &TaskFilter::default()),
            Err(TaskppError::NotUnlocked)
        ));
        assert!(matches!(store.get(conn, &locked, "t1"), Err(TaskppError::NotUnlocked)));
        assert!(matches!(
            store.upsert(conn, &locked, &task("t2", "y")),
            Err(TaskppError::NotUnlocked)
        ));

        store.delete(conn, "t1").unwrap();
        assert_eq!(store.get(conn, &keys, "t1").unwrap(), None);
    }

    #[test]
    fn test_wrong_key_surfaces_auth_failure() {
        let (storage, store, keys) = setup();
        store.upsert(storage.connection(), &keys, &task("t1", "x")).unwrap();

        let mut other = KeyManager::with_params(KdfParams::for_test());
        other.derive_key("different", b"0123456789abcdef").unwrap();
        assert!(matches!(
            store.get(storage.connection(), &other, "t1"),
            Err(TaskppError::AuthFailure)
        ));
    }

    #[test]
    fn test_filters() {
        let (storage, store, keys) = setup();
        let conn = storage.connection();

        let mut done = task("done", "Done");
        done.set_completed(true, Utc::now());
        let mut archived = task("archived", "Archived");
        archived.archived = true;
        let mut dated = task("dated", "Dated");
        dated.due_date = NaiveDate::from_ymd_opt(2026, 3, 1);
        for t in [&done, &archived, &dated] {
            store.upsert(conn, &keys, t).unwrap();
        }

        let ids = |filter: TaskFilter| -> Vec<String> {
            store.list(conn, &keys, &filter).unwrap().into_iter().map(|t| t.id).collect()
        };
        assert_eq!(ids(TaskFilter { status: Some(TaskStatus::Done), ..Default::default() }), vec!["done"]);
        assert_eq!(ids(TaskFilter { archived: Some(true), ..Default::default() }), vec!["archived"]);
        assert_eq!(
            ids(TaskFilter { due_date: NaiveDate::from_ymd_opt(2026, 3, 1), ..Default::default() }),
            vec!["dated"]
        );
        assert!(ids(TaskFilter {
            status: Some(TaskStatus::Done),
            archived: Some(true),
            ..Default::default()
        })
        .is_empty());
        assert_eq!(ids(TaskFilter::default()).len(), 3);
    }

    #[test]
    fn test_list_is_sorted_for_display() {
        let (storage, store, keys) = setup();
        let conn = storage.connection();
        let mut undated = task("undated", "u");
        undated.order = -5;
        let mut later = task("later", "l");
        later.due_date = NaiveDate::from_ymd_opt(2026, 6, 1);
        let mut sooner = task("sooner", "s");
        sooner.due_date = NaiveDate::from_ymd_opt(2026, 1, 1);
        for t in [&undated, &later, &sooner] {
            store.upsert(conn, &keys, t).unwrap();
        }

        let ids: Vec<String> = store
            .list(conn, &keys, &TaskFilter::default())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["sooner", "later", "undated"]);
    }

    #[test]
    fn test_conflicts_round_trip() {
        let (storage, store, _keys) = setup();
        let now = Utc::now();
        let conflict = Conflict {
            id: "c1".to_string(),
            task_id: "t1".to_string(),
            local_updated_at: now,
            remote_event_id: "e1".to_string(),
            remote_ts: now - Duration::minutes(1),
            detected_at: now,
            resolution: Resolution::LwwLocal,
        };
        store.add_conflict(storage.connection(), &conflict).unwrap();

        let conflicts = store.list_conflicts(storage.connection()).unwrap();
        assert_eq!(conflicts, vec![conflict]);
    }

    fn create_legacy_store(path: &std::path::Path, now: DateTime<Utc>) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                due_date TEXT NOT NULL,
                order_index INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                archived INTEGER NOT NULL
            );",
        )
        .unwrap();
        let ts = crate::core::task::format_timestamp(&now);
        conn.execute(
            "INSERT INTO tasks (id, title, description, status, priority, due_date, order_index,
                                created_at, updated_at, completed_at, archived)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params!["t1", "Old", "desc", "active", "med", "2026-02-05", 1, ts, ts, "", 0],
        )
        .unwrap();
    }

    #[test]
    fn test_migration_from_plaintext_tasks() {
        let temp = NamedTempFile::new().unwrap();
        let now = Utc::now();
        create_legacy_store(temp.path(), now);

        let mut storage = Storage::open(temp.path()).unwrap();
        let mut store = TaskStore::open(&storage).unwrap();
        assert_eq!(store.migration_state(), MigrationState::Unmigrated);

        let keys = keys();
        let state = store.ensure_encrypted(storage.connection_mut(), &keys).unwrap();
        assert_eq!(state, MigrationState::Migrated);

        let tasks = store.list(storage.connection(), &keys, &TaskFilter::default()).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "t1");
        assert_eq!(tasks[0].title, "Old");
        assert_eq!(tasks[0].order, 1);
        assert_eq!(tasks[0].updated_at, now);
        assert_eq!(tasks[0].due_date, NaiveDate::from_ymd_opt(2026, 2, 5));

        assert!(storage.has_column("tasks", "ciphertext").unwrap());
        assert!(!storage.has_column("tasks", "title").unwrap());
        let tables: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM sqlite_master WHERE name = 'tasks_new'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(tables, 0);

        // Idempotent once migrated.
        assert_eq!(
            store.ensure_encrypted(storage.connection_mut(), &keys).unwrap(),
            MigrationState::Migrated
        );
        assert_eq!(store.list(storage.connection(), &keys, &TaskFilter::default()).unwrap().len(), 1);
    }

    #[test]
    fn test_migration_waits_for_keys() {
        let temp = NamedTempFile::new().unwrap();
        create_legacy_store(temp.path(), Utc::now());

        let mut storage = Storage::open(temp.path()).unwrap();
        let mut store = TaskStore::open(&storage).unwrap();
        let locked = KeyManager::with_params(KdfParams::for_test());

        assert!(matches!(
            store.ensure_encrypted(storage.connection_mut(), &locked),
            Err(TaskppError::NotUnlocked)
        ));
        assert_eq!(store.migration_state(), MigrationState::Unmigrated);
        assert!(matches!(
            store.list(storage.connection(), &keys(), &TaskFilter::default()),
            Err(TaskppError::NotUnlocked)
        ));

        // Plaintext row is untouched.
        let title: String = storage
            .connection()
            .query_row("SELECT title FROM tasks WHERE id = 't1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(title, "Old");
    }

    #[test]
    fn test_failed_migration_rolls_back() {
        let temp = NamedTempFile::new().unwrap();
        create_legacy_store(temp.path(), Utc::now());
        {
            let conn = Connection::open(temp.path()).unwrap();
            conn.execute(
                "INSERT INTO tasks VALUES ('t2', 'Bad', '', 'active', 'med', 'not-a-date', 0, '', '', '', 0)",
                [],
            )
            .unwrap();
        }

        let mut storage = Storage::open(temp.path()).unwrap();
        let mut store = TaskStore::open(&storage).unwrap();
        let result = store.ensure_encrypted(storage.connection_mut(), &keys());

        assert!(matches!(result, Err(TaskppError::Decode(_))));
        assert_eq!(store.migration_state(), MigrationState::Unmigrated);
        assert!(storage.has_column("tasks", "title").unwrap());
        let count: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM tasks", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
