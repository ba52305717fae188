use crate::core::task::{format_timestamp, parse_timestamp};
use crate::{KeyState, Result, TaskppError};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

/// Path that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Owns the SQLite connection and bootstraps the schema.
#[derive(Debug)]
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Opens (creating if needed) the database at `path` and ensures every table exists.
    ///
    /// A legacy plaintext `tasks` table is kept as is; see
    /// [`TaskStore::ensure_encrypted`](crate::TaskStore::ensure_encrypted).
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::Database`] if the file cannot be opened or is not
    /// a SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::bootstrap(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::bootstrap(Connection::open_in_memory()?)
    }

    fn bootstrap(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Closes the connection, reporting any error SQLite raises while doing so.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::Database`] if SQLite cannot close cleanly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| TaskppError::Database(e))
    }

    /// Returns `true` if `table` has a column called `column`.
    pub fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            [table, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Reads the key-state row; a store without one yields an uninitialised default.
    pub fn key_state(&self) -> Result<KeyState> {
        let row = self
            .conn
            .query_row(
                "SELECT salt, kdf, updated_at FROM key_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(KeyState::default()),
            Some((salt, kdf, updated_at)) => Ok(KeyState {
                salt,
                kdf,
                updated_at: parse_timestamp(&updated_at)?,
            }),
        }
    }

    pub fn save_key_state(&self, state: &KeyState) -> Result<()> {
        self.conn.execute(
            "INSERT INTO key_state (id, salt, kdf, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                salt = excluded.salt,
                kdf = excluded.kdf,
                updated_at = excluded.updated_at",
            rusqlite::params![
                state.salt,
                state.kdf,
                state.updated_at.as_ref().map(format_timestamp).unwrap_or_default(),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::KDF_SCRYPT;
    use chrono::Utc;
    use tempfile::NamedTempFile;

    fn table_names(storage: &Storage) -> Vec<String> {
        storage
            .connection()
            .prepare("SELECT name FROM sqlite_master WHERE type='table'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_open_creates_tables() {
        let temp = NamedTempFile::new().unwrap();
        let storage = Storage::open(temp.path()).unwrap();

        let tables = table_names(&storage);
        for table in ["tasks", "task_events", "sync_state", "key_state", "conflicts"] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
        assert!(storage.has_column("tasks", "ciphertext").unwrap());
        assert!(!storage.has_column("tasks", "title").unwrap());
    }

    #[test]
    fn test_reopen_existing_storage() {
        let temp = NamedTempFile::new().unwrap();
        Storage::open(temp.path()).unwrap().close().unwrap();

        let storage = Storage::open(temp.path()).unwrap();
        assert!(table_names(&storage).contains(&"tasks".to_string()));
    }

    #[test]
    fn test_open_invalid_database() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), "not a database").unwrap();

        let result = Storage::open(temp.path());
        assert!(matches!(result, Err(TaskppError::Database(_))));
    }

    #[test]
    fn test_key_state_absent_then_saved() {
        let storage = Storage::open_in_memory().unwrap();
        assert!(!storage.key_state().unwrap().is_initialized());

        let state = KeyState {
            salt: b"0123456789abcdef".to_vec(),
            kdf: KDF_SCRYPT.to_string(),
            updated_at: Some(Utc::now()),
        };
        storage.save_key_state(&state).unwrap();
        assert_eq!(storage.key_state().unwrap(), state);

        let count: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM key_state", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
