//! Append-only event log and the persisted sync counter.

use crate::core::task::{format_timestamp, parse_timestamp};
use crate::{Event, Result, SyncState, TaskppError};
use rusqlite::{Connection, OptionalExtension, Transaction};

/// Records task events to the `task_events` table and owns the `sync_state` row.
///
/// Payloads are stored exactly as given; this layer never decrypts them.
#[derive(Debug, Default)]
pub struct EventLog;

impl EventLog {
    pub fn new() -> Self {
        Self
    }

    /// Inserts `events` within `tx`.
    ///
    /// Nothing is committed here: if any insert fails the caller drops `tx`
    /// and the whole batch is rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`TaskppError::Database`] if an INSERT fails, including when an
    /// event id is already in the log.
    pub fn append(&self, tx: &Transaction, events: &[Event]) -> Result<()> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO task_events (id, device_id, seq, ts, type, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for event in events {
            stmt.execute(rusqlite::params![
                event.id,
                event.device_id,
                event.seq,
                format_timestamp(&event.ts),
                event.kind.as_str(),
                event.payload,
            ])?;
        }
        Ok(())
    }

    /// Appends `events` in a transaction of its own: all rows are stored or none are.
    pub fn append_batch(&self, conn: &mut Connection, events: &[Event]) -> Result<()> {
        let tx = conn.transaction()?;
        self.append(&tx, events)?;
        tx.commit()?;
        Ok(())
    }

    /// Returns every event with `seq > since`, ascending by `seq`.
    ///
    /// `seq` is only unique per device, so events from different devices may
    /// share a value; ties are broken by device id and then event id so the
    /// order is stable.
    pub fn list_since(&self, conn: &Connection, since: i64) -> Result<Vec<Event>> {
        let mut stmt = conn.prepare(
            "SELECT id, device_id, seq, ts, type, payload FROM task_events
             WHERE seq > ?1
             ORDER BY seq ASC, device_id ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, device_id, seq, ts, kind, payload)| {
                let ts = parse_timestamp(&ts)?
                    .ok_or_else(|| TaskppError::Decode(format!("event {id} has no timestamp")))?;
                Ok(Event {
                    kind: kind.parse()?,
                    id,
                    device_id,
                    seq,
                    ts,
                    payload,
                })
            })
            .collect()
    }

    pub fn has_event(&self, conn: &Connection, id: &str) -> Result<bool> {
        let found = conn
            .query_row("SELECT 1 FROM task_events WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Reads the singleton sync-state row. A store without one yields the default,
    /// which has an empty `device_id`.
    pub fn sync_state(&self, conn: &Connection) -> Result<SyncState> {
        let row = conn
            .query_row(
                "SELECT last_seq, last_sync, device_id, server_tag FROM sync_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(SyncState::default()),
            Some((last_seq, last_sync, device_id, server_tag)) => Ok(SyncState {
                last_seq,
                last_sync: parse_timestamp(&last_sync)?,
                device_id,
                server_tag,
            }),
        }
    }

    /// Overwrites the singleton sync-state row.
    pub fn save_sync_state(&self, conn: &Connection, state: &SyncState) -> Result<()> {
        conn.execute(
            "INSERT INTO sync_state (id, last_seq, last_sync, device_id, server_tag)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                last_seq = excluded.last_seq,
                last_sync = excluded.last_sync,
                device_id = excluded.device_id,
                server_tag = excluded.server_tag",
            rusqlite::params![
                state.last_seq,
                state.last_sync.as_ref().map(format_timestamp).unwrap_or_default(),
                state.device_id,
                state.server_tag,
            ],
        )?;
        Ok(())
    }
}
