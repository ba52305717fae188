//! Last-writer-wins merge of one incoming event into local state.
//!
//! Pure: no storage, no keys. The caller decrypts the payload, looks up the
//! current task, and persists whatever [`Verdict`] comes back.

use crate::core::task::{opt_date, opt_timestamp};
use crate::{Event, Priority, Result, Task, TaskStatus, TaskppError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::cmp::Ordering;

/// What to do with an incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Persist this snapshot over the local task.
    Apply(Task),
    /// The local task is newer. Keep it and record a conflict.
    Conflict,
    /// Keep the local task without recording anything.
    Ignore,
}

impl Verdict {
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(self, Self::Apply(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Task snapshot as carried in a remote payload, with every timestamp optional.
#[derive(Debug, Deserialize)]
struct TaskSnapshot {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    priority: Priority,
    #[serde(default, with = "opt_date")]
    due_date: Option<NaiveDate>,
    #[serde(default)]
    order: i64,
    #[serde(default, with = "opt_timestamp")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_timestamp")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "opt_timestamp")]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    archived: bool,
}

impl TaskSnapshot {
    fn into_task(self, fallback: DateTime<Utc>) -> Task {
        let updated_at = self.updated_at.unwrap_or(fallback);
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            status: self.status,
            priority: self.priority,
            due_date: self.due_date,
            order: self.order,
            created_at: self.created_at.unwrap_or(updated_at),
            updated_at,
            completed_at: self.completed_at,
            archived: self.archived,
        }
    }
}

/// Decodes a decrypted event payload into the task snapshot it carries.
///
/// A snapshot without `updated_at` takes the event's `ts` as its clock.
///
/// # Errors
///
/// Returns [`TaskppError::Decode`] if `plaintext` is not a task snapshot or has no id.
pub fn decode_snapshot(event: &Event, plaintext: &[u8]) -> Result<Task> {
    let snapshot: TaskSnapshot = serde_json::from_slice(plaintext)
        .map_err(|e| TaskppError::Decode(format!("event {}: {e}", event.id)))?;
    if snapshot.id.is_empty() {
        return Err(TaskppError::Decode(format!("event {} payload has no task id", event.id)));
    }
    Ok(snapshot.into_task(event.ts))
}

/// Decides whether `event` (whose payload decrypts to `plaintext`) replaces `current`.
///
/// Rules, first match wins:
/// 1. no local task: apply;
/// 2. candidate `updated_at` later than local: apply;
/// 3. equal `updated_at` and `event.seq > 0`: apply;
/// 4. candidate `updated_at` earlier than local: conflict;
/// 5. otherwise: ignore.
///
/// Rule 3 lets any sequenced event win an exact tie, so the outcome of a
/// tie depends on arrival order.
pub fn apply_event(current: Option<&Task>, event: &Event, plaintext: &[u8]) -> Result<Verdict> {
    let candidate = decode_snapshot(event, plaintext)?;
    Ok(decide(current, candidate, event.seq))
}

/// The rule table of [`apply_event`], for a snapshot that is already decoded.
#[must_use]
pub fn decide(current: Option<&Task>, candidate: Task, seq: i64) -> Verdict {
    let Some(current) = current else {
        return Verdict::Apply(candidate);
    };

    match candidate.updated_at.cmp(&current.updated_at) {
        Ordering::Greater => Verdict::Apply(candidate),
        Ordering::Equal if seq > 0 => Verdict::Apply(candidate),
        Ordering::Equal => Verdict::Ignore,
        Ordering::Less => Verdict::Conflict,
    }
}
