//! Domain validation for caller-supplied task fields.
//!
//! Validation turns the text fields of a [`TaskInput`] into typed values, or
//! rejects the whole input before anything is written.

use crate::core::task::{parse_date, parse_timestamp};
use crate::{Priority, Result, TaskInput, TaskStatus, TaskppError};
use chrono::{DateTime, NaiveDate, Utc};

/// Typed, validated view of a [`TaskInput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidFields {
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Checks the domain rules for a task mutation.
///
/// Rules, in order: non-empty title; status in `{"", active, done}`; priority
/// in `{"", low, med, high}`; `due_date` empty or a calendar date; timestamps
/// empty or RFC 3339; `completed_at` set if and only if status is `done`.
///
/// # Errors
///
/// Returns [`TaskppError::ValidationFailed`] naming the first rule broken.
pub fn validate_task(input: &TaskInput) -> Result<ValidFields> {
    if input.title.is_empty() {
        return Err(invalid("title is required"));
    }
    let status: TaskStatus = input.status.parse()?;
    let priority: Priority = input.priority.parse()?;
    let due_date = parse_date(&input.due_date)
        .map_err(|_| invalid(format!("invalid due_date: {}", input.due_date)))?;
    let created_at = parse_timestamp(&input.created_at)
        .map_err(|_| invalid(format!("invalid created_at: {}", input.created_at)))?;
    let completed_at = parse_timestamp(&input.completed_at)
        .map_err(|_| invalid(format!("invalid completed_at: {}", input.completed_at)))?;

    match (status, completed_at) {
        (TaskStatus::Done, None) => {
            return Err(invalid("completed_at required when status=done"));
        }
        (TaskStatus::Active, Some(_)) => {
            return Err(invalid("completed_at must be empty when status!=done"));
        }
        _ => {}
    }

    Ok(ValidFields {
        status,
        priority,
        due_date,
        created_at,
        completed_at,
    })
}

fn invalid(msg: impl Into<String>) -> TaskppError {
    TaskppError::ValidationFailed(msg.into())
}
