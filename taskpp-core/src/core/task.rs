//! Task records, filters and the text formats used for dates and timestamps.
//!
//! Dates cross every text boundary as `YYYY-MM-DD` and timestamps as RFC 3339
//! with nanosecond precision in UTC. An absent optional value is written as
//! the empty string, which is also how older peers encode it.

use crate::{Result, TaskppError};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum TaskStatus {
    #[default]
    Active,
    Done,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Done => "done",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = TaskppError;

    /// Parses a status; the empty string selects the default.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "active" => Ok(Self::Active),
            "done" => Ok(Self::Done),
            other => Err(TaskppError::ValidationFailed(format!("invalid status: {other}"))),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = TaskppError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TaskStatus> for &'static str {
    fn from(status: TaskStatus) -> Self {
        status.as_str()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Priority {
    Low,
    #[default]
    Med,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Med => "med",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = TaskppError;

    /// Parses a priority; the empty string selects the default.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "" | "med" => Ok(Self::Med),
            "high" => Ok(Self::High),
            other => Err(TaskppError::ValidationFailed(format!("invalid priority: {other}"))),
        }
    }
}

impl TryFrom<String> for Priority {
    type Error = TaskppError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Priority> for &'static str {
    fn from(priority: Priority) -> Self {
        priority.as_str()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task as persisted (encrypted) in the task store and carried in event payloads.
///
/// `updated_at` is the last-writer-wins clock for the whole record and is
/// refreshed by every local mutation. `completed_at` is `Some` exactly when
/// `status` is [`TaskStatus::Done`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "opt_date")]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub order: i64,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "opt_timestamp")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
}

impl Task {
    /// Total display order: dated tasks first by ascending due date, then
    /// ascending `order`, then ascending `created_at`, then `id`.
    #[must_use]
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        let by_due = match (self.due_date, other.due_date) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_due
            .then(self.order.cmp(&other.order))
            .then(self.created_at.cmp(&other.created_at))
            .then_with(|| self.id.cmp(&other.id))
    }

    /// Marks the task done (or active again), keeping `completed_at` in step with `status`.
    pub fn set_completed(&mut self, completed: bool, now: DateTime<Utc>) {
        if completed {
            self.status = TaskStatus::Done;
            self.completed_at = Some(now);
        } else {
            self.status = TaskStatus::Active;
            self.completed_at = None;
        }
    }
}

/// Conjunctive predicate for [`crate::Core::list_tasks`]. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default, deserialize_with = "empty_as_none")]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub archived: Option<bool>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub due_date: Option<NaiveDate>,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self.archived.map_or(true, |a| task.archived == a)
            && self.due_date.map_or(true, |d| task.due_date == Some(d))
    }
}

/// Caller-supplied fields for `create_task` and `update_task`.
///
/// Every field is in its text form so that validation sees exactly what the
/// host sent. Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskInput {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub due_date: String,
    pub order: i64,
    pub created_at: String,
    pub completed_at: String,
    pub archived: bool,
}

impl TaskInput {
    /// Shorthand for an input carrying only a title.
    #[must_use]
    pub fn titled(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }
}

/// One entry of a `reorder_tasks` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderItem {
    pub id: String,
    pub order: i64,
    /// Optional new due date; empty leaves the current one untouched.
    #[serde(default)]
    pub due_date: String,
}

/// Formats a timestamp as RFC 3339 with nanoseconds, UTC (`Z` suffix).
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parses an RFC 3339 timestamp; the empty string yields `None`.
///
/// # Errors
///
/// Returns [`TaskppError::Decode`] if `s` is neither empty nor valid RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<Option<DateTime<Utc>>> {
    if s.is_empty() {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| Some(dt.with_timezone(&Utc)))
        .map_err(|e| TaskppError::Decode(format!("invalid timestamp {s:?}: {e}")))
}

#[must_use]
pub fn format_date(date: &NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parses a `YYYY-MM-DD` date; the empty string yields `None`.
///
/// # Errors
///
/// Returns [`TaskppError::InvalidDate`] if `s` is neither empty nor a calendar date.
pub fn parse_date(s: &str) -> Result<Option<NaiveDate>> {
    if s.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map(Some)
        .map_err(|_| TaskppError::InvalidDate(s.to_string()))
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn empty_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("timestamp is required"))
    }
}

pub(crate) mod opt_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&super::format_timestamp(ts)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        super::parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod opt_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => s.serialize_str(&super::format_date(date)),
            None => s.serialize_str(""),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}
