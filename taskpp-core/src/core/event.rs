//! Sync events: one immutable record per task mutation.

use crate::core::task::timestamp;
use crate::{Result, TaskppError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of mutation an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Reorder,
    SetDueDate,
    SetCompleted,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Reorder => "reorder",
            Self::SetDueDate => "set_due_date",
            Self::SetCompleted => "set_completed",
        }
    }
}

impl FromStr for EventKind {
    type Err = TaskppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "reorder" => Ok(Self::Reorder),
            "set_due_date" => Ok(Self::SetDueDate),
            "set_completed" => Ok(Self::SetCompleted),
            other => Err(TaskppError::Decode(format!("unknown event type: {other}"))),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single task mutation recorded in the event log.
///
/// `payload` is the AEAD ciphertext of the JSON task snapshot taken right
/// after the mutation (right before it, for deletes). Events are never
/// rewritten once stored; `id` is the only deduplication key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: String,
    pub device_id: String,
    /// Per-device sequence number, starting at 1.
    pub seq: i64,
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: Vec<u8>,
}

/// Text-safe transport form of an [`Event`], with the payload in standard base64.
///
/// This is what `export_events` produces and `import_events` consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub device_id: String,
    pub seq: i64,
    #[serde(with = "timestamp")]
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub payload: String,
}

impl From<&Event> for EventEnvelope {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id.clone(),
            device_id: event.device_id.clone(),
            seq: event.seq,
            ts: event.ts,
            kind: event.kind,
            payload: BASE64.encode(&event.payload),
        }
    }
}

impl TryFrom<&EventEnvelope> for Event {
    type Error = TaskppError;

    fn try_from(envelope: &EventEnvelope) -> Result<Self> {
        let payload = decode_payload(&envelope.payload)?;
        Ok(Self {
            id: envelope.id.clone(),
            device_id: envelope.device_id.clone(),
            seq: envelope.seq,
            ts: envelope.ts,
            kind: envelope.kind,
            payload,
        })
    }
}

/// Decodes a standard-base64 payload string.
///
/// # Errors
///
/// Returns [`TaskppError::Decode`] if `encoded` is not valid base64.
pub fn decode_payload(encoded: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(encoded)
        .map_err(|e| TaskppError::Decode(format!("event payload is not base64: {e}")))
}

/// Removes events whose id was already seen earlier in `events`, and events with no id.
///
/// The first occurrence of each id is kept, in input order.
#[must_use]
pub fn dedupe(events: Vec<Event>) -> Vec<Event> {
    let mut seen = std::collections::HashSet::with_capacity(events.len());
    events
        .into_iter()
        .filter(|e| !e.id.is_empty() && seen.insert(e.id.clone()))
        .collect()
}

/// Sorts events by `(device_id, seq, ts)` ascending so each device's events apply in causal order.
pub fn sort_for_apply(events: &mut [Event]) {
    events.sort_by(|a, b| {
        a.device_id
            .cmp(&b.device_id)
            .then(a.seq.cmp(&b.seq))
            .then(a.ts.cmp(&b.ts))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(id: &str, device: &str, seq: i64, secs: i64) -> Event {
        Event {
            id: id.to_string(),
            device_id: device.to_string(),
            seq,
            ts: Utc.timestamp_opt(secs, 0).unwrap(),
            kind: EventKind::Update,
            payload: vec![seq as u8],
        }
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::SetDueDate).unwrap();
        assert_eq!(json, r#""set_due_date""#);
        assert_eq!("set_completed".parse::<EventKind>().unwrap(), EventKind::SetCompleted);
        assert!("rename".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_envelope_carries_base64_payload() {
        let mut e = event("e1", "d1", 1, 1_770_000_000);
        e.payload = vec![0, 255, 1, 2];
        let env = EventEnvelope::from(&e);
        assert_eq!(env.payload, "AP8BAg==");

        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "update");
        assert!(json["ts"].as_str().unwrap().ends_with('Z'));

        let back = Event::try_from(&env).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn test_envelope_rejects_bad_base64() {
        let mut env = EventEnvelope::from(&event("e1", "d1", 1, 0));
        env.payload = "not base64!".to_string();
        assert!(matches!(Event::try_from(&env), Err(TaskppError::Decode(_))));
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let mut second = event("a", "d1", 9, 9);
        second.payload = vec![42];
        let events = vec![
            event("a", "d1", 1, 1),
            event("b", "d1", 2, 2),
            second,
            event("", "d1", 3, 3),
        ];
        let out = dedupe(events);
        let ids: Vec<&str> = out.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(out[0].seq, 1);
    }

    #[test]
    fn test_sort_groups_by_device_then_seq() {
        let mut events = vec![
            event("x3", "dev-b", 1, 5),
            event("x2", "dev-a", 2, 1),
            event("x1", "dev-a", 1, 9),
            event("x4", "dev-b", 1, 2),
        ];
        sort_for_apply(&mut events);
        let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["x1", "x2", "x4", "x3"]);
    }
}
