//! Change events published by the todo service and their tolerant decoder.
//!
//! The todo service publishes a JSON envelope whenever a todo changes. Two envelope
//! shapes are in circulation, depending on which transport the producer was built for:
//!
//! ```json
//! { "eventType": "TODO_CREATED", "timestamp": "2024-05-01T10:00:00Z", "data": { "username": "alice" } }
//! { "event": "todo_status_changed", "timestamp": "2024-05-01T10:00:00Z", "data": { "username": "alice", "completed": true } }
//! ```
//!
//! [`decode`] accepts both. It distinguishes two failure severities:
//!
//! - **Hard**: the envelope itself is unusable (not JSON, no `data` object, no owner).
//!   Nothing can be invalidated; the message is dropped.
//! - **Soft**: the envelope is fine but an optional field is missing or mistyped. The
//!   partially decoded event travels inside the error so the owner can still be
//!   invalidated.
//!
//! Unknown event kinds are *not* errors. They decode to [`EventKind::Unknown`] and still
//! invalidate the owner's cache entry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Envelope keys carrying the event kind, in lookup order.
const KIND_KEYS: [&str; 2] = ["eventType", "event"];

/// Keys inside `data` carrying the owner identity, in lookup order.
const OWNER_KEYS: [&str; 2] = ["owner", "username"];

/// Key inside `data` carrying the completion status.
const STATUS_KEY: &str = "completed";

/// The kind of change a [`ChangeEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A todo was created.
    Created,
    /// A todo's title, description or due date changed.
    Updated,
    /// A todo was marked done or not done.
    StatusChanged,
    /// A todo was deleted.
    Deleted,
    /// The discriminator was missing or not recognised.
    Unknown,
}

impl EventKind {
    /// Classify a raw discriminator.
    ///
    /// Matching is case-insensitive and ignores an optional `todo_` prefix, so
    /// `TODO_CREATED`, `todo_created` and `created` are all [`EventKind::Created`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        classify(raw).0
    }

    /// Stable lowercase name, used as a log and metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the kind plus the completion status implied by the discriminator, if any.
///
/// `TODO_COMPLETED` / `TODO_UNCOMPLETED` carry their status in the name.
fn classify(raw: &str) -> (EventKind, Option<bool>) {
    let normalized = raw.trim().to_ascii_lowercase();
    let name = normalized.strip_prefix("todo_").unwrap_or(&normalized);

    match name {
        "created" => (EventKind::Created, None),
        "updated" => (EventKind::Updated, None),
        "status_changed" => (EventKind::StatusChanged, None),
        "completed" => (EventKind::StatusChanged, Some(true)),
        "uncompleted" => (EventKind::StatusChanged, Some(false)),
        "deleted" => (EventKind::Deleted, None),
        _ => (EventKind::Unknown, None),
    }
}

/// A decoded change notification.
///
/// Immutable once constructed; the consumption loop uses it to pick the cache entry to
/// invalidate and then drops it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    kind: EventKind,
    raw_kind: Option<String>,
    owner: String,
    timestamp: String,
    completed: Option<bool>,
    extra: Map<String, Value>,
}

impl ChangeEvent {
    /// The kind of change.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.kind
    }

    /// The discriminator exactly as received, if there was one.
    #[must_use]
    pub fn raw_kind(&self) -> Option<&str> {
        self.raw_kind.as_deref()
    }

    /// The user whose todos changed.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The producer's timestamp as received (ISO-8601), or an empty string if absent.
    #[must_use]
    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// The producer's timestamp parsed as RFC 3339.
    #[must_use]
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// Completion status carried by the event.
    ///
    /// Always `Some` for a successfully decoded [`EventKind::StatusChanged`].
    #[must_use]
    pub const fn completed(&self) -> Option<bool> {
        self.completed
    }

    /// Remaining `data` fields (everything except the owner key).
    #[must_use]
    pub const fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }
}

/// Errors produced by [`decode`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The envelope could not be used at all. No owner was extracted.
    #[error("Malformed event envelope: {reason}")]
    Hard {
        /// Why the envelope was rejected
        reason: String,
    },

    /// The envelope decoded but an optional field was missing or mistyped.
    #[error("Event for owner '{}' is missing field '{field}'", .event.owner)]
    SoftFieldMissing {
        /// The field that could not be read
        field: &'static str,
        /// The event decoded from everything else
        event: Box<ChangeEvent>,
    },
}

impl DecodeError {
    fn hard(reason: impl Into<String>) -> Self {
        Self::Hard {
            reason: reason.into(),
        }
    }

    /// Whether the message must be dropped without invalidating anything.
    #[must_use]
    pub const fn is_hard(&self) -> bool {
        matches!(self, Self::Hard { .. })
    }

    /// The partially decoded event of a soft failure.
    #[must_use]
    pub fn event(&self) -> Option<&ChangeEvent> {
        match self {
            Self::Hard { .. } => None,
            Self::SoftFieldMissing { event, .. } => Some(event),
        }
    }

    /// The owner still resolvable despite the failure.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.event().map(ChangeEvent::owner)
    }

    /// Consume the error, keeping the partially decoded event of a soft failure.
    #[must_use]
    pub fn into_event(self) -> Option<ChangeEvent> {
        match self {
            Self::Hard { .. } => None,
            Self::SoftFieldMissing { event, .. } => Some(*event),
        }
    }
}

/// Decode a raw transport payload into a [`ChangeEvent`].
///
/// Pure and total: any byte sequence yields either an event or a [`DecodeError`].
///
/// # Errors
///
/// - [`DecodeError::Hard`] when the payload is not a JSON object, has no `data` object,
///   or `data` carries no non-empty owner string.
/// - [`DecodeError::SoftFieldMissing`] when a status-change event has no boolean
///   `completed` field and its kind does not imply one.
///
/// # Example
///
/// ```
/// use taskflow_analytics_core::event::{decode, EventKind};
///
/// let payload = br#"{"eventType":"TODO_DELETED","timestamp":"2024-05-01T10:00:00Z","data":{"username":"alice"}}"#;
/// let event = decode(payload).unwrap();
/// assert_eq!(event.kind(), EventKind::Deleted);
/// assert_eq!(event.owner(), "alice");
/// ```
pub fn decode(payload: &[u8]) -> Result<ChangeEvent, DecodeError> {
    let envelope: Value = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::hard(format!("payload is not valid JSON: {e}")))?;

    let Value::Object(mut envelope) = envelope else {
        return Err(DecodeError::hard("envelope is not a JSON object"));
    };

    let raw_kind = KIND_KEYS
        .iter()
        .find_map(|key| envelope.get(*key).and_then(Value::as_str))
        .map(str::to_owned);

    let timestamp = envelope
        .get("timestamp")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let Some(Value::Object(mut data)) = envelope.remove("data") else {
        return Err(DecodeError::hard("envelope has no `data` object"));
    };

    let Some((owner_key, owner)) = OWNER_KEYS.iter().find_map(|key| match data.get(*key) {
        Some(Value::String(owner)) if !owner.trim().is_empty() => Some((*key, owner.clone())),
        _ => None,
    }) else {
        return Err(DecodeError::hard("`data` carries no owner"));
    };
    data.remove(owner_key);

    let (kind, implied_status) = raw_kind
        .as_deref()
        .map_or((EventKind::Unknown, None), classify);

    let completed = data
        .get(STATUS_KEY)
        .and_then(Value::as_bool)
        .or(implied_status);

    let event = ChangeEvent {
        kind,
        raw_kind,
        owner,
        timestamp,
        completed,
        extra: data,
    };

    if kind == EventKind::StatusChanged && event.completed.is_none() {
        return Err(DecodeError::SoftFieldMissing {
            field: STATUS_KEY,
            event: Box::new(event),
        });
    }

    Ok(event)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decodes_event_type_envelope() {
        let payload = br#"{
            "eventType": "TODO_CREATED",
            "timestamp": "2024-05-01T10:00:00.000Z",
            "data": {"_id": "abc", "username": "alice", "title": "Buy milk", "completed": false}
        }"#;

        let event = decode(payload).unwrap();

        assert_eq!(event.kind(), EventKind::Created);
        assert_eq!(event.raw_kind(), Some("TODO_CREATED"));
        assert_eq!(event.owner(), "alice");
        assert_eq!(event.completed(), Some(false));
        assert_eq!(event.extra().get("title"), Some(&Value::from("Buy milk")));
        assert!(!event.extra().contains_key("username"));
        assert!(event.occurred_at().is_some());
    }

    #[test]
    fn decodes_event_key_envelope() {
        let payload = br#"{"event":"todo_updated","data":{"username":"bob"},"timestamp":"2024-05-01T10:00:00Z"}"#;

        let event = decode(payload).unwrap();

        assert_eq!(event.kind(), EventKind::Updated);
        assert_eq!(event.owner(), "bob");
    }

    #[test]
    fn owner_key_takes_precedence_over_username() {
        let payload = br#"{"event":"todo_deleted","data":{"owner":"carol","username":"dave"}}"#;

        let event = decode(payload).unwrap();

        assert_eq!(event.owner(), "carol");
        assert_eq!(event.extra().get("username"), Some(&Value::from("dave")));
    }

    #[test]
    fn status_change_reads_boolean_field() {
        let payload = br#"{"event":"todo_status_changed","data":{"username":"alice","completed":true}}"#;

        let event = decode(payload).unwrap();

        assert_eq!(event.kind(), EventKind::StatusChanged);
        assert_eq!(event.completed(), Some(true));
    }

    #[test]
    fn completed_and_uncompleted_kinds_imply_status() {
        let done = decode(br#"{"eventType":"TODO_COMPLETED","data":{"username":"alice"}}"#).unwrap();
        let undone = decode(br#"{"eventType":"TODO_UNCOMPLETED","data":{"username":"alice"}}"#).unwrap();

        assert_eq!(done.kind(), EventKind::StatusChanged);
        assert_eq!(done.completed(), Some(true));
        assert_eq!(undone.completed(), Some(false));
    }

    #[test]
    fn status_change_without_status_is_soft_error_with_owner() {
        let payload = br#"{"event":"todo_status_changed","data":{"username":"alice"}}"#;

        let err = decode(payload).unwrap_err();

        assert!(!err.is_hard());
        assert_eq!(err.owner(), Some("alice"));
        assert!(matches!(
            &err,
            DecodeError::SoftFieldMissing { field: "completed", event }
                if event.kind() == EventKind::StatusChanged
        ));
    }

    #[test]
    fn mistyped_status_is_soft_error() {
        let payload = br#"{"event":"todo_status_changed","data":{"username":"alice","completed":"yes"}}"#;

        let err = decode(payload).unwrap_err();

        assert_eq!(err.into_event().map(|e| e.owner().to_string()), Some("alice".to_string()));
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let event = decode(br#"{"eventType":"TODO_ARCHIVED","data":{"username":"alice"}}"#).unwrap();

        assert_eq!(event.kind(), EventKind::Unknown);
        assert_eq!(event.raw_kind(), Some("TODO_ARCHIVED"));
        assert_eq!(event.owner(), "alice");
    }

    #[test]
    fn missing_or_non_string_kind_is_unknown() {
        let missing = decode(br#"{"data":{"username":"alice"}}"#).unwrap();
        let numeric = decode(br#"{"eventType":42,"data":{"username":"alice"}}"#).unwrap();

        assert_eq!(missing.kind(), EventKind::Unknown);
        assert_eq!(missing.raw_kind(), None);
        assert_eq!(numeric.kind(), EventKind::Unknown);
    }

    #[test]
    fn missing_timestamp_decodes_as_empty() {
        let event = decode(br#"{"event":"todo_created","data":{"username":"alice"}}"#).unwrap();

        assert_eq!(event.timestamp(), "");
        assert_eq!(event.occurred_at(), None);
    }

    #[test]
    fn garbage_is_hard_error() {
        for payload in [
            &b"not json"[..],
            b"",
            b"[1,2,3]",
            b"\"just a string\"",
            b"{\"eventType\":\"TODO_CREATED\"",
        ] {
            let err = decode(payload).unwrap_err();
            assert!(err.is_hard(), "payload {payload:?} should be a hard failure");
            assert_eq!(err.owner(), None);
        }
    }

    #[test]
    fn missing_data_is_hard_error() {
        let err = decode(br#"{"eventType":"TODO_CREATED"}"#).unwrap_err();
        assert!(err.is_hard());

        let err = decode(br#"{"eventType":"TODO_CREATED","data":"alice"}"#).unwrap_err();
        assert!(err.is_hard());
    }

    #[test]
    fn missing_or_blank_owner_is_hard_error() {
        // Delete events from the queue-based producer only carry the todo id.
        let err = decode(br#"{"event":"todo_deleted","data":{"_id":"abc"}}"#).unwrap_err();
        assert!(err.is_hard());

        let err = decode(br#"{"event":"todo_deleted","data":{"username":"   "}}"#).unwrap_err();
        assert!(err.is_hard());

        let err = decode(br#"{"event":"todo_deleted","data":{"username":7}}"#).unwrap_err();
        assert!(err.is_hard());
    }

    #[test]
    fn kind_parsing_is_case_insensitive() {
        assert_eq!(EventKind::parse("Todo_Deleted"), EventKind::Deleted);
        assert_eq!(EventKind::parse("created"), EventKind::Created);
        assert_eq!(EventKind::parse(" TODO_STATUS_CHANGED "), EventKind::StatusChanged);
        assert_eq!(EventKind::parse("todo_"), EventKind::Unknown);
    }

    proptest! {
        #[test]
        fn non_object_payloads_are_hard_errors(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let is_object = serde_json::from_slice::<Value>(&bytes).is_ok_and(|v| v.is_object());
            prop_assume!(!is_object);

            let err = decode(&bytes).unwrap_err();
            prop_assert!(err.is_hard());
            prop_assert_eq!(err.owner(), None);
        }

        #[test]
        fn any_kind_with_owner_yields_owner(kind in ".{0,24}", owner in "[a-z][a-z0-9_]{0,15}") {
            let payload = serde_json::json!({
                "eventType": kind,
                "data": { "username": owner.clone(), "completed": true },
            });

            let event = decode(payload.to_string().as_bytes()).unwrap();
            prop_assert_eq!(event.owner(), owner.as_str());
        }
    }
}
