//! Event model for the event store.
//!
//! Events are immutable facts. They enter the system as a [`NewEvent`]: a
//! validated `{ type, payload }` pair with a mandatory, non-empty type
//! discriminant. When dispatched, the storage adapter assigns an [`EventId`]
//! and the store stamps a timestamp, producing an [`Event`] that never
//! changes afterwards.
//!
//! Domain code usually models its events as a serde adjacently-tagged enum,
//! which serializes to exactly the event wire shape:
//!
//! ```
//! use flux_capacitor_core::event::NewEvent;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! #[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
//! enum NoteEvent {
//!     CreateNote { title: String },
//!     DeleteNote { id: String },
//! }
//!
//! let event = NewEvent::encode(&NoteEvent::CreateNote { title: "x".into() }).unwrap();
//! assert_eq!(event.event_type(), "CREATE_NOTE");
//! ```

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;

/// Unique identifier assigned to an event by the storage adapter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wrap an adapter-generated identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated event that has not been dispatched yet.
///
/// The only ways to build one validate the shape, so holding a `NewEvent`
/// proves the event has a non-empty string type. Any `id` the caller
/// supplies is discarded: ids come from storage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewEvent {
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
}

impl NewEvent {
    /// Create an event from a type and a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyType`] if `event_type` is empty.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Result<Self, ValidationError> {
        let event_type = event_type.into();
        if event_type.is_empty() {
            return Err(ValidationError::EmptyType);
        }
        Ok(Self {
            event_type,
            payload,
        })
    }

    /// Encode a typed domain event.
    ///
    /// `event` must serialize to `{ "type": <string>, "payload": <any> }`,
    /// which is what `#[serde(tag = "type", content = "payload")]` produces.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Encode`] if serialization fails, or any
    /// shape error from [`NewEvent::try_from`].
    pub fn encode<T: Serialize>(event: &T) -> Result<Self, ValidationError> {
        let value =
            serde_json::to_value(event).map_err(|e| ValidationError::Encode(e.to_string()))?;
        Self::try_from(value)
    }

    /// The type discriminant.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Turn this event into an immutable, id-assigned [`Event`].
    #[must_use]
    pub fn into_event(self, id: EventId, recorded_at: DateTime<Utc>) -> Event {
        Event {
            id,
            event_type: self.event_type,
            payload: self.payload,
            recorded_at,
        }
    }
}

impl TryFrom<Value> for NewEvent {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(ValidationError::NotAnObject {
                    found: json_kind(&other),
                });
            },
        };

        let event_type = match fields.remove("type") {
            None | Some(Value::Null) => return Err(ValidationError::MissingType),
            Some(Value::String(event_type)) => event_type,
            Some(other) => {
                return Err(ValidationError::NonStringType {
                    found: json_kind(&other),
                });
            },
        };

        let payload = fields.remove("payload").unwrap_or(Value::Null);
        Self::new(event_type, payload)
    }
}

/// An immutable, id-assigned event.
///
/// Serializes as `{ "id", "type", "payload", "recorded_at" }`, which is also
/// the record shape written to the event log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    #[serde(rename = "type")]
    event_type: String,
    payload: Value,
    recorded_at: DateTime<Utc>,
}

impl Event {
    /// The storage-assigned identifier.
    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    /// The type discriminant.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event payload.
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// When the store assigned this event its id.
    #[must_use]
    pub const fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    /// Whether this event has the given type.
    #[must_use]
    pub fn is(&self, event_type: &str) -> bool {
        self.event_type == event_type
    }

    /// Decode into a typed domain event.
    ///
    /// The inverse of [`NewEvent::encode`]. Reducers typically treat a decode
    /// failure as "not my event" and return an empty changeset.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the type is unknown to `T` or the payload
    /// does not match.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let mut tagged = Map::with_capacity(2);
        tagged.insert("type".to_string(), Value::String(self.event_type.clone()));
        // unit variants carry no content
        if !self.payload.is_null() {
            tagged.insert("payload".to_string(), self.payload.clone());
        }
        serde_json::from_value(Value::Object(tagged))
    }

    /// The log-table record for this event.
    #[must_use]
    pub fn to_record(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.event_type,
            "payload": self.payload,
            "recorded_at": self.recorded_at,
        })
    }

    /// Rebuild an event from a log-table record.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the record is not a logged event.
    pub fn from_record(record: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(record)
    }
}

/// JSON kind name used in validation messages.
const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
    enum NoteEvent {
        CreateNote { title: String },
        ClearNotes,
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn empty_object_is_missing_type() {
        assert_eq!(
            NewEvent::try_from(json!({})),
            Err(ValidationError::MissingType)
        );
    }

    #[test]
    fn numeric_type_is_rejected() {
        assert_eq!(
            NewEvent::try_from(json!({ "type": 123 })),
            Err(ValidationError::NonStringType { found: "number" })
        );
    }

    #[test]
    fn null_type_is_missing_type() {
        assert_eq!(
            NewEvent::try_from(json!({ "type": null, "payload": 1 })),
            Err(ValidationError::MissingType)
        );
    }

    #[test]
    fn empty_type_is_rejected() {
        assert_eq!(
            NewEvent::try_from(json!({ "type": "" })),
            Err(ValidationError::EmptyType)
        );
    }

    #[test]
    fn non_objects_are_rejected_with_their_kind() {
        assert_eq!(
            NewEvent::try_from(json!("CREATE_NOTE")),
            Err(ValidationError::NotAnObject { found: "string" })
        );
        assert_eq!(
            NewEvent::try_from(json!([{ "type": "A" }])),
            Err(ValidationError::NotAnObject { found: "array" })
        );
    }

    #[test]
    fn missing_payload_defaults_to_null_and_caller_id_is_dropped() {
        let event = NewEvent::try_from(json!({ "type": "PING", "id": "forged" })).unwrap();
        assert_eq!(event.event_type(), "PING");
        assert_eq!(event.payload(), &Value::Null);

        let event = event.into_event(EventId::new("evt-1"), at());
        assert_eq!(event.id().as_str(), "evt-1");
    }

    #[test]
    fn typed_events_round_trip_through_encode_and_decode() {
        let new_event = NewEvent::encode(&NoteEvent::CreateNote {
            title: "x".to_string(),
        })
        .unwrap();
        assert_eq!(new_event.event_type(), "CREATE_NOTE");
        assert_eq!(new_event.payload(), &json!({ "title": "x" }));

        let event = new_event.into_event(EventId::new("evt-7"), at());
        assert_eq!(
            event.decode::<NoteEvent>().unwrap(),
            NoteEvent::CreateNote {
                title: "x".to_string()
            }
        );
    }

    #[test]
    fn unit_variants_encode_without_payload() {
        let event = NewEvent::encode(&NoteEvent::ClearNotes)
            .unwrap()
            .into_event(EventId::new("evt-2"), at());
        assert_eq!(event.payload(), &Value::Null);
        assert_eq!(event.decode::<NoteEvent>().unwrap(), NoteEvent::ClearNotes);
    }

    #[test]
    fn unknown_types_fail_to_decode() {
        let event = NewEvent::new("SOMETHING_ELSE", json!({}))
            .unwrap()
            .into_event(EventId::new("evt-3"), at());
        assert!(event.decode::<NoteEvent>().is_err());
    }

    #[test]
    fn log_record_round_trips() {
        let event = NewEvent::new("CREATE_NOTE", json!({ "title": "x" }))
            .unwrap()
            .into_event(EventId::new("evt-4"), at());
        let record = event.to_record();
        assert_eq!(record["id"], "evt-4");
        assert_eq!(record["type"], "CREATE_NOTE");
        assert_eq!(Event::from_record(&record).unwrap(), event);
    }
}
