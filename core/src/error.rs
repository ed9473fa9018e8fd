//! Validation and reducer error types.

use crate::combine::CombineConflictError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised while validating the shape of an incoming event.
///
/// Validation runs before any storage access, so an event rejected with a
/// `ValidationError` has had no effect on the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The event was not a JSON object.
    #[error("Expected event to be an object, but got: {found}")]
    NotAnObject {
        /// JSON kind that was supplied instead (`"array"`, `"string"`, ...)
        found: &'static str,
    },

    /// The event has no `type` field, or it is `null`.
    #[error("Expected event to have a type")]
    MissingType,

    /// The `type` field is present but is not a string.
    #[error("Expected event type to be a string, but got: {found}")]
    NonStringType {
        /// JSON kind of the `type` field
        found: &'static str,
    },

    /// The `type` field is an empty string.
    #[error("Expected event type to be a non-empty string")]
    EmptyType,

    /// A batch dispatch was attempted with no events.
    #[error("Expected a batch to contain at least one event")]
    EmptyBatch,

    /// One event of a batch failed validation.
    #[error("Invalid event at batch index {index}: {source}")]
    InBatch {
        /// Position of the offending event within the batch
        index: usize,
        /// Why the event was rejected
        source: Box<ValidationError>,
    },

    /// A typed domain event could not be serialized into the event shape.
    #[error("Failed to encode event: {0}")]
    Encode(String),
}

/// Errors a reducer can return instead of a changeset.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReduceError {
    /// Reading the storage snapshot failed.
    #[error("Storage read failed: {0}")]
    Storage(#[from] StorageError),

    /// Sub-reducer changesets could not be merged.
    #[error(transparent)]
    Conflict(#[from] CombineConflictError),

    /// The reducer refused the event (domain rule violated).
    #[error("Event rejected by reducer: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_an_object_display_names_the_kind() {
        let error = ValidationError::NotAnObject { found: "array" };
        assert_eq!(
            error.to_string(),
            "Expected event to be an object, but got: array"
        );
    }

    #[test]
    fn in_batch_display_includes_index_and_cause() {
        let error = ValidationError::InBatch {
            index: 2,
            source: Box::new(ValidationError::MissingType),
        };
        let display = error.to_string();
        assert!(display.contains("index 2"));
        assert!(display.contains("Expected event to have a type"));
    }

    #[test]
    fn reduce_error_wraps_storage_error() {
        let error = ReduceError::from(StorageError::Unavailable("offline".to_string()));
        assert!(error.to_string().contains("offline"));
    }
}
