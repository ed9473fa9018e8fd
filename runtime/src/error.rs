//! Error types for the Store runtime.

use flux_capacitor_core::combine::CombineConflictError;
use flux_capacitor_core::error::{ReduceError, ValidationError};
use flux_capacitor_core::storage::StorageError;
use thiserror::Error;

/// The store could not be constructed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No reducer was supplied.
    #[error("Expected a reducer to be used by the store")]
    MissingReducer,

    /// No storage adapter was supplied.
    #[error("Expected a storage adapter to be used by the store")]
    MissingStorage,
}

/// Why a dispatch was rejected.
///
/// Whatever the variant, a rejected dispatch leaves storage (event log
/// included) exactly as it was.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The input was rejected before any storage access.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The storage adapter could not assign an event id.
    #[error("Failed to assign an event id: {0}")]
    EventId(#[source] StorageError),

    /// A reducer failed.
    #[error("Reducer failed: {0}")]
    Reduce(#[source] ReduceError),

    /// The changesets of a batch could not be merged.
    #[error(transparent)]
    Conflict(#[from] CombineConflictError),

    /// Beginning, performing or committing the transaction failed.
    #[error("Transaction failed: {0}")]
    Transaction(#[source] StorageError),
}

impl DispatchError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::EventId(_) => "event_id",
            Self::Reduce(_) => "reduce",
            Self::Conflict(_) => "conflict",
            Self::Transaction(_) => "transaction",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_capacitor_core::changeset::RecordKey;
    use flux_capacitor_core::combine::ConflictReason;

    #[test]
    fn configuration_messages() {
        assert_eq!(
            ConfigurationError::MissingStorage.to_string(),
            "Expected a storage adapter to be used by the store"
        );
        assert_eq!(
            ConfigurationError::MissingReducer.to_string(),
            "Expected a reducer to be used by the store"
        );
    }

    #[test]
    fn validation_errors_display_unchanged() {
        let error = DispatchError::from(ValidationError::MissingType);
        assert_eq!(error.to_string(), ValidationError::MissingType.to_string());
        assert_eq!(error.kind(), "validation");
    }

    #[test]
    fn transaction_errors_keep_their_source() {
        let error = DispatchError::Transaction(StorageError::Backend("disk full".to_string()));
        assert_eq!(error.to_string(), "Transaction failed: Storage backend error: disk full");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn conflicts_convert() {
        let conflict = CombineConflictError {
            table: "notes".to_string(),
            key: RecordKey::from("n-1"),
            first: 0,
            second: 1,
            reason: ConflictReason::DuplicateInsert,
        };
        let error = DispatchError::from(conflict);
        assert_eq!(error.kind(), "conflict");
        assert!(error.to_string().starts_with("Conflicting writes to notes/n-1"));
    }
}
