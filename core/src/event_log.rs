//! The event log reducer.
//!
//! Registered alongside the domain reducers, [`EventLogReducer`] appends
//! every event to an append-only log table, whatever its type. Because it
//! runs inside the same aggregate as the domain reducers, its insert is
//! merged into the same changeset and committed in the same transaction.

use crate::changeset::Changeset;
use crate::event::Event;
use crate::reducer::{ReduceError, Reducer};
use crate::storage::StorageReader;

/// Table the event log is written to unless configured otherwise.
pub const DEFAULT_EVENT_LOG_TABLE: &str = "events";

/// Appends each event to the log table, keyed by its id.
///
/// The record is [`Event::to_record`]: `{ id, type, payload, recorded_at }`.
#[derive(Debug, Clone)]
pub struct EventLogReducer {
    table: String,
}

impl EventLogReducer {
    /// Log into [`DEFAULT_EVENT_LOG_TABLE`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_table(DEFAULT_EVENT_LOG_TABLE)
    }

    /// Log into a custom table.
    #[must_use]
    pub fn with_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// The log table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Default for EventLogReducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Reducer for EventLogReducer {
    fn reduce(&self, _storage: &dyn StorageReader, event: &Event) -> Result<Changeset, ReduceError> {
        Ok(Changeset::new().insert(self.table.as_str(), event.id(), event.to_record()))
    }
}
