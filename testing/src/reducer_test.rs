//! Ergonomic testing utilities for reducers
//!
//! This module provides a fluent API for testing reducers with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // ReducerTest is the natural name

use crate::memory_storage::InMemoryStorage;
use crate::mocks::test_clock;
use flux_capacitor_core::changeset::{Changeset, RecordKey};
use flux_capacitor_core::environment::Clock;
use flux_capacitor_core::event::{EventId, NewEvent};
use flux_capacitor_core::reducer::{ReduceError, Reducer};
use serde_json::Value;

/// Type alias for changeset assertion functions
type ChangesetAssertion = Box<dyn FnOnce(&Changeset)>;

/// Type alias for error assertion functions
type ErrorAssertion = Box<dyn FnOnce(&ReduceError)>;

/// Fluent API for testing reducers with Given-When-Then syntax
///
/// The event is given the id `evt-1` (override with
/// [`with_event_id`](ReducerTest::with_event_id)) and the time of
/// [`test_clock`].
///
/// # Example
///
/// ```ignore
/// use flux_capacitor_testing::{ReducerTest, helpers::event};
///
/// ReducerTest::new(NotesReducer)
///     .given_record("notes", "n-1", json!({ "title": "a" }))
///     .when_event(event("RENAME_NOTE", json!({ "id": "n-1", "title": "b" })))
///     .then_changeset(|changeset| {
///         assert_eq!(changeset.len(), 1);
///     })
///     .run();
/// ```
pub struct ReducerTest<R: Reducer> {
    reducer: R,
    storage: InMemoryStorage,
    event_id: EventId,
    event: Option<NewEvent>,
    changeset_assertions: Vec<ChangesetAssertion>,
    error_assertions: Vec<ErrorAssertion>,
}

impl<R: Reducer> ReducerTest<R> {
    /// Create a new reducer test with the given reducer
    #[must_use]
    pub fn new(reducer: R) -> Self {
        Self {
            reducer,
            storage: InMemoryStorage::new(),
            event_id: EventId::new("evt-1"),
            event: None,
            changeset_assertions: Vec::new(),
            error_assertions: Vec::new(),
        }
    }

    /// Use an existing storage as the committed state (Given)
    #[must_use]
    pub fn given_storage(mut self, storage: InMemoryStorage) -> Self {
        self.storage = storage;
        self
    }

    /// Add one committed record (Given)
    #[must_use]
    pub fn given_record(self, table: &str, key: impl Into<RecordKey>, record: Value) -> Self {
        self.storage.seed(table, key, record);
        self
    }

    /// Override the id assigned to the event
    #[must_use]
    pub fn with_event_id(mut self, id: impl Into<String>) -> Self {
        self.event_id = EventId::new(id);
        self
    }

    /// Set the event to test (When)
    #[must_use]
    pub fn when_event(mut self, event: NewEvent) -> Self {
        self.event = Some(event);
        self
    }

    /// Add an assertion about the resulting changeset (Then)
    #[must_use]
    pub fn then_changeset<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&Changeset) + 'static,
    {
        self.changeset_assertions.push(Box::new(assertion));
        self
    }

    /// Expect the reducer to fail, and assert about the error (Then)
    #[must_use]
    pub fn then_error<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&ReduceError) + 'static,
    {
        self.error_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if no event is set, if the reducer succeeds while an error was
    /// expected (or the reverse), or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run(self) {
        let event = self
            .event
            .expect("Event must be set with when_event()")
            .into_event(self.event_id, test_clock().now());

        match self.reducer.reduce(&self.storage, &event) {
            Ok(changeset) => {
                assert!(
                    self.error_assertions.is_empty(),
                    "Expected reducer to fail, but it returned {changeset:?}"
                );
                for assertion in self.changeset_assertions {
                    assertion(&changeset);
                }
            },
            Err(error) => {
                assert!(
                    self.changeset_assertions.is_empty(),
                    "Expected a changeset, but the reducer failed: {error}"
                );
                for assertion in self.error_assertions {
                    assertion(&error);
                }
            },
        }
    }
}

/// Helper assertions for changesets
pub mod assertions {
    use flux_capacitor_core::changeset::{Changeset, OperationKind};

    /// Assert that the reducer wrote nothing
    ///
    /// # Panics
    ///
    /// Panics if the changeset is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_writes(changeset: &Changeset) {
        assert!(
            changeset.is_empty(),
            "Expected no writes, but found {}: {:?}",
            changeset.len(),
            changeset.operations()
        );
    }

    /// Assert the number of operations
    ///
    /// # Panics
    ///
    /// Panics if the number of operations doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_operations_count(changeset: &Changeset, expected: usize) {
        assert_eq!(
            changeset.len(),
            expected,
            "Expected {} operations, but found {}",
            expected,
            changeset.len()
        );
    }

    /// Find the write to `(table, key)`
    ///
    /// # Panics
    ///
    /// Panics if the changeset does not write that record.
    #[allow(clippy::panic)] // Test assertion
    #[must_use]
    pub fn expect_write<'a>(changeset: &'a Changeset, table: &str, key: &str) -> &'a OperationKind {
        changeset
            .operations()
            .iter()
            .find(|op| op.table == table && op.key.as_str() == key)
            .map(|op| &op.kind)
            .unwrap_or_else(|| panic!("Expected a write to {table}/{key}, found none"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::event;
    use flux_capacitor_core::changeset::OperationKind;
    use flux_capacitor_core::event::Event;
    use flux_capacitor_core::reducer::reducer_fn;
    use flux_capacitor_core::storage::StorageReader;
    use serde_json::json;

    fn rename_reducer() -> impl Reducer {
        reducer_fn(|storage: &dyn StorageReader, event: &Event| {
            if !event.is("RENAME_NOTE") {
                return Ok(Changeset::new());
            }
            let id = event.payload()["id"].as_str().unwrap_or_default().to_string();
            if storage.get("notes", &RecordKey::from(id.as_str()))?.is_none() {
                return Err(ReduceError::Rejected(format!("no note {id}")));
            }
            Ok(Changeset::new().update(
                "notes",
                id,
                json!({ "title": event.payload()["title"].clone() }),
            ))
        })
    }

    #[test]
    fn test_rename_existing_note() {
        ReducerTest::new(rename_reducer())
            .given_record("notes", "n-1", json!({ "title": "a" }))
            .when_event(event("RENAME_NOTE", json!({ "id": "n-1", "title": "b" })))
            .then_changeset(|changeset| {
                assertions::assert_operations_count(changeset, 1);
                assert_eq!(
                    assertions::expect_write(changeset, "notes", "n-1"),
                    &OperationKind::Update(json!({ "title": "b" }))
                );
            })
            .run();
    }

    #[test]
    fn test_rename_missing_note_is_rejected() {
        ReducerTest::new(rename_reducer())
            .when_event(event("RENAME_NOTE", json!({ "id": "ghost", "title": "b" })))
            .then_error(|error| {
                assert_eq!(error, &ReduceError::Rejected("no note ghost".to_string()));
            })
            .run();
    }

    #[test]
    fn test_unrelated_event_writes_nothing() {
        ReducerTest::new(rename_reducer())
            .when_event(event("PING", Value::Null))
            .then_changeset(assertions::assert_no_writes)
            .run();
    }

    #[test]
    fn test_event_id_is_configurable() {
        let log = flux_capacitor_core::event_log::EventLogReducer::new();
        ReducerTest::new(log)
            .with_event_id("evt-42")
            .when_event(event("PING", Value::Null))
            .then_changeset(|changeset| {
                assert!(matches!(
                    assertions::expect_write(changeset, "events", "evt-42"),
                    OperationKind::Insert(_)
                ));
            })
            .run();
    }

    #[test]
    #[should_panic(expected = "Expected reducer to fail")]
    fn test_unexpected_success_panics() {
        ReducerTest::new(rename_reducer())
            .when_event(event("PING", Value::Null))
            .then_error(|_| {})
            .run();
    }
}
