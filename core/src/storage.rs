//! Storage adapter contract.
//!
//! The event store does not own a database. It talks to one through the
//! [`Storage`] trait, which an adapter (SQL, key-value, in-memory, ...)
//! implements. The contract is deliberately small:
//!
//! - Assign a unique id to each dispatched event
//! - Read committed records ([`StorageReader`])
//! - Apply an [`AggregatedChangeset`] atomically through a [`Transaction`]
//!
//! Reducers and external callers only ever see a [`StorageReader`]; the
//! store hands out a [`ReadOnlyStorage`] handle so that no code outside the
//! dispatch pipeline can reach `begin`.
//!
//! # Dyn Compatibility
//!
//! Async methods return explicit `Pin<Box<dyn Future>>` values instead of
//! using `async fn`, so adapters can be used as `Arc<dyn Storage>`.

use crate::changeset::RecordKey;
use crate::combine::{AggregatedChangeset, Combiner, replay};
use crate::event::EventId;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Boxed future returned by storage operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// Errors reported by a storage adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The backend failed (connection lost, query failed, ...).
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// An operation violated a storage constraint.
    #[error("Constraint violated on {table}/{key}: {reason}")]
    Constraint {
        /// Table of the offending record
        table: String,
        /// Key of the offending record
        key: RecordKey,
        /// What the adapter refused
        reason: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("Transaction is no longer open")]
    TransactionClosed,

    /// The backend cannot be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Read access to committed storage state.
///
/// This is the only capability reducers receive.
pub trait StorageReader: Send + Sync {
    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Value>, StorageError>;

    /// Fetch every record of a table, ordered by key.
    ///
    /// A table that was never written is empty, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend cannot be read.
    fn scan(&self, table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError>;
}

/// An open storage transaction.
///
/// Work performed through a transaction becomes visible only on
/// [`commit`](Transaction::commit). Dropping a transaction without
/// committing discards its work.
pub trait Transaction: Send {
    /// Stage the operations of a changeset.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if an operation is rejected. The transaction
    /// must then be rolled back.
    fn perform<'a>(&'a mut self, changeset: &'a AggregatedChangeset) -> StorageFuture<'a, ()>;

    /// Make all staged work durable and visible, atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the commit fails; nothing becomes visible.
    fn commit(self: Box<Self>) -> StorageFuture<'static, ()>;

    /// Discard all staged work.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend reports a rollback failure.
    fn rollback(self: Box<Self>) -> StorageFuture<'static, ()>;
}

/// A storage adapter.
pub trait Storage: StorageReader {
    /// Produce a fresh, unique event id.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the adapter cannot allocate an id.
    fn create_event_id(&self) -> StorageFuture<'_, EventId>;

    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if no transaction can be started.
    fn begin(&self) -> StorageFuture<'_, Box<dyn Transaction>>;
}

/// Apply a changeset in a single transaction: begin, perform, commit.
///
/// If `perform` fails the transaction is rolled back and the `perform`
/// error is returned.
///
/// # Errors
///
/// Returns the first [`StorageError`] from `begin`, `perform` or `commit`.
pub async fn apply_atomically(
    storage: &dyn Storage,
    changeset: &AggregatedChangeset,
) -> Result<(), StorageError> {
    let mut transaction = storage.begin().await?;

    if let Err(error) = transaction.perform(changeset).await {
        tracing::warn!(%error, "Transaction perform failed, rolling back");
        if let Err(rollback_error) = transaction.rollback().await {
            tracing::error!(error = %rollback_error, "Rollback failed");
        }
        return Err(error);
    }

    transaction.commit().await
}

/// Capability-restricted view of a storage adapter.
///
/// Exposes only [`StorageReader`]; there is no way to obtain the underlying
/// [`Storage`] (and with it `begin`) from this handle. Cloning is cheap.
#[derive(Clone)]
pub struct ReadOnlyStorage {
    inner: Arc<dyn Storage>,
}

impl ReadOnlyStorage {
    /// Restrict a storage adapter to reads.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { inner: storage }
    }
}

impl StorageReader for ReadOnlyStorage {
    fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Value>, StorageError> {
        self.inner.get(table, key)
    }

    fn scan(&self, table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError> {
        self.inner.scan(table)
    }
}

impl fmt::Debug for ReadOnlyStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyStorage").finish_non_exhaustive()
    }
}

/// Committed state overlaid with writes staged in a [`Combiner`].
///
/// The store hands this to the reducers of each event in a batch, so they
/// see what the events before them will write.
pub struct StagedReader<'a> {
    committed: &'a dyn StorageReader,
    staged: &'a Combiner,
}

impl<'a> StagedReader<'a> {
    /// Overlay `staged` on `committed`.
    #[must_use]
    pub const fn new(committed: &'a dyn StorageReader, staged: &'a Combiner) -> Self {
        Self { committed, staged }
    }
}

impl StorageReader for StagedReader<'_> {
    fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Value>, StorageError> {
        let committed = self.committed.get(table, key)?;
        Ok(match self.staged.pending(table, key) {
            Some(steps) => replay(committed, steps),
            None => committed,
        })
    }

    fn scan(&self, table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError> {
        let mut rows: BTreeMap<RecordKey, Value> = self.committed.scan(table)?.into_iter().collect();
        for (key, steps) in self.staged.pending_in(table) {
            if let Some(record) = replay(rows.remove(key), steps) {
                rows.insert(key.clone(), record);
            }
        }
        Ok(rows.into_iter().collect())
    }
}

impl fmt::Debug for StagedReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedReader")
            .field("staged_inputs", &self.staged.inputs())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::changeset::Changeset;
    use crate::combine::{ConflictPolicy, combine};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records the sequence of transaction calls.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<&'static str>>,
        fail_perform: bool,
        fail_commit: bool,
    }

    struct RecorderStorage(Arc<Recorder>);

    struct RecorderTransaction(Arc<Recorder>);

    impl Recorder {
        fn record(&self, call: &'static str) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StorageReader for RecorderStorage {
        fn get(&self, _table: &str, _key: &RecordKey) -> Result<Option<Value>, StorageError> {
            Ok(None)
        }

        fn scan(&self, _table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError> {
            Ok(Vec::new())
        }
    }

    impl Storage for RecorderStorage {
        fn create_event_id(&self) -> StorageFuture<'_, EventId> {
            Box::pin(async { Ok(EventId::new("evt-1")) })
        }

        fn begin(&self) -> StorageFuture<'_, Box<dyn Transaction>> {
            self.0.record("begin");
            let transaction: Box<dyn Transaction> = Box::new(RecorderTransaction(self.0.clone()));
            Box::pin(async move { Ok(transaction) })
        }
    }

    impl Transaction for RecorderTransaction {
        fn perform<'a>(&'a mut self, _changeset: &'a AggregatedChangeset) -> StorageFuture<'a, ()> {
            self.0.record("perform");
            let result = if self.0.fail_perform {
                Err(StorageError::Backend("perform refused".to_string()))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn commit(self: Box<Self>) -> StorageFuture<'static, ()> {
            self.0.record("commit");
            let result = if self.0.fail_commit {
                Err(StorageError::Backend("commit refused".to_string()))
            } else {
                Ok(())
            };
            Box::pin(async move { result })
        }

        fn rollback(self: Box<Self>) -> StorageFuture<'static, ()> {
            self.0.record("rollback");
            Box::pin(async { Ok(()) })
        }
    }

    fn changeset() -> AggregatedChangeset {
        combine(
            [Changeset::new().insert("notes", "n-1", json!({}))],
            ConflictPolicy::Reject,
        )
        .unwrap()
    }

    #[test]
    fn apply_atomically_commits_after_perform() {
        let recorder = Arc::new(Recorder::default());
        let storage = RecorderStorage(recorder.clone());

        tokio_test::block_on(apply_atomically(&storage, &changeset())).unwrap();

        assert_eq!(recorder.calls(), ["begin", "perform", "commit"]);
    }

    #[test]
    fn apply_atomically_rolls_back_failed_perform() {
        let recorder = Arc::new(Recorder {
            fail_perform: true,
            ..Recorder::default()
        });
        let storage = RecorderStorage(recorder.clone());

        let error = tokio_test::block_on(apply_atomically(&storage, &changeset())).unwrap_err();

        assert_eq!(error, StorageError::Backend("perform refused".to_string()));
        assert_eq!(recorder.calls(), ["begin", "perform", "rollback"]);
    }

    #[test]
    fn apply_atomically_surfaces_commit_failure() {
        let recorder = Arc::new(Recorder {
            fail_commit: true,
            ..Recorder::default()
        });
        let storage = RecorderStorage(recorder.clone());

        let error = tokio_test::block_on(apply_atomically(&storage, &changeset())).unwrap_err();

        assert!(error.to_string().contains("commit refused"));
    }

    #[test]
    fn read_only_storage_delegates_reads() {
        let storage: Arc<dyn Storage> = Arc::new(RecorderStorage(Arc::new(Recorder::default())));
        let reader = ReadOnlyStorage::new(storage);

        assert_eq!(reader.get("notes", &RecordKey::from("n-1")).unwrap(), None);
        assert!(reader.scan("notes").unwrap().is_empty());
    }

    /// Fixed committed rows for the `notes` table.
    struct Committed(BTreeMap<RecordKey, Value>);

    impl StorageReader for Committed {
        fn get(&self, _table: &str, key: &RecordKey) -> Result<Option<Value>, StorageError> {
            Ok(self.0.get(key).cloned())
        }

        fn scan(&self, _table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError> {
            Ok(self.0.clone().into_iter().collect())
        }
    }

    #[test]
    fn staged_reader_overlays_pending_writes() {
        let committed = Committed(BTreeMap::from([
            (RecordKey::from("n-1"), json!({ "title": "a" })),
            (RecordKey::from("n-2"), json!({ "title": "b" })),
        ]));
        let mut staged = Combiner::new(ConflictPolicy::Sequence);
        staged
            .push(
                Changeset::new()
                    .update("notes", "n-1", json!({ "pinned": true }))
                    .delete("notes", "n-2")
                    .insert("notes", "n-3", json!({ "title": "c" })),
            )
            .unwrap();

        let reader = StagedReader::new(&committed, &staged);

        assert_eq!(
            reader.get("notes", &RecordKey::from("n-1")).unwrap(),
            Some(json!({ "title": "a", "pinned": true }))
        );
        assert_eq!(reader.get("notes", &RecordKey::from("n-2")).unwrap(), None);
        let keys: Vec<_> = reader
            .scan("notes")
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, [RecordKey::from("n-1"), RecordKey::from("n-3")]);
    }

    #[test]
    fn staged_reader_without_pending_writes_reads_committed_state() {
        let committed = Committed(BTreeMap::from([(RecordKey::from("n-1"), json!({}))]));
        let staged = Combiner::new(ConflictPolicy::Sequence);
        let reader = StagedReader::new(&committed, &staged);

        assert_eq!(reader.get("notes", &RecordKey::from("n-1")).unwrap(), Some(json!({})));
        assert_eq!(reader.scan("notes").unwrap().len(), 1);
    }
}
