//! In-memory storage adapter for tests
//!
//! [`InMemoryStorage`] implements the full storage contract on top of
//! `BTreeMap` tables, with call accounting and failure injection so tests
//! can assert exactly how the store used its storage.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use flux_capacitor_core::changeset::{Operation, OperationKind, RecordKey, merge_fields};
use flux_capacitor_core::combine::AggregatedChangeset;
use flux_capacitor_core::event::EventId;
use flux_capacitor_core::storage::{Storage, StorageError, StorageFuture, StorageReader, Transaction};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

type Tables = BTreeMap<String, BTreeMap<RecordKey, Value>>;

/// How many times each storage method was called.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StorageCalls {
    /// `create_event_id`
    pub create_event_id: usize,
    /// `begin`
    pub begin: usize,
    /// `Transaction::perform`
    pub perform: usize,
    /// `Transaction::commit`
    pub commit: usize,
    /// `Transaction::rollback`
    pub rollback: usize,
    /// `get`
    pub get: usize,
    /// `scan`
    pub scan: usize,
}

impl StorageCalls {
    /// Calls other than reads.
    #[must_use]
    pub const fn writes(&self) -> usize {
        self.create_event_id + self.begin + self.perform + self.commit + self.rollback
    }

    /// All calls.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.writes() + self.get + self.scan
    }
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    last_event_id: u64,
    calls: StorageCalls,
    committed: Vec<AggregatedChangeset>,
    fail_next_event_id: bool,
    fail_next_begin: bool,
    fail_next_commit: bool,
}

/// In-memory storage for fast, deterministic testing.
///
/// Clones share the same tables, so a test can keep one handle for
/// inspection and give another to the store.
///
/// Event ids are sequential: `evt-1`, `evt-2`, ...
///
/// # Example
///
/// ```
/// use flux_capacitor_core::storage::StorageReader;
/// use flux_capacitor_testing::InMemoryStorage;
/// use serde_json::json;
///
/// let storage = InMemoryStorage::new();
/// storage.seed("notes", "n-1", json!({ "title": "groceries" }));
///
/// assert_eq!(storage.dump(), json!({ "notes": { "n-1": { "title": "groceries" } } }));
/// assert_eq!(storage.scan("notes").unwrap().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryStorage {
    state: Arc<RwLock<State>>,
}

impl InMemoryStorage {
    /// Create an empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a record directly, bypassing transactions and accounting
    ///
    /// For arranging the "given" state of a test.
    pub fn seed(&self, table: impl Into<String>, key: impl Into<RecordKey>, record: Value) {
        self.state
            .write()
            .unwrap()
            .tables
            .entry(table.into())
            .or_default()
            .insert(key.into(), record);
    }

    /// Make the next `create_event_id` fail
    pub fn fail_next_event_id(&self) {
        self.state.write().unwrap().fail_next_event_id = true;
    }

    /// Make the next `begin` fail
    pub fn fail_next_begin(&self) {
        self.state.write().unwrap().fail_next_begin = true;
    }

    /// Make the next `commit` fail
    pub fn fail_next_commit(&self) {
        self.state.write().unwrap().fail_next_commit = true;
    }

    /// Per-method call counters
    #[must_use]
    pub fn calls(&self) -> StorageCalls {
        self.state.read().unwrap().calls
    }

    /// Changesets of committed transactions, in commit order
    #[must_use]
    pub fn committed(&self) -> Vec<AggregatedChangeset> {
        self.state.read().unwrap().committed.clone()
    }

    /// One record, without counting as a `get`
    #[must_use]
    pub fn record(&self, table: &str, key: &str) -> Option<Value> {
        self.state
            .read()
            .unwrap()
            .tables
            .get(table)
            .and_then(|rows| rows.get(&RecordKey::from(key)))
            .cloned()
    }

    /// Number of records in a table
    #[must_use]
    pub fn table_len(&self, table: &str) -> usize {
        self.state
            .read()
            .unwrap()
            .tables
            .get(table)
            .map_or(0, BTreeMap::len)
    }

    /// All tables as JSON: `{ table: { key: record } }`, keys sorted
    #[must_use]
    pub fn dump(&self) -> Value {
        let state = self.state.read().unwrap();
        let tables: Map<String, Value> = state
            .tables
            .iter()
            .map(|(table, rows)| {
                let rows: Map<String, Value> = rows
                    .iter()
                    .map(|(key, record)| (key.to_string(), record.clone()))
                    .collect();
                (table.clone(), Value::Object(rows))
            })
            .collect();
        Value::Object(tables)
    }
}

impl StorageReader for InMemoryStorage {
    fn get(&self, table: &str, key: &RecordKey) -> Result<Option<Value>, StorageError> {
        let mut state = self.state.write().unwrap();
        state.calls.get += 1;
        Ok(state
            .tables
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn scan(&self, table: &str) -> Result<Vec<(RecordKey, Value)>, StorageError> {
        let mut state = self.state.write().unwrap();
        state.calls.scan += 1;
        Ok(state
            .tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|(key, record)| (key.clone(), record.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Storage for InMemoryStorage {
    fn create_event_id(&self) -> StorageFuture<'_, EventId> {
        let result = {
            let mut state = self.state.write().unwrap();
            state.calls.create_event_id += 1;
            if std::mem::take(&mut state.fail_next_event_id) {
                Err(StorageError::Unavailable("injected event id failure".to_string()))
            } else {
                state.last_event_id += 1;
                Ok(EventId::new(format!("evt-{}", state.last_event_id)))
            }
        };
        Box::pin(async move { result })
    }

    fn begin(&self) -> StorageFuture<'_, Box<dyn Transaction>> {
        let result = {
            let mut state = self.state.write().unwrap();
            state.calls.begin += 1;
            if std::mem::take(&mut state.fail_next_begin) {
                Err(StorageError::Unavailable("injected begin failure".to_string()))
            } else {
                Ok(Box::new(InMemoryTransaction {
                    state: Arc::clone(&self.state),
                    staged: Vec::new(),
                }) as Box<dyn Transaction>)
            }
        };
        Box::pin(async move { result })
    }
}

/// Transaction over [`InMemoryStorage`].
///
/// `perform` validates against the committed tables plus earlier staged
/// work; `commit` re-applies the staged changesets to the tables as they
/// are at commit time and publishes the result in one step.
struct InMemoryTransaction {
    state: Arc<RwLock<State>>,
    staged: Vec<AggregatedChangeset>,
}

impl InMemoryTransaction {
    fn apply_staged(&self, tables: &mut Tables) -> Result<(), StorageError> {
        self.staged
            .iter()
            .flat_map(AggregatedChangeset::operations)
            .try_for_each(|op| apply(tables, op))
    }
}

impl Transaction for InMemoryTransaction {
    fn perform<'a>(&'a mut self, changeset: &'a AggregatedChangeset) -> StorageFuture<'a, ()> {
        let result = {
            let mut state = self.state.write().unwrap();
            state.calls.perform += 1;
            let mut scratch = state.tables.clone();
            drop(state);

            self.apply_staged(&mut scratch).and_then(|()| {
                changeset
                    .operations()
                    .iter()
                    .try_for_each(|op| apply(&mut scratch, op))
            })
        };
        if result.is_ok() {
            self.staged.push(changeset.clone());
        }
        Box::pin(async move { result })
    }

    fn commit(self: Box<Self>) -> StorageFuture<'static, ()> {
        let result = {
            let mut state = self.state.write().unwrap();
            state.calls.commit += 1;
            if std::mem::take(&mut state.fail_next_commit) {
                Err(StorageError::Backend("injected commit failure".to_string()))
            } else {
                let mut next = state.tables.clone();
                self.apply_staged(&mut next).map(|()| {
                    state.tables = next;
                    state.committed.extend(self.staged.iter().cloned());
                })
            }
        };
        Box::pin(async move { result })
    }

    fn rollback(self: Box<Self>) -> StorageFuture<'static, ()> {
        self.state.write().unwrap().calls.rollback += 1;
        Box::pin(async { Ok(()) })
    }
}

fn apply(tables: &mut Tables, op: &Operation) -> Result<(), StorageError> {
    let constraint = |reason: &str| StorageError::Constraint {
        table: op.table.clone(),
        key: op.key.clone(),
        reason: reason.to_string(),
    };

    match &op.kind {
        OperationKind::Insert(record) => {
            let rows = tables.entry(op.table.clone()).or_default();
            if rows.contains_key(&op.key) {
                return Err(constraint("record already exists"));
            }
            rows.insert(op.key.clone(), record.clone());
        },
        OperationKind::Upsert(record) => {
            tables
                .entry(op.table.clone())
                .or_default()
                .insert(op.key.clone(), record.clone());
        },
        OperationKind::Update(patch) => {
            let existing = tables
                .get_mut(&op.table)
                .and_then(|rows| rows.get_mut(&op.key))
                .ok_or_else(|| constraint("update of a missing record"))?;
            merge_fields(existing, patch.clone());
        },
        OperationKind::Delete => {
            tables
                .get_mut(&op.table)
                .and_then(|rows| rows.remove(&op.key))
                .ok_or_else(|| constraint("delete of a missing record"))?;
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_capacitor_core::changeset::Changeset;
    use flux_capacitor_core::combine::{ConflictPolicy, combine};
    use flux_capacitor_core::storage::apply_atomically;
    use serde_json::json;

    fn aggregated(changeset: Changeset) -> AggregatedChangeset {
        combine([changeset], ConflictPolicy::Reject).unwrap()
    }

    #[test]
    fn event_ids_are_sequential() {
        let storage = InMemoryStorage::new();
        let first = tokio_test::block_on(storage.create_event_id()).unwrap();
        let second = tokio_test::block_on(storage.create_event_id()).unwrap();

        assert_eq!(first.as_str(), "evt-1");
        assert_eq!(second.as_str(), "evt-2");
        assert_eq!(storage.calls().create_event_id, 2);
    }

    #[test]
    fn committed_work_becomes_visible() {
        let storage = InMemoryStorage::new();
        let changeset = aggregated(
            Changeset::new()
                .insert("notes", "n-1", json!({ "title": "a" }))
                .upsert("stats", "notes", json!({ "count": 1 })),
        );

        tokio_test::block_on(apply_atomically(&storage, &changeset)).unwrap();

        assert_eq!(storage.record("notes", "n-1"), Some(json!({ "title": "a" })));
        assert_eq!(storage.committed(), vec![changeset]);
        let calls = storage.calls();
        assert_eq!((calls.begin, calls.perform, calls.commit), (1, 1, 1));
    }

    #[test]
    fn uncommitted_work_is_invisible() {
        let storage = InMemoryStorage::new();
        let changeset = aggregated(Changeset::new().insert("notes", "n-1", json!({})));

        tokio_test::block_on(async {
            let mut transaction = storage.begin().await.unwrap();
            transaction.perform(&changeset).await.unwrap();
            assert_eq!(storage.record("notes", "n-1"), None);
            transaction.rollback().await.unwrap();
        });

        assert_eq!(storage.dump(), json!({}));
        assert_eq!(storage.calls().rollback, 1);
    }

    #[test]
    fn constraint_violations_roll_back() {
        let storage = InMemoryStorage::new();
        storage.seed("notes", "n-1", json!({ "title": "a" }));
        let before = storage.dump();

        let changeset = aggregated(
            Changeset::new()
                .upsert("stats", "notes", json!({ "count": 2 }))
                .insert("notes", "n-1", json!({ "title": "b" })),
        );
        let error = tokio_test::block_on(apply_atomically(&storage, &changeset)).unwrap_err();

        assert!(matches!(error, StorageError::Constraint { .. }));
        assert_eq!(storage.dump(), before);
        assert!(storage.committed().is_empty());
    }

    #[test]
    fn update_merges_and_delete_removes() {
        let storage = InMemoryStorage::new();
        storage.seed("notes", "n-1", json!({ "title": "a", "pinned": false }));
        storage.seed("notes", "n-2", json!({ "title": "b" }));

        let changeset = aggregated(
            Changeset::new()
                .update("notes", "n-1", json!({ "pinned": true }))
                .delete("notes", "n-2"),
        );
        tokio_test::block_on(apply_atomically(&storage, &changeset)).unwrap();

        assert_eq!(
            storage.dump(),
            json!({ "notes": { "n-1": { "title": "a", "pinned": true } } })
        );
    }

    #[test]
    fn missing_records_cannot_be_updated_or_deleted() {
        let storage = InMemoryStorage::new();

        for changeset in [
            Changeset::new().update("notes", "ghost", json!({})),
            Changeset::new().delete("notes", "ghost"),
        ] {
            let result = tokio_test::block_on(apply_atomically(&storage, &aggregated(changeset)));
            assert!(matches!(result, Err(StorageError::Constraint { .. })));
        }
    }

    #[test]
    fn injected_failures_fire_once() {
        let storage = InMemoryStorage::new();
        storage.fail_next_event_id();
        storage.fail_next_begin();

        assert!(tokio_test::block_on(storage.create_event_id()).is_err());
        assert!(tokio_test::block_on(storage.create_event_id()).is_ok());
        assert!(tokio_test::block_on(storage.begin()).is_err());
        assert!(tokio_test::block_on(storage.begin()).is_ok());
    }

    #[test]
    fn injected_commit_failure_leaves_tables_unchanged() {
        let storage = InMemoryStorage::new();
        storage.fail_next_commit();
        let changeset = aggregated(Changeset::new().insert("notes", "n-1", json!({})));

        let error = tokio_test::block_on(apply_atomically(&storage, &changeset)).unwrap_err();

        assert_eq!(error, StorageError::Backend("injected commit failure".to_string()));
        assert_eq!(storage.dump(), json!({}));
    }

    #[test]
    fn concurrent_transactions_do_not_lose_updates() {
        let storage = InMemoryStorage::new();
        let first = aggregated(Changeset::new().insert("notes", "a", json!({})));
        let second = aggregated(Changeset::new().insert("notes", "b", json!({})));

        tokio_test::block_on(async {
            let mut t1 = storage.begin().await.unwrap();
            let mut t2 = storage.begin().await.unwrap();
            t1.perform(&first).await.unwrap();
            t2.perform(&second).await.unwrap();
            t1.commit().await.unwrap();
            t2.commit().await.unwrap();
        });

        assert_eq!(storage.table_len("notes"), 2);
    }

    #[test]
    fn reads_are_counted_separately() {
        let storage = InMemoryStorage::new();
        storage.get("notes", &RecordKey::from("n-1")).unwrap();
        storage.scan("notes").unwrap();

        let calls = storage.calls();
        assert_eq!((calls.get, calls.scan, calls.writes()), (1, 1, 0));
        assert_eq!(calls.total(), 2);
    }
}
