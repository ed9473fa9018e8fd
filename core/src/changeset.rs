//! Changesets: descriptions of pending writes.
//!
//! A [`Changeset`] is what a reducer returns. It is plain data (no storage
//! connection, no transaction state), so it can be inspected, merged and
//! tested without touching a database.
//!
//! # Example
//!
//! ```
//! use flux_capacitor_core::changeset::{Changeset, OperationKind};
//! use serde_json::json;
//!
//! let changeset = Changeset::new()
//!     .insert("notes", "n-1", json!({ "title": "groceries" }))
//!     .update("stats", "notes", json!({ "count": 1 }));
//!
//! assert_eq!(changeset.len(), 2);
//! assert!(matches!(changeset.operations()[0].kind, OperationKind::Insert(_)));
//! ```

use crate::event::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;

/// Key of a record within a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Create a record key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&EventId> for RecordKey {
    fn from(id: &EventId) -> Self {
        Self::new(id.as_str())
    }
}

/// What an operation does to its record.
///
/// Records are JSON values, normally objects. `Update` carries a field
/// patch that is shallow-merged into the existing record (see
/// [`merge_fields`]).
#[derive(Clone, Debug, PartialEq)]
pub enum OperationKind {
    /// Create a record that must not exist yet.
    Insert(Value),
    /// Patch fields of a record that must exist.
    Update(Value),
    /// Create or fully replace a record.
    Upsert(Value),
    /// Remove a record that must exist.
    Delete,
}

impl OperationKind {
    /// Short lowercase name, used in logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::Update(_) => "update",
            Self::Upsert(_) => "upsert",
            Self::Delete => "delete",
        }
    }
}

/// A single pending write, addressed by `(table, key)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    /// Target table
    pub table: String,
    /// Target record
    pub key: RecordKey,
    /// The write itself
    pub kind: OperationKind,
}

impl Operation {
    /// Create an operation.
    #[must_use]
    pub fn new(table: impl Into<String>, key: impl Into<RecordKey>, kind: OperationKind) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            kind,
        }
    }

    /// The `(table, key)` this operation addresses.
    #[must_use]
    pub fn target(&self) -> (&str, &RecordKey) {
        (&self.table, &self.key)
    }
}

/// Ordered list of pending operations produced by one reducer.
///
/// Most reducers write one or two records per event, so operations are kept
/// inline up to four before spilling to the heap.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Changeset {
    operations: SmallVec<[Operation; 4]>,
}

impl Changeset {
    /// An empty changeset (the reducer is not interested in the event).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an insert.
    #[must_use]
    pub fn insert(
        mut self,
        table: impl Into<String>,
        key: impl Into<RecordKey>,
        record: Value,
    ) -> Self {
        self.push(Operation::new(table, key, OperationKind::Insert(record)));
        self
    }

    /// Add a field patch.
    #[must_use]
    pub fn update(
        mut self,
        table: impl Into<String>,
        key: impl Into<RecordKey>,
        patch: Value,
    ) -> Self {
        self.push(Operation::new(table, key, OperationKind::Update(patch)));
        self
    }

    /// Add a create-or-replace.
    #[must_use]
    pub fn upsert(
        mut self,
        table: impl Into<String>,
        key: impl Into<RecordKey>,
        record: Value,
    ) -> Self {
        self.push(Operation::new(table, key, OperationKind::Upsert(record)));
        self
    }

    /// Add a delete.
    #[must_use]
    pub fn delete(mut self, table: impl Into<String>, key: impl Into<RecordKey>) -> Self {
        self.push(Operation::new(table, key, OperationKind::Delete));
        self
    }

    /// Append an operation.
    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Append all operations of another changeset, preserving order.
    pub fn extend(&mut self, other: Self) {
        self.operations.extend(other.operations);
    }

    /// Whether the changeset has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// The operations, in the order they were added.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Every `(table, key)` this changeset writes.
    #[must_use]
    pub fn touched_keys(&self) -> BTreeSet<(String, RecordKey)> {
        touched(&self.operations)
    }
}

impl IntoIterator for Changeset {
    type Item = Operation;
    type IntoIter = smallvec::IntoIter<[Operation; 4]>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl FromIterator<Operation> for Changeset {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

/// Shallow-merge `patch` into `base`.
///
/// When both are objects, fields of `patch` overwrite or extend those of
/// `base`. Otherwise `patch` replaces `base` entirely.
pub fn merge_fields(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (field, value) in patch {
                base.insert(field, value);
            }
        },
        (base, patch) => *base = patch,
    }
}

pub(crate) fn touched(operations: &[Operation]) -> BTreeSet<(String, RecordKey)> {
    operations
        .iter()
        .map(|op| (op.table.clone(), op.key.clone()))
        .collect()
}
