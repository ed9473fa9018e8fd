//! Merging changesets.
//!
//! Every dispatch produces several changesets: one per sub-reducer, and one
//! per event when a batch is dispatched. [`combine`] folds them into a single
//! [`AggregatedChangeset`], the unit a storage transaction commits.
//! [`Combiner`] does the same incrementally, and exposes what it has staged
//! so far so that later events of a batch can read it.
//!
//! Operations are grouped by `(table, key)`. Keys touched by only one
//! operation pass through unchanged, so changesets with disjoint keys are
//! simply concatenated. When several operations address the same key, the
//! [`ConflictPolicy`] decides what happens; no write is ever dropped without
//! either composing it explicitly or reporting a [`CombineConflictError`].
//!
//! # Composition
//!
//! Operations on one key are composed in input order (`earlier ∘ later`).
//! Storage checks existence for `Insert` (record absent), `Update` and
//! `Delete` (record present). Two operations are folded into one only when
//! the result carries the same check as the earlier operation; otherwise
//! both are kept, in order, and storage applies them one after the other.
//!
//! | earlier \ later | Insert(b)  | Update(p)      | Upsert(b)  | Delete    |
//! |-----------------|------------|----------------|------------|-----------|
//! | Insert(a)       | conflict   | Insert(a ⊕ p)  | Insert(b)  | both      |
//! | Update(q)       | conflict   | Update(q ⊕ p)  | both       | Delete    |
//! | Upsert(a)       | conflict   | Upsert(a ⊕ p)  | Upsert(b)  | both      |
//! | Delete          | both       | conflict       | both       | conflict  |
//!
//! `⊕` is [`merge_fields`]. A conflict is a sequence storage would refuse
//! anyway: inserting a record the earlier operation leaves present, or
//! touching one it removed.

use crate::changeset::{Changeset, Operation, OperationKind, RecordKey, merge_fields, touched};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// How [`combine`] treats a key written by more than one input changeset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Two different input changesets writing the same key is an error.
    ///
    /// Operations on one key within a single input are still composed in
    /// order. This is the policy for sub-reducers of one event: they all read
    /// the same snapshot, so two of them writing the same row is a modelling
    /// bug.
    #[default]
    Reject,

    /// Operations on the same key are composed in input order.
    ///
    /// Meant for inputs whose producers saw each other's writes. The store
    /// uses it for the events of a batch: each event is reduced against
    /// committed state overlaid with the writes staged by the events before
    /// it (see [`Combiner::pending`]).
    Sequence,
}

/// Why two operations on one key could not be merged.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The key is written by more than one input under [`ConflictPolicy::Reject`].
    #[error("key written by more than one changeset")]
    MultipleWriters,

    /// An insert targets a record an earlier operation already writes.
    #[error("insert of a record that an earlier operation already writes")]
    DuplicateInsert,

    /// An update or delete targets a record an earlier operation removed.
    #[error("{0} of a record that an earlier operation removed")]
    MissingRecord(&'static str),
}

/// Two changesets disagree about one record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Conflicting writes to {table}/{key} from changesets {first} and {second}: {reason}")]
pub struct CombineConflictError {
    /// Table of the contested record
    pub table: String,
    /// Key of the contested record
    pub key: RecordKey,
    /// Input index of the earlier write
    pub first: usize,
    /// Input index of the write that could not be merged
    pub second: usize,
    /// What went wrong
    pub reason: ConflictReason,
}

/// The merged result of all changesets of one dispatch.
///
/// Operations are grouped by key, keys ordered by their first appearance in
/// the inputs. A key normally has one operation; it has several when they
/// could not be folded without losing an existence check.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatedChangeset {
    operations: Vec<Operation>,
}

impl AggregatedChangeset {
    /// The merged operations.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Number of operations that will reach storage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether nothing will be written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Every `(table, key)` this changeset writes.
    #[must_use]
    pub fn touched_keys(&self) -> BTreeSet<(String, RecordKey)> {
        touched(&self.operations)
    }
}

impl IntoIterator for AggregatedChangeset {
    type Item = Operation;
    type IntoIter = std::vec::IntoIter<Operation>;

    fn into_iter(self) -> Self::IntoIter {
        self.operations.into_iter()
    }
}

impl From<AggregatedChangeset> for Changeset {
    fn from(aggregated: AggregatedChangeset) -> Self {
        aggregated.operations.into_iter().collect()
    }
}

/// Pending operations on one key, never empty.
#[derive(Debug)]
struct Slot {
    table: String,
    key: RecordKey,
    steps: Vec<OperationKind>,
    source: usize,
}

/// Incremental [`combine`].
///
/// Changesets are pushed one at a time; each push gets the next input
/// index. A combiner that returned an error is left partially updated and
/// should be discarded.
#[derive(Debug)]
pub struct Combiner {
    policy: ConflictPolicy,
    slots: Vec<Slot>,
    positions: HashMap<(String, RecordKey), usize>,
    inputs: usize,
}

impl Combiner {
    /// An empty combiner.
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
            positions: HashMap::new(),
            inputs: 0,
        }
    }

    /// Number of changesets pushed so far.
    #[must_use]
    pub const fn inputs(&self) -> usize {
        self.inputs
    }

    /// Merge the next changeset.
    ///
    /// # Errors
    ///
    /// Returns [`CombineConflictError`] when the policy forbids two inputs
    /// writing the same key, or when operations on one key cannot be
    /// composed (see the module docs).
    pub fn push(&mut self, changeset: Changeset) -> Result<(), CombineConflictError> {
        let source = self.inputs;
        self.inputs += 1;

        for Operation { table, key, kind } in changeset {
            let target = (table, key);
            let Some(position) = self.positions.get(&target).copied() else {
                self.positions.insert(target.clone(), self.slots.len());
                let (table, key) = target;
                self.slots.push(Slot {
                    table,
                    key,
                    steps: vec![kind],
                    source,
                });
                continue;
            };

            let slot = &mut self.slots[position];
            let (table, key) = target;
            let first = slot.source;
            let conflict = |reason| CombineConflictError {
                table,
                key,
                first,
                second: source,
                reason,
            };

            if self.policy == ConflictPolicy::Reject && first != source {
                return Err(conflict(ConflictReason::MultipleWriters));
            }

            match slot.steps.pop() {
                Some(earlier) => match compose(earlier, kind).map_err(conflict)? {
                    Composed::One(kind) => slot.steps.push(kind),
                    Composed::Both(earlier, later) => slot.steps.extend([earlier, later]),
                },
                None => slot.steps.push(kind),
            }
            slot.source = source;
        }

        Ok(())
    }

    /// The operations staged so far for one record, in application order.
    ///
    /// `None` if nothing pushed so far touches the record.
    #[must_use]
    pub fn pending(&self, table: &str, key: &RecordKey) -> Option<&[OperationKind]> {
        self.positions
            .get(&(table.to_string(), key.clone()))
            .map(|&position| self.slots[position].steps.as_slice())
    }

    /// Every record of `table` with staged operations.
    pub fn pending_in<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a RecordKey, &'a [OperationKind])> + 'a {
        self.slots
            .iter()
            .filter(move |slot| slot.table == table)
            .map(|slot| (&slot.key, slot.steps.as_slice()))
    }

    /// The merged changeset.
    #[must_use]
    pub fn finish(self) -> AggregatedChangeset {
        let operations = self
            .slots
            .into_iter()
            .flat_map(|Slot { table, key, steps, .. }| {
                steps.into_iter().map(move |kind| Operation {
                    table: table.clone(),
                    key: key.clone(),
                    kind,
                })
            })
            .collect();

        AggregatedChangeset { operations }
    }
}

/// Merge a sequence of changesets into one.
///
/// Pure data transformation; performs no I/O.
///
/// # Errors
///
/// Returns [`CombineConflictError`] when the policy forbids two inputs
/// writing the same key, or when operations on one key cannot be composed
/// (see the module docs).
pub fn combine<I>(
    changesets: I,
    policy: ConflictPolicy,
) -> Result<AggregatedChangeset, CombineConflictError>
where
    I: IntoIterator<Item = Changeset>,
{
    let mut combiner = Combiner::new(policy);
    for changeset in changesets {
        combiner.push(changeset)?;
    }
    Ok(combiner.finish())
}

/// Replay staged operations over a record's committed value.
///
/// An update of an absent record leaves it absent; storage refuses that
/// update at commit time.
#[must_use]
pub fn replay(committed: Option<Value>, steps: &[OperationKind]) -> Option<Value> {
    steps.iter().fold(committed, |record, step| match step {
        OperationKind::Insert(value) | OperationKind::Upsert(value) => Some(value.clone()),
        OperationKind::Update(patch) => record.map(|record| merged(record, patch.clone())),
        OperationKind::Delete => None,
    })
}

enum Composed {
    One(OperationKind),
    Both(OperationKind, OperationKind),
}

/// Compose an earlier pending write with a later one on the same key.
fn compose(earlier: OperationKind, later: OperationKind) -> Result<Composed, ConflictReason> {
    use OperationKind::{Delete, Insert, Update, Upsert};

    let composed = match (earlier, later) {
        (Insert(_) | Update(_) | Upsert(_), Insert(_)) => {
            return Err(ConflictReason::DuplicateInsert);
        },
        (Delete, later @ (Update(_) | Delete)) => {
            return Err(ConflictReason::MissingRecord(later.name()));
        },

        (Insert(record), Update(patch)) => Insert(merged(record, patch)),
        (Insert(_), Upsert(record)) => Insert(record),
        (Update(base), Update(patch)) => Update(merged(base, patch)),
        (Update(_), Delete) => Delete,
        (Upsert(record), Update(patch)) => Upsert(merged(record, patch)),
        (Upsert(_), Upsert(record)) => Upsert(record),

        // Folding these would drop the earlier existence check.
        (earlier @ (Insert(_) | Upsert(_)), later @ Delete)
        | (earlier @ Update(_), later @ Upsert(_))
        | (earlier @ Delete, later @ (Insert(_) | Upsert(_))) => {
            return Ok(Composed::Both(earlier, later));
        },
    };

    Ok(Composed::One(composed))
}

fn merged(mut base: Value, patch: Value) -> Value {
    merge_fields(&mut base, patch);
    base
}
