//! Fan-out of one event to many reducers.
//!
//! An [`AggregateReducer`] is the root reducer of a store. It runs every
//! registered sub-reducer against the same storage snapshot and event, in
//! registration order, and merges their changesets. Sub-reducers never see
//! each other's output: they all read the pre-dispatch state.
//!
//! # Example
//!
//! ```
//! use flux_capacitor_core::aggregate::aggregate_reducers;
//! use flux_capacitor_core::changeset::Changeset;
//! use flux_capacitor_core::event::Event;
//! use flux_capacitor_core::event_log::EventLogReducer;
//! use flux_capacitor_core::reducer::{reducer_fn, Reducer};
//! use flux_capacitor_core::storage::StorageReader;
//!
//! let notes = reducer_fn(|_: &dyn StorageReader, event: &Event| {
//!     Ok(if event.is("CREATE_NOTE") {
//!         Changeset::new().insert("notes", event.id(), event.payload().clone())
//!     } else {
//!         Changeset::new()
//!     })
//! });
//!
//! let root = aggregate_reducers(vec![
//!     Box::new(notes) as Box<dyn Reducer>,
//!     Box::new(EventLogReducer::new()),
//! ]);
//! assert_eq!(root.len(), 2);
//! ```

use crate::changeset::Changeset;
use crate::combine::{ConflictPolicy, combine};
use crate::event::Event;
use crate::event_log::EventLogReducer;
use crate::reducer::{ReduceError, Reducer};
use crate::storage::StorageReader;

/// Build an aggregate reducer from a list of sub-reducers.
///
/// Sub-reducers run in list order. Conflicting writes between them are
/// rejected ([`ConflictPolicy::Reject`]).
#[must_use]
pub fn aggregate_reducers(reducers: Vec<Box<dyn Reducer>>) -> AggregateReducer {
    AggregateReducer {
        reducers,
        policy: ConflictPolicy::Reject,
    }
}

/// A reducer that runs several reducers and merges their changesets.
///
/// Created by [`aggregate_reducers`] or [`AggregateReducer::new`].
#[derive(Default)]
pub struct AggregateReducer {
    reducers: Vec<Box<dyn Reducer>>,
    policy: ConflictPolicy,
}

impl AggregateReducer {
    /// An aggregate with no sub-reducers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sub-reducer after the existing ones.
    #[must_use]
    pub fn with<R: Reducer + 'static>(mut self, reducer: R) -> Self {
        self.reducers.push(Box::new(reducer));
        self
    }

    /// Register an [`EventLogReducer`] writing to the default log table.
    #[must_use]
    pub fn with_event_log(self) -> Self {
        self.with(EventLogReducer::new())
    }

    /// Change how writes of different sub-reducers to one key are merged.
    ///
    /// Sub-reducers all read the same snapshot. Under
    /// [`ConflictPolicy::Sequence`] a later reducer's upsert replaces what an
    /// earlier one wrote to the same key.
    #[must_use]
    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Number of registered sub-reducers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reducers.len()
    }

    /// Whether no sub-reducer is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reducers.is_empty()
    }

    /// Run every sub-reducer and collect their changesets, unmerged.
    ///
    /// The result has one entry per sub-reducer, in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first sub-reducer error.
    pub fn reduce_each(
        &self,
        storage: &dyn StorageReader,
        event: &Event,
    ) -> Result<Vec<Changeset>, ReduceError> {
        self.reducers
            .iter()
            .map(|reducer| reducer.reduce(storage, event))
            .collect()
    }
}

impl Reducer for AggregateReducer {
    fn reduce(&self, storage: &dyn StorageReader, event: &Event) -> Result<Changeset, ReduceError> {
        let changesets = self.reduce_each(storage, event)?;
        tracing::trace!(
            event_type = event.event_type(),
            reducers = changesets.len(),
            "Merging sub-reducer changesets"
        );
        Ok(combine(changesets, self.policy)?.into())
    }
}

impl std::fmt::Debug for AggregateReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateReducer")
            .field("reducers", &self.reducers.len())
            .field("policy", &self.policy)
            .finish()
    }
}
