//! # Flux Capacitor Core
//!
//! Core traits and types for the flux-capacitor event store.
//!
//! An event store built on this crate never mutates its tables directly.
//! Every change starts life as an [`event::NewEvent`], is assigned an id by
//! the storage adapter, and is turned into a [`changeset::Changeset`] by pure
//! reducers. The runtime merges those changesets and commits them in one
//! transaction together with an append to the event log, so the log and the
//! materialized tables can never disagree.
//!
//! ## Core Concepts
//!
//! - **Event**: Immutable fact with a type discriminant and a payload
//! - **Changeset**: Pending insert/update/upsert/delete operations keyed by `(table, key)`
//! - **Reducer**: Pure function `(storage snapshot, event) → changeset`
//! - **Combiner**: Merges many changesets into one under an explicit conflict policy
//! - **Storage**: Adapter contract: id assignment, read access, atomic transactions
//!
//! ## Example
//!
//! ```
//! use flux_capacitor_core::aggregate::AggregateReducer;
//! use flux_capacitor_core::changeset::Changeset;
//! use flux_capacitor_core::event::Event;
//! use flux_capacitor_core::reducer::{reducer_fn, ReduceError};
//! use flux_capacitor_core::storage::StorageReader;
//!
//! let notes = reducer_fn(|_storage: &dyn StorageReader, event: &Event| {
//!     if event.event_type() != "CREATE_NOTE" {
//!         return Ok::<_, ReduceError>(Changeset::new());
//!     }
//!     Ok(Changeset::new().insert("notes", event.id(), event.payload().clone()))
//! });
//!
//! let root = AggregateReducer::new().with(notes).with_event_log();
//! assert_eq!(root.len(), 2);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{SmallVec, smallvec};

/// Event model: validated input events and id-assigned, immutable events
pub mod event;

/// Changesets: pending write operations produced by reducers
pub mod changeset;

/// Merging of per-reducer changesets into one aggregated changeset
pub mod combine;

/// Storage adapter contract and the read-only storage capability
pub mod storage;

/// Fan-out of one event to many reducers
pub mod aggregate;

/// The always-on reducer that appends every event to the log table
pub mod event_log;

/// Validation and reducer error types
pub mod error;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(storage snapshot, event) → changeset`.
/// They receive only the read capability of the storage, so they cannot
/// write outside of the dispatch pipeline.
pub mod reducer {
    use crate::changeset::Changeset;
    use crate::event::Event;
    use crate::storage::StorageReader;

    pub use crate::error::ReduceError;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// A reducer inspects an id-assigned event (and, if it needs to, the
    /// current committed storage state) and describes the writes that event
    /// implies. A reducer that is not interested in an event type returns an
    /// empty changeset.
    ///
    /// Any closure with the matching signature is a reducer; use
    /// [`reducer_fn`] to help type inference.
    ///
    /// # Example
    ///
    /// ```
    /// use flux_capacitor_core::changeset::Changeset;
    /// use flux_capacitor_core::event::Event;
    /// use flux_capacitor_core::reducer::{Reducer, ReduceError};
    /// use flux_capacitor_core::storage::StorageReader;
    ///
    /// struct NotesReducer;
    ///
    /// impl Reducer for NotesReducer {
    ///     fn reduce(
    ///         &self,
    ///         _storage: &dyn StorageReader,
    ///         event: &Event,
    ///     ) -> Result<Changeset, ReduceError> {
    ///         match event.event_type() {
    ///             "DELETE_NOTE" => Ok(Changeset::new().delete("notes", event.id())),
    ///             _ => Ok(Changeset::new()),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer: Send + Sync {
        /// Reduce an event into a changeset
        ///
        /// # Arguments
        ///
        /// - `storage`: Read-only view of the committed storage state
        /// - `event`: The id-assigned event being dispatched
        ///
        /// # Errors
        ///
        /// Returns [`ReduceError`] if reading storage fails, if merging
        /// sub-changesets conflicts, or if the reducer rejects the event.
        fn reduce(&self, storage: &dyn StorageReader, event: &Event)
        -> Result<Changeset, ReduceError>;
    }

    impl<F> Reducer for F
    where
        F: Fn(&dyn StorageReader, &Event) -> Result<Changeset, ReduceError> + Send + Sync,
    {
        fn reduce(
            &self,
            storage: &dyn StorageReader,
            event: &Event,
        ) -> Result<Changeset, ReduceError> {
            self(storage, event)
        }
    }

    /// Pins a closure to the reducer signature.
    ///
    /// Closures passed straight into a generic `impl Reducer` position often
    /// fail to infer their higher-ranked argument lifetimes; routing them
    /// through this function fixes the signature.
    pub const fn reducer_fn<F>(f: F) -> F
    where
        F: Fn(&dyn StorageReader, &Event) -> Result<Changeset, ReduceError> + Send + Sync,
    {
        f
    }
}

/// Environment module - Dependency injection traits
///
/// All ambient dependencies of the runtime (currently only time) are
/// abstracted behind traits so tests can substitute deterministic versions.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// The store stamps every event with `clock.now()` at the moment its id
    /// is assigned.
    ///
    /// # Examples
    ///
    /// ```
    /// use flux_capacitor_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time source used when no clock is configured.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
