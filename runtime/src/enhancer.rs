//! Store enhancers.
//!
//! An enhancer wraps store construction. It receives the next
//! [`StoreFactory`] in the chain and returns a new one, so it can rewrite the
//! [`StoreParts`] before the store is built (wrap the reducer, swap the
//! storage adapter, ...) and work with the finished [`Store`] afterwards
//! (subscribe a listener, ...).
//!
//! # Example
//!
//! ```
//! use flux_capacitor_runtime::enhancer::{StoreFactory, StoreParts};
//! use flux_capacitor_runtime::{ConfigurationError, Store, StoreConfig};
//!
//! // Force serialized dispatch on every store built through this enhancer.
//! let serialize = |next: StoreFactory| -> StoreFactory {
//!     Box::new(move |mut parts: StoreParts| -> Result<Store, ConfigurationError> {
//!         parts.config = parts.config.with_serialized_dispatch(true);
//!         next(parts)
//!     })
//! };
//!
//! let _builder = Store::builder().enhancer(serialize);
//! ```

use crate::error::ConfigurationError;
use crate::store::Store;
use crate::StoreConfig;
use flux_capacitor_core::changeset::Changeset;
use flux_capacitor_core::environment::Clock;
use flux_capacitor_core::event::Event;
use flux_capacitor_core::reducer::{ReduceError, Reducer};
use flux_capacitor_core::storage::{Storage, StorageReader};
use std::fmt;
use std::sync::Arc;

/// Everything a store is built from.
///
/// `reducer` and `storage` are optional so that a missing one is reported
/// by the innermost factory as a [`ConfigurationError`], after every
/// enhancer had a chance to supply it.
pub struct StoreParts {
    /// Root reducer
    pub reducer: Option<Arc<dyn Reducer>>,
    /// Storage adapter
    pub storage: Option<Arc<dyn Storage>>,
    /// Runtime settings
    pub config: StoreConfig,
    /// Time source for `recorded_at`
    pub clock: Arc<dyn Clock>,
}

impl fmt::Debug for StoreParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreParts")
            .field("reducer", &self.reducer.is_some())
            .field("storage", &self.storage.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builds a store from its parts.
pub type StoreFactory = Box<dyn FnOnce(StoreParts) -> Result<Store, ConfigurationError> + Send>;

/// Wraps store construction.
pub trait Enhancer: Send + Sync {
    /// Return a factory that delegates to `next`.
    fn wrap(&self, next: StoreFactory) -> StoreFactory;
}

impl<F> Enhancer for F
where
    F: Fn(StoreFactory) -> StoreFactory + Send + Sync,
{
    fn wrap(&self, next: StoreFactory) -> StoreFactory {
        self(next)
    }
}

/// A chain of enhancers applied as one.
#[derive(Clone, Default)]
pub struct Composed {
    enhancers: Vec<Arc<dyn Enhancer>>,
}

impl Composed {
    /// Number of enhancers in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.enhancers.len()
    }

    /// Whether the chain is empty (wrapping is the identity).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.enhancers.is_empty()
    }
}

impl Enhancer for Composed {
    fn wrap(&self, next: StoreFactory) -> StoreFactory {
        self.enhancers
            .iter()
            .rev()
            .fold(next, |next, enhancer| enhancer.wrap(next))
    }
}

impl fmt::Debug for Composed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composed")
            .field("enhancers", &self.enhancers.len())
            .finish()
    }
}

/// Compose enhancers into one.
///
/// The first enhancer is the outermost wrapper: it sees the parts first and
/// the finished store last.
#[must_use]
pub fn compose(enhancers: Vec<Arc<dyn Enhancer>>) -> Composed {
    Composed { enhancers }
}

/// Enhancer that wraps the root reducer in a [`TracedReducer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceReducers;

impl Enhancer for TraceReducers {
    fn wrap(&self, next: StoreFactory) -> StoreFactory {
        Box::new(move |mut parts: StoreParts| {
            parts.reducer = parts
                .reducer
                .map(|inner| Arc::new(TracedReducer { inner }) as Arc<dyn Reducer>);
            next(parts)
        })
    }
}

/// Reducer decorator that logs every reduction.
pub struct TracedReducer {
    inner: Arc<dyn Reducer>,
}

impl TracedReducer {
    /// Wrap a reducer.
    #[must_use]
    pub fn new(inner: Arc<dyn Reducer>) -> Self {
        Self { inner }
    }
}

impl Reducer for TracedReducer {
    fn reduce(&self, storage: &dyn StorageReader, event: &Event) -> Result<Changeset, ReduceError> {
        let span = tracing::debug_span!(
            "reduce",
            event_id = %event.id(),
            event_type = event.event_type()
        );
        let _enter = span.enter();

        let result = self.inner.reduce(storage, event);
        match &result {
            Ok(changeset) => tracing::debug!(operations = changeset.len(), "Reduced event"),
            Err(error) => tracing::warn!(%error, "Reducer rejected event"),
        }
        result
    }
}

impl fmt::Debug for TracedReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedReducer").finish_non_exhaustive()
    }
}
