//! The Store - runtime coordinator for dispatching events
//!
//! A store ties a root reducer to a storage adapter. Every dispatch runs the
//! same pipeline:
//!
//! 1. Validate the input (no storage access before this succeeds)
//! 2. For each event: obtain an id from storage, stamp `recorded_at`, reduce
//!    it, and stage its changeset in a [`Combiner`]
//! 3. Apply the merged changeset in one transaction
//! 4. Notify subscribers with the committed events
//!
//! Reducers of a batch read committed state overlaid with the writes staged
//! by the earlier events of the batch ([`StagedReader`]), so a batch behaves
//! like the same events dispatched one after the other, committed at once.
//! Per-event changesets are composed in event order according to
//! [`StoreConfig::batch_policy`].

use crate::StoreConfig;
use crate::enhancer::{Enhancer, StoreFactory, StoreParts, compose};
use crate::error::{ConfigurationError, DispatchError};
use crate::metrics::DispatchMetrics;
use crate::subscription::{Registry, Subscription};
use flux_capacitor_core::combine::Combiner;
use flux_capacitor_core::environment::{Clock, SystemClock};
use flux_capacitor_core::error::ValidationError;
use flux_capacitor_core::event::{Event, NewEvent};
use flux_capacitor_core::reducer::Reducer;
use flux_capacitor_core::storage::{ReadOnlyStorage, StagedReader, Storage, apply_atomically};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

/// The Store - runtime coordinator for a reducer and a storage adapter
///
/// Cloning a store is cheap; clones share reducer, storage and subscribers.
///
/// # Example
///
/// ```ignore
/// let store = Store::create(
///     AggregateReducer::new().with(notes_reducer).with_event_log(),
///     storage,
/// )?;
///
/// let events = store
///     .dispatch(NewEvent::new("CREATE_NOTE", json!({ "title": "groceries" }))?)
///     .await?;
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    reducer: RwLock<Arc<dyn Reducer>>,
    storage: Arc<dyn Storage>,
    reader: ReadOnlyStorage,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<Registry>,
    dispatch_lock: Mutex<()>,
}

impl Store {
    /// Create a store from a root reducer and a storage adapter
    ///
    /// Uses the default [`StoreConfig`] and the system clock.
    ///
    /// # Errors
    ///
    /// Construction only fails through [`Store::builder`] when a part is
    /// missing; with both parts supplied this returns `Ok`.
    pub fn create<R, S>(reducer: R, storage: S) -> Result<Self, ConfigurationError>
    where
        R: Reducer + 'static,
        S: Storage + 'static,
    {
        Self::builder().reducer(reducer).storage(storage).build()
    }

    /// Start configuring a store
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// The innermost [`StoreFactory`]: validates the parts and builds the store.
    pub(crate) fn from_parts(parts: StoreParts) -> Result<Self, ConfigurationError> {
        let StoreParts {
            reducer,
            storage,
            config,
            clock,
        } = parts;
        let reducer = reducer.ok_or(ConfigurationError::MissingReducer)?;
        let storage = storage.ok_or(ConfigurationError::MissingStorage)?;

        tracing::debug!(
            batch_policy = ?config.batch_policy,
            serialize_dispatch = config.serialize_dispatch,
            "Store created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                reducer: RwLock::new(reducer),
                reader: ReadOnlyStorage::new(Arc::clone(&storage)),
                storage,
                config,
                clock,
                registry: Arc::new(Registry::default()),
                dispatch_lock: Mutex::new(()),
            }),
        })
    }

    /// Dispatch a single event
    ///
    /// Resolves with the committed event (id and `recorded_at` assigned)
    /// once it and all writes it implies are durably committed.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] if an id cannot be assigned, a reducer
    /// fails, or the transaction fails. Storage is unchanged in every case.
    #[tracing::instrument(skip(self, event), fields(event_type = event.event_type()), name = "store_dispatch")]
    pub async fn dispatch(&self, event: NewEvent) -> Result<Vec<Event>, DispatchError> {
        DispatchMetrics::record_dispatch();
        self.dispatch_events(vec![event]).await
    }

    /// Dispatch several events atomically
    ///
    /// All events, and every write they imply, commit in one transaction or
    /// not at all. Ids are assigned in list order. Each event's reducers see
    /// the writes of the events before it, and storage checks every write,
    /// so the batch commits exactly when dispatching its events one at a
    /// time would have succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyBatch`] for an empty list, without
    /// touching storage. Otherwise as [`Store::dispatch`], plus
    /// [`DispatchError::Conflict`] if the events' changesets cannot be merged.
    #[tracing::instrument(skip(self, events), fields(events = events.len()), name = "store_dispatch_batch")]
    pub async fn dispatch_batch(&self, events: Vec<NewEvent>) -> Result<Vec<Event>, DispatchError> {
        DispatchMetrics::record_dispatch();
        if events.is_empty() {
            return Err(Self::rejected(ValidationError::EmptyBatch.into()));
        }
        self.dispatch_events(events).await
    }

    /// Dispatch raw JSON
    ///
    /// An object is a single event; an array is a batch whose elements are
    /// each validated before anything is dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Validation`] for malformed input (for a
    /// batch, [`ValidationError::InBatch`] names the first bad element).
    /// Otherwise as [`Store::dispatch_batch`].
    #[tracing::instrument(skip(self, value), name = "store_dispatch_value")]
    pub async fn dispatch_value(&self, value: Value) -> Result<Vec<Event>, DispatchError> {
        DispatchMetrics::record_dispatch();
        let events = match value {
            Value::Array(items) if items.is_empty() => {
                return Err(Self::rejected(ValidationError::EmptyBatch.into()));
            },
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    NewEvent::try_from(item).map_err(|source| ValidationError::InBatch {
                        index,
                        source: Box::new(source),
                    })
                })
                .collect::<Result<Vec<_>, _>>(),
            single => NewEvent::try_from(single).map(|event| vec![event]),
        };

        match events {
            Ok(events) => self.dispatch_events(events).await,
            Err(error) => Err(Self::rejected(error.into())),
        }
    }

    /// Read-only handle on the storage adapter
    ///
    /// The handle cannot begin transactions; all writes go through dispatch.
    #[must_use]
    pub fn storage(&self) -> ReadOnlyStorage {
        self.inner.reader.clone()
    }

    /// Register a listener for committed events
    ///
    /// Listeners run after every successful commit, in registration order,
    /// with the events of that dispatch.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Event]) + Send + Sync + 'static,
    {
        let id = self.inner.registry.insert(Arc::new(listener));
        tracing::debug!(subscription = id.get(), "Subscriber registered");
        Subscription::new(id, &self.inner.registry)
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Swap the root reducer
    ///
    /// Dispatches that already started keep the reducer they started with.
    pub async fn replace_reducer<R: Reducer + 'static>(&self, reducer: R) {
        *self.inner.reducer.write().await = Arc::new(reducer);
        tracing::debug!("Reducer replaced");
    }

    /// The store configuration
    #[must_use]
    pub fn config(&self) -> StoreConfig {
        self.inner.config
    }

    async fn dispatch_events(&self, events: Vec<NewEvent>) -> Result<Vec<Event>, DispatchError> {
        let _serialized = if self.inner.config.serialize_dispatch {
            let guard = self.inner.dispatch_lock.lock().await;
            tracing::trace!("Acquired dispatch lock");
            Some(guard)
        } else {
            None
        };

        match self.run_pipeline(events).await {
            Ok(committed) => {
                self.inner.registry.notify(&committed);
                Ok(committed)
            },
            Err(error) => Err(Self::rejected(error)),
        }
    }

    async fn run_pipeline(&self, events: Vec<NewEvent>) -> Result<Vec<Event>, DispatchError> {
        let reducer = Arc::clone(&*self.inner.reducer.read().await);

        let mut committed = Vec::with_capacity(events.len());
        let mut staged = Combiner::new(self.inner.config.batch_policy);

        for new_event in events {
            let id = self
                .inner
                .storage
                .create_event_id()
                .await
                .map_err(DispatchError::EventId)?;
            let event = new_event.into_event(id, self.inner.clock.now());

            let start = Instant::now();
            let changeset = reducer
                .reduce(&StagedReader::new(&self.inner.reader, &staged), &event)
                .map_err(DispatchError::Reduce)?;
            DispatchMetrics::record_reduce(start.elapsed());

            tracing::trace!(
                event_id = %event.id(),
                operations = changeset.len(),
                "Reduced event"
            );
            staged.push(changeset)?;
            committed.push(event);
        }

        let merged = staged.finish();

        let start = Instant::now();
        apply_atomically(self.inner.storage.as_ref(), &merged)
            .await
            .map_err(DispatchError::Transaction)?;
        DispatchMetrics::record_commit(committed.len(), start.elapsed());

        tracing::debug!(
            events = committed.len(),
            operations = merged.len(),
            "Dispatch committed"
        );
        Ok(committed)
    }

    fn rejected(error: DispatchError) -> DispatchError {
        tracing::warn!(%error, kind = error.kind(), "Dispatch rejected");
        DispatchMetrics::record_failure(error.kind());
        error
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`]
///
/// # Example
///
/// ```ignore
/// let store = Store::builder()
///     .reducer(root)
///     .storage(storage)
///     .config(StoreConfig::default().with_serialized_dispatch(true))
///     .enhancer(TraceReducers)
///     .build()?;
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    reducer: Option<Arc<dyn Reducer>>,
    storage: Option<Arc<dyn Storage>>,
    config: StoreConfig,
    clock: Option<Arc<dyn Clock>>,
    enhancers: Vec<Arc<dyn Enhancer>>,
}

impl StoreBuilder {
    /// Set the root reducer
    #[must_use]
    pub fn reducer<R: Reducer + 'static>(self, reducer: R) -> Self {
        self.shared_reducer(Arc::new(reducer))
    }

    /// Set an already shared root reducer
    #[must_use]
    pub fn shared_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    /// Set the storage adapter
    #[must_use]
    pub fn storage<S: Storage + 'static>(self, storage: S) -> Self {
        self.shared_storage(Arc::new(storage))
    }

    /// Set an already shared storage adapter
    #[must_use]
    pub fn shared_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the runtime configuration
    #[must_use]
    pub const fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the time source used to stamp events
    #[must_use]
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Add an enhancer
    ///
    /// Enhancers wrap construction in the order they are added: the first
    /// one added is the outermost.
    #[must_use]
    pub fn enhancer<E: Enhancer + 'static>(mut self, enhancer: E) -> Self {
        self.enhancers.push(Arc::new(enhancer));
        self
    }

    /// Build the store, running it through the enhancer chain
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if, after all enhancers ran, the
    /// reducer or the storage adapter is missing.
    pub fn build(self) -> Result<Store, ConfigurationError> {
        let parts = StoreParts {
            reducer: self.reducer,
            storage: self.storage,
            config: self.config,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>),
        };

        let base: StoreFactory = Box::new(Store::from_parts);
        if self.enhancers.is_empty() {
            return base(parts);
        }
        compose(self.enhancers).wrap(base)(parts)
    }
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("reducer", &self.reducer.is_some())
            .field("storage", &self.storage.is_some())
            .field("config", &self.config)
            .field("enhancers", &self.enhancers.len())
            .finish_non_exhaustive()
    }
}
