//! # Flux Capacitor Runtime
//!
//! Store runtime for the flux-capacitor event store.
//!
//! This crate provides the [`Store`] that validates events, runs them
//! through the root reducer, commits the resulting changeset atomically and
//! notifies subscribers.
//!
//! ## Core Components
//!
//! - **Store**: Dispatch pipeline and read-only storage access
//! - **Subscriptions**: Post-commit change listeners
//! - **Enhancers**: Composable wrappers around store construction
//! - **Metrics**: Counters and histograms recorded through the `metrics` facade
//!
//! ## Example
//!
//! ```ignore
//! use flux_capacitor_core::aggregate::AggregateReducer;
//! use flux_capacitor_core::event::NewEvent;
//! use flux_capacitor_runtime::Store;
//!
//! let store = Store::create(
//!     AggregateReducer::new().with(notes_reducer).with_event_log(),
//!     storage,
//! )?;
//!
//! let subscription = store.subscribe(|events| println!("committed {}", events.len()));
//!
//! store
//!     .dispatch(NewEvent::new("CREATE_NOTE", json!({ "title": "groceries" }))?)
//!     .await?;
//!
//! subscription.unsubscribe();
//! ```

/// Error types for the Store runtime
pub mod error;

/// Store configuration
pub mod config;

/// Post-commit change listeners
pub mod subscription;

/// Composable wrappers around store construction
pub mod enhancer;

/// Metric names and recorders
pub mod metrics;

/// Store runtime for coordinating reducers and storage
pub mod store;

pub use config::StoreConfig;
pub use enhancer::{Enhancer, StoreFactory, StoreParts, TraceReducers, compose};
pub use error::{ConfigurationError, DispatchError};
pub use store::{Store, StoreBuilder};
pub use subscription::{Subscription, SubscriptionId};
