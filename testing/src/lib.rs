//! # Flux Capacitor Testing
//!
//! Testing utilities and helpers for the flux-capacitor event store.
//!
//! This crate provides:
//! - [`InMemoryStorage`]: a complete storage adapter with call accounting
//!   and failure injection
//! - Mock implementations of Environment traits
//! - Test helpers and builders
//! - Property-based testing strategies
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use flux_capacitor_testing::helpers::{event, test_store};
//!
//! #[tokio::test]
//! async fn test_create_note() {
//!     let (store, storage) = test_store(AggregateReducer::new().with(notes).with_event_log());
//!
//!     store.dispatch(event("CREATE_NOTE", json!({ "title": "a" }))).await.unwrap();
//!
//!     assert_eq!(storage.table_len("notes"), 1);
//!     assert_eq!(storage.table_len("events"), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use flux_capacitor_core::environment::Clock;

/// In-memory storage adapter
pub mod memory_storage;

/// Given-When-Then harness for reducers
pub mod reducer_test;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flux_capacitor_testing::mocks::FixedClock;
    /// use flux_capacitor_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that tests can move forward by hand
    ///
    /// Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use crate::memory_storage::InMemoryStorage;
    use crate::mocks::test_clock;
    use flux_capacitor_core::event::NewEvent;
    use flux_capacitor_core::reducer::Reducer;
    use flux_capacitor_runtime::{Store, StoreConfig};
    use serde_json::Value;

    /// Build a valid input event
    ///
    /// # Panics
    ///
    /// Panics if `event_type` is empty.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn event(event_type: &str, payload: Value) -> NewEvent {
        NewEvent::new(event_type, payload).expect("test events must have a non-empty type")
    }

    /// A store over fresh in-memory storage, stamping events with [`test_clock`]
    ///
    /// Returns the storage handle for inspection.
    #[must_use]
    pub fn test_store<R: Reducer + 'static>(reducer: R) -> (Store, InMemoryStorage) {
        test_store_with_config(reducer, StoreConfig::default())
    }

    /// Like [`test_store`], with a custom configuration
    ///
    /// # Panics
    ///
    /// Never in practice: both reducer and storage are supplied.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_store_with_config<R: Reducer + 'static>(
        reducer: R,
        config: StoreConfig,
    ) -> (Store, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        let store = Store::builder()
            .reducer(reducer)
            .storage(storage.clone())
            .config(config)
            .clock(test_clock())
            .build()
            .expect("reducer and storage are both set");
        (store, storage)
    }

    /// Install a `tracing` subscriber that writes through the test harness
    ///
    /// Honors `RUST_LOG`. Safe to call from every test; only the first call
    /// installs a subscriber.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use flux_capacitor_core::event::NewEvent;
    use proptest::prelude::*;
    use serde_json::{Value, json};

    /// Non-empty, upper-snake-case event types (`CREATE_NOTE`, ...)
    pub fn event_type() -> impl Strategy<Value = String> {
        "[A-Z]{1,8}(_[A-Z]{1,8}){0,2}"
    }

    /// Small JSON payloads: null, scalars and flat objects
    pub fn payload() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,16}".prop_map(Value::from),
            prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..4)
                .prop_map(|fields| json!(fields)),
        ]
    }

    /// Valid input events
    #[allow(clippy::unwrap_used)] // The strategies only produce valid parts
    pub fn new_event() -> impl Strategy<Value = NewEvent> {
        (event_type(), payload()).prop_map(|(event_type, payload)| {
            NewEvent::new(event_type, payload).unwrap()
        })
    }
}

// Re-export commonly used items
pub use memory_storage::{InMemoryStorage, StorageCalls};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use reducer_test::ReducerTest;
