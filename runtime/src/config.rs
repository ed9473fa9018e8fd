//! Store configuration.

use flux_capacitor_core::combine::ConflictPolicy;

/// Configuration for Store instances
///
/// # Example
///
/// ```
/// use flux_capacitor_core::combine::ConflictPolicy;
/// use flux_capacitor_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_serialized_dispatch(true)
///     .with_batch_policy(ConflictPolicy::Reject);
///
/// assert!(config.serialize_dispatch);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// How the per-event changesets of one batch are merged
    ///
    /// Each event is reduced against the writes of the events before it, so
    /// the default `Sequence` commits what dispatching the events one at a
    /// time would.
    pub batch_policy: ConflictPolicy,
    /// Hold a store-wide lock across the whole dispatch pipeline
    ///
    /// Without it, concurrent dispatches may reduce against the same
    /// pre-commit snapshot.
    pub serialize_dispatch: bool,
}

impl StoreConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(batch_policy: ConflictPolicy, serialize_dispatch: bool) -> Self {
        Self {
            batch_policy,
            serialize_dispatch,
        }
    }

    /// Set the batch merge policy
    #[must_use]
    pub const fn with_batch_policy(mut self, policy: ConflictPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    /// Enable or disable serialized dispatch
    #[must_use]
    pub const fn with_serialized_dispatch(mut self, serialize: bool) -> Self {
        self.serialize_dispatch = serialize;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            batch_policy: ConflictPolicy::Sequence,
            serialize_dispatch: false,
        }
    }
}
