//! Metrics emitted by the store.
//!
//! The store records through the [`metrics`] facade; nothing is exported
//! unless the application installs a recorder. Call [`describe_metrics`]
//! once after installing one to register units and help texts.

use metrics::{Unit, counter, describe_counter, describe_gauge, describe_histogram, histogram};
use std::time::Duration;

/// Dispatch calls (single events and batches), counted before validation.
pub const DISPATCH_TOTAL: &str = "store.dispatch.total";
/// Dispatches rejected, labelled by error `kind`.
pub const DISPATCH_FAILED: &str = "store.dispatch.failed";
/// Events durably committed.
pub const EVENTS_COMMITTED: &str = "store.events.committed";
/// Time spent in the root reducer, per event.
pub const REDUCER_DURATION: &str = "store.reducer.duration_seconds";
/// Time spent applying the merged changeset.
pub const COMMIT_DURATION: &str = "store.commit.duration_seconds";
/// Live subscriptions, summed over every store in the process.
pub const SUBSCRIBERS: &str = "store.subscribers";
/// Listener panics caught during notification.
pub const SUBSCRIBER_PANICS: &str = "store.subscriber.panics";

/// Register descriptions for every store metric.
pub fn describe_metrics() {
    describe_counter!(DISPATCH_TOTAL, "Total number of dispatches processed by the store");
    describe_counter!(DISPATCH_FAILED, "Total number of rejected dispatches");
    describe_counter!(EVENTS_COMMITTED, "Total number of events committed");
    describe_histogram!(
        REDUCER_DURATION,
        Unit::Seconds,
        "Time taken to reduce one event"
    );
    describe_histogram!(
        COMMIT_DURATION,
        Unit::Seconds,
        "Time taken to apply a changeset in one transaction"
    );
    describe_gauge!(SUBSCRIBERS, "Number of live subscriptions");
    describe_counter!(SUBSCRIBER_PANICS, "Total number of panicking subscribers");
}

/// Dispatch pipeline metrics recorder.
pub(crate) struct DispatchMetrics;

impl DispatchMetrics {
    pub(crate) fn record_dispatch() {
        counter!(DISPATCH_TOTAL).increment(1);
    }

    pub(crate) fn record_failure(kind: &'static str) {
        counter!(DISPATCH_FAILED, "kind" => kind).increment(1);
    }

    pub(crate) fn record_reduce(duration: Duration) {
        histogram!(REDUCER_DURATION).record(duration.as_secs_f64());
    }

    pub(crate) fn record_commit(events: usize, duration: Duration) {
        counter!(EVENTS_COMMITTED).increment(events as u64);
        histogram!(COMMIT_DURATION).record(duration.as_secs_f64());
    }
}
