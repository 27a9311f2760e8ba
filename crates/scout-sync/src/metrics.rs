//! Sync metrics.
//!
//! Published through the `metrics` facade; install a recorder in the host
//! application to export them. Without a recorder every call is a no-op.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// ============================================================================
// Sync Metrics
// ============================================================================

/// Completed sync passes, labelled by `status`.
pub const SYNC_PASSES: &str = "scout_sync_passes_total";

/// Queue entries pushed, labelled by `result`.
pub const SYNC_ENTRIES: &str = "scout_sync_entries_total";

/// Sync pass duration histogram.
pub const SYNC_DURATION: &str = "scout_sync_duration_seconds";

/// Sync calls that joined an in-flight pass.
pub const SYNC_JOINED: &str = "scout_sync_joined_total";

/// Remote records merged by pulls.
pub const SYNC_PULLED: &str = "scout_sync_pulled_records_total";

// ============================================================================
// Queue and Projection Metrics
// ============================================================================

/// Current number of queued entries.
pub const QUEUE_DEPTH: &str = "scout_queue_depth";

/// Enqueues, labelled by `mode` (`appended` or `coalesced`).
pub const QUEUE_ENQUEUED: &str = "scout_queue_enqueued_total";

/// Processed team recomputations.
pub const PROJECTION_RECOMPUTED: &str = "scout_projection_recomputed_total";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all sync metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(SYNC_PASSES, "Total sync passes by outcome status");
    describe_counter!(SYNC_ENTRIES, "Total queue entries pushed by result");
    describe_histogram!(SYNC_DURATION, "Duration of sync passes in seconds");
    describe_counter!(SYNC_JOINED, "Total sync calls that joined an in-flight pass");
    describe_counter!(SYNC_PULLED, "Total remote records merged by pulls");
    describe_gauge!(QUEUE_DEPTH, "Number of entries in the write queue");
    describe_counter!(QUEUE_ENQUEUED, "Total enqueues by mode");
    describe_counter!(PROJECTION_RECOMPUTED, "Total processed team recomputations");
}

// ============================================================================
// Recording
// ============================================================================

/// Records a finished sync pass.
pub fn record_sync_pass(status: &str, duration: Duration) {
    counter!(SYNC_PASSES, "status" => status.to_string()).increment(1);
    histogram!(SYNC_DURATION).record(duration.as_secs_f64());
}

/// Records the result of pushing one queue entry.
pub fn record_entry(result: &'static str) {
    counter!(SYNC_ENTRIES, "result" => result).increment(1);
}

/// Records a caller joining an in-flight pass.
pub fn record_joined() {
    counter!(SYNC_JOINED).increment(1);
}

/// Records remote records merged by a pull.
pub fn record_pulled(count: usize) {
    counter!(SYNC_PULLED).increment(count as u64);
}

/// Records the current queue depth.
#[allow(clippy::cast_precision_loss)]
pub fn record_queue_depth(depth: usize) {
    gauge!(QUEUE_DEPTH).set(depth as f64);
}

/// Records an enqueue.
pub fn record_enqueue(coalesced: bool) {
    let mode = if coalesced { "coalesced" } else { "appended" };
    counter!(QUEUE_ENQUEUED, "mode" => mode).increment(1);
}

/// Records processed team recomputations.
pub fn record_recomputed(count: usize) {
    counter!(PROJECTION_RECOMPUTED).increment(count as u64);
}
