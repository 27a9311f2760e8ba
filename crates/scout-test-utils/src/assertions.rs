//! Custom assertion helpers for integration tests.

use scout_core::key::NaturalKey;
use scout_core::record::{Origin, Record};
use scout_sync::{SyncFailure, SyncOutcome};

/// Asserts that a sync acknowledged every entry without failure.
///
/// # Panics
///
/// Panics if the outcome has pending keys or a fatal failure.
pub fn assert_clean_sync(outcome: &SyncOutcome) {
    assert!(
        outcome.fatal.is_none(),
        "expected no fatal failure, got {:?}",
        outcome.fatal
    );
    assert!(
        outcome.pending.is_empty(),
        "expected nothing pending, got {:?}",
        outcome.pending
    );
}

/// Asserts that the pending keys are exactly `expected`, in any order.
///
/// # Panics
///
/// Panics if the sets differ.
pub fn assert_pending_keys(outcome: &SyncOutcome, expected: &[NaturalKey]) {
    let mut actual = outcome.pending.clone();
    let mut expected = expected.to_vec();
    actual.sort();
    expected.sort();
    assert_eq!(actual, expected, "pending keys differ");
}

/// Asserts that the sync was aborted by a rejected credential.
///
/// # Panics
///
/// Panics if the fatal failure is not an auth failure.
pub fn assert_auth_failure(outcome: &SyncOutcome) {
    assert!(
        matches!(outcome.fatal, Some(SyncFailure::Auth { .. })),
        "expected auth failure, got {:?}",
        outcome.fatal
    );
}

/// Asserts that exactly one record was returned and that it is confirmed.
///
/// # Panics
///
/// Panics if there is not exactly one record or it is still pending.
pub fn assert_single_confirmed(records: &[Record]) -> &Record {
    assert_eq!(records.len(), 1, "expected one record, got {records:?}");
    assert_eq!(
        records[0].origin,
        Origin::Confirmed,
        "record {} is still pending",
        records[0].key
    );
    &records[0]
}
