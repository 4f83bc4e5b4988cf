//! Retry policies for the client side.
//!
//! Named policies keep backoff behavior consistent between the submitter
//! and the keep-alive loop. All policies include jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Policy for operation dispatch (commands and queries).
///
/// Transport-level failures are retried for as long as the session stays
/// alive — the server dedupes on `(session, sequence)`, so resending is
/// safe. The retry loop is bounded by the `when` condition (session
/// liveness), not by an attempt count.
pub fn transport_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_secs(1))
        .without_max_times()
        .with_jitter()
}

/// Policy for session management requests (open and close).
///
/// Bounded but patient enough to ride out a leader election.
pub fn session_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(8)
        .with_jitter()
}

/// Policy for keep-alive beacons.
///
/// Bounded and quick: a beacon that cannot get through inside its
/// interval should yield to the next one rather than pile up.
pub fn keep_alive_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(3)
        .with_jitter()
}
