//! Retry utilities: backoff builders for transient storage failures.
//!
//! Uses `backon` for exponential backoff with jitter. These retries only cover
//! errors the dialect classifies as transient; optimistic-concurrency conflicts
//! are never retried here.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff for statements that hit a busy/locked database or a
/// serialization failure.
///
/// - Min delay: 5ms
/// - Max delay: 500ms
/// - Max attempts: 20
/// - Jitter enabled
pub fn transient_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(20)
        .with_jitter()
}

/// Backoff for the initial database connection at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}
