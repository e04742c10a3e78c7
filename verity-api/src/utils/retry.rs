//! Database retry logic
//!
//! Exponential backoff for transient SQLite lock errors. Other errors are
//! returned immediately.

use std::future::Future;
use std::time::{Duration, Instant};

/// Default upper bound on time spent retrying a locked operation
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Errors that can report a transient database lock
pub trait LockAware {
    fn is_lock_error(&self) -> bool;
}

impl LockAware for verity_common::Error {
    fn is_lock_error(&self) -> bool {
        self.is_database_locked()
    }
}

/// Retry a database operation with exponential backoff until `max_wait_ms`
/// elapses
///
/// Backoff starts at 10ms, doubles per attempt and is capped at 1000ms. When
/// the time budget runs out, the last lock error is returned.
pub async fn retry_on_lock<F, Fut, T, E>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: LockAware + std::fmt::Display,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !err.is_lock_error() => return Err(err),
            Err(err) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        error = %err,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
