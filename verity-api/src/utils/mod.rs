//! Shared helpers

pub mod retry;

pub use retry::{retry_on_lock, LockAware, DEFAULT_MAX_LOCK_WAIT_MS};
