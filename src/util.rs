//! Shared utility functions.

use tokio::task::spawn_blocking;
use tracing::warn;

use crate::config::RetryConfig;
use crate::{Error, Result};

pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| Error::TaskJoin(e.to_string()))?
}

/// Run a backend call, retrying transient failures with exponential backoff.
///
/// Non-transient errors are returned as-is on the first failure. Once the
/// attempt budget is spent the last transient error becomes
/// `Error::BackendFailure`.
pub fn with_backoff<F, T>(policy: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation, attempt, max_attempts, delay, e
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) if e.is_transient() => {
                return Err(Error::BackendFailure {
                    operation: operation.to_string(),
                    attempts: attempt,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }
}
