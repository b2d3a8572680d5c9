//! Blocking Lookups
//!
//! Runs provider and cgroup reader calls on tokio's blocking pool, bounded
//! by an optional timeout.

use std::time::Duration;

use crate::error::LookupError;

/// Runs `lookup` on the blocking pool and waits at most `timeout` for it.
///
/// On timeout the call is not cancelled; it finishes in the background and
/// its result is discarded.
pub(crate) async fn run_blocking<T, F>(timeout: Option<Duration>, lookup: F) -> Result<T, LookupError>
where
    F: FnOnce() -> Result<T, LookupError> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(lookup);
    let joined = match timeout {
        Some(limit) => tokio::time::timeout(limit, handle)
            .await
            .map_err(|_| LookupError::TimedOut(limit))?,
        None => handle.await,
    };
    joined.map_err(|err| LookupError::TaskFailed(err.to_string()))?
}
