//! Default durations and timeout helpers.

use crate::error::{RelayError, Result};
use std::future::Future;
use std::time::Duration;

/// How long a new session may wait for an admission slot
pub const NEW_CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay before the transport answers a rejected public key
pub const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

/// Interval between roster refreshes
pub const ROSTER_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Deadline for a single roster query
pub const ROSTER_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a future with a deadline, mapping expiry to `RelayError::Timeout`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RelayError::Timeout),
    }
}
