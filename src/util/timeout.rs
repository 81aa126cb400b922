//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::ParleyError;

/// Wrap a future with a timeout.
///
/// Session operations impose no deadline of their own; callers that need
/// bounded latency on `connect()` wrap it here.
pub async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, ParleyError>>,
) -> Result<T, ParleyError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ParleyError::Timeout(duration.as_millis() as u64)),
    }
}
