use crate::error::SyncError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drives `fut` to completion unless `cancel` fires first.
pub async fn with_cancel<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output, SyncError>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Sleeps for `delay`, returning early with [`SyncError::Cancelled`] on cancellation.
pub async fn pause(cancel: &CancellationToken, delay: Duration) -> Result<(), SyncError> {
    if delay.is_zero() {
        return if cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        };
    }
    with_cancel(cancel, tokio::time::sleep(delay)).await
}
