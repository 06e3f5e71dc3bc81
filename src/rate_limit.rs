//! Token-bucket gate for outbound requests.

use crate::error::SyncError;
use crate::utils::cancel::with_cancel;
use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{direct::NotKeyed, InMemoryState},
    Quota,
};
use std::num::NonZeroU32;
use tokio_util::sync::CancellationToken;

type DirectLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Releases at most one request per quota interval; no bursts.
pub struct RateLimiter {
    inner: DirectLimiter,
}

impl RateLimiter {
    /// A rate of 0 is treated as 1.
    pub fn per_second(requests: u32) -> Self {
        let rate = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            inner: governor::RateLimiter::direct(
                Quota::per_second(rate).allow_burst(NonZeroU32::MIN),
            ),
        }
    }

    /// Waits for the next slot. Cancellation wins over a slot that is not yet free.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        with_cancel(cancel, self.inner.until_ready()).await
    }
}
