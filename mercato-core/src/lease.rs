use async_trait::async_trait;
use std::time::Duration;

use crate::CoreResult;

/// Single-owner guard for the timeout monitor.
///
/// Nothing here coordinates across processes on its own: a multi-instance deployment must
/// plug in a shared implementation (the store crate ships a Redis one).
#[async_trait]
pub trait MonitorLease: Send + Sync {
    /// Returns `true` when `holder` owns the lease for at least `ttl` from now.
    async fn try_acquire(&self, holder: &str, ttl: Duration) -> CoreResult<bool>;

    async fn release(&self, holder: &str) -> CoreResult<()>;
}

/// Always granted. Correct only for a single process.
pub struct LocalLease;

#[async_trait]
impl MonitorLease for LocalLease {
    async fn try_acquire(&self, _holder: &str, _ttl: Duration) -> CoreResult<bool> {
        Ok(true)
    }

    async fn release(&self, _holder: &str) -> CoreResult<()> {
        Ok(())
    }
}
