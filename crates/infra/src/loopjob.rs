//! Lease-protected infinite loop.
//!
//! In the absence of a distributed task-scheduling platform, this is what
//! drives the background loops: acquire the lease, run the step until the
//! lease is lost or the process shuts down, release, re-contend. The step
//! budget (50s) is deliberately shorter than the lease TTL (60s) so a step
//! always finishes before the renewal it depends on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::CoreResult;

use crate::lease::{LockClient, LockGuard};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(50);
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(60);

/// One unit of background work, invoked repeatedly while the lease holds.
#[async_trait]
pub trait LoopStep: Send + Sync {
    async fn run_once(&self) -> CoreResult<()>;
}

/// Runs a [`LoopStep`] under a named distributed lease.
pub struct LoopJob {
    lock_client: Arc<dyn LockClient>,
    key: String,
    retry_interval: Duration,
    lock_timeout: Duration,
    step_timeout: Duration,
    lease_ttl: Duration,
}

impl LoopJob {
    pub fn new(lock_client: Arc<dyn LockClient>, key: impl Into<String>) -> Self {
        Self {
            lock_client,
            key: key.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            lease_ttl: DEFAULT_LEASE_TTL,
        }
    }

    /// Shorten the contention pause (tests).
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Run until `cancel` fires. Always attempts to release a held lease on
    /// the way out, even when the cancellation already triggered.
    pub async fn run(&self, cancel: CancellationToken, step: Arc<dyn LoopStep>) {
        info!(key = %self.key, "loop job starting");
        loop {
            if cancel.is_cancelled() {
                info!(key = %self.key, "loop job cancelled");
                return;
            }

            let guard = match timeout(
                self.lock_timeout,
                self.lock_client.try_acquire(&self.key, self.lease_ttl),
            )
            .await
            {
                Ok(Ok(guard)) => guard,
                Ok(Err(_)) | Err(_) => {
                    // Held elsewhere or the backend is slow; pause and
                    // re-contend.
                    if self.sleep_or_cancel(&cancel).await {
                        return;
                    }
                    continue;
                }
            };

            if let Err(err) = self.hold(&cancel, guard.as_ref(), step.as_ref()).await {
                warn!(key = %self.key, error = %err, "lease lost, re-contending");
            }

            // The parent scope may already be cancelled; the release still
            // gets its own fresh budget.
            match timeout(self.lock_timeout, guard.release()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!(key = %self.key, error = %err, "lease release failed"),
                Err(_) => error!(key = %self.key, "lease release timed out"),
            }

            if cancel.is_cancelled() {
                info!(key = %self.key, "loop job cancelled");
                return;
            }
            if self.sleep_or_cancel(&cancel).await {
                return;
            }
        }
    }

    /// Step/refresh cycle while the lease holds. `Err` means the refresh
    /// failed and leadership moved; `Ok` means the loop was cancelled.
    async fn hold(
        &self,
        cancel: &CancellationToken,
        guard: &dyn LockGuard,
        step: &dyn LoopStep,
    ) -> CoreResult<()> {
        loop {
            match timeout(self.step_timeout, step.run_once()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(key = %self.key, error = %err, "loop step failed");
                }
                Err(_) => {
                    error!(key = %self.key, "loop step exceeded its budget");
                }
            }

            if cancel.is_cancelled() {
                return Ok(());
            }

            match timeout(self.lock_timeout, guard.refresh()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    return Err(courier_core::CoreError::external(format!(
                        "lease {} refresh timed out",
                        self.key
                    )))
                }
            }
        }
    }

    /// Returns true when cancelled during the pause.
    async fn sleep_or_cancel(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(self.retry_interval) => false,
        }
    }
}
