//! Lock marker files on the remote side.
//!
//! A lock is held by whoever managed to create the marker file. Waiters
//! poll with exponential backoff; there is no queue, so arrival order is
//! not honoured.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::SyncError;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub poll_interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl LockPolicy {
    /// Backoff doubles from `poll_interval` up to eight times that.
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            max_interval: poll_interval * 8,
            timeout,
        }
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

pub struct RemoteLock<'a> {
    transport: &'a dyn Transport,
    path: String,
    released: bool,
}

impl<'a> RemoteLock<'a> {
    #[tracing::instrument(skip(transport, policy, cancel))]
    pub async fn acquire(
        transport: &'a dyn Transport,
        path: &str,
        policy: &LockPolicy,
        cancel: &CancellationToken,
    ) -> Result<RemoteLock<'a>> {
        let started = Instant::now();
        let mut interval = policy.poll_interval;
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled(format!("waiting for lock {}", path)).into());
            }

            attempts += 1;
            match transport.create_exclusive(path).await {
                Ok(()) => {
                    debug!("Acquired lock {} after {} attempt(s)", path, attempts);
                    return Ok(RemoteLock {
                        transport,
                        path: path.to_string(),
                        released: false,
                    });
                }
                Err(TransportError::AlreadyExists(_)) => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create lock marker {}", path));
                }
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                return Err(SyncError::LockTimeout {
                    path: path.to_string(),
                    waited,
                }
                .into());
            }
            if attempts == 1 {
                info!("Lock {} is held by another publisher, waiting...", path);
            }

            let pause = interval.min(policy.timeout - waited);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(SyncError::Cancelled(format!("waiting for lock {}", path)).into());
                }
                _ = tokio::time::sleep(pause) => {}
            }
            interval = (interval * 2).min(policy.max_interval);
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Remove the marker. Not cancellable: a held lock is always given back.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.transport
            .remove_file(&self.path)
            .await
            .with_context(|| format!("Failed to release lock marker {}", self.path))?;
        debug!("Released lock {}", self.path);
        Ok(())
    }
}

impl Drop for RemoteLock<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Lock marker {} on {} was not released; remove it manually",
                self.path,
                self.transport.describe()
            );
        }
    }
}
