//! Synchronization with the shared remote repository.
//!
//! - [`Publisher`] lands a package archive in a per-`(name, version)`
//!   staging slot guarded by a [`RemoteLock`] and expands it into the
//!   repository.
//! - [`Fetcher`] resolves a constraint set against the remote repository,
//!   assembles every selected version into one archive on the remote side
//!   and downloads it; [`install_update`] lays it over the local root.
//!
//! Both flows stop at the first failing step and clean up what they
//! created so far on a best-effort basis.

mod fetch;
mod lock;
mod publish;

use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::package::DEFAULT_ROOT;
use crate::transport::TransportResult;

pub use fetch::{FetchedBundle, Fetcher, install_update};
pub use lock::{LockPolicy, RemoteLock};
pub use publish::Publisher;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("timed out after {waited:?} waiting for lock marker {path}")]
    LockTimeout { path: String, waited: Duration },
    #[error("{0} was cancelled")]
    Cancelled(String),
    #[error("{name} {version} is already published at {location} (use --force to replace it)")]
    VersionExists {
        name: String,
        version: String,
        location: String,
    },
}

/// Remote directories used by the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Repository root holding `<name>/<version>/`.
    pub root: String,
    /// Directory for lock markers and uploaded archives.
    pub staging: String,
    /// Directory for fetch work trees.
    pub tmp: String,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            staging: ".".to_string(),
            tmp: "/tmp".to_string(),
        }
    }
}

/// Run one remote step unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, step: &str, future: F) -> Result<T>
where
    F: Future<Output = TransportResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled(step.to_string()).into()),
        result = future => result.with_context(|| format!("Failed to {}", step)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[tokio::test]
    async fn test_cancellable_prefers_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = cancellable(&cancel, "upload archive", async { Ok(()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Cancelled(step)) if step == "upload archive"
        ));
    }

    #[tokio::test]
    async fn test_cancellable_names_failed_step() {
        let cancel = CancellationToken::new();

        let err = cancellable::<(), _>(&cancel, "expand archive", async {
            Err(TransportError::NotFound("x".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "Failed to expand archive");
        assert!(err.downcast_ref::<TransportError>().is_some());
    }

    #[test]
    fn test_default_layout() {
        let layout = RemoteLayout::default();
        assert_eq!(layout.root, "gopm_packages");
        assert_eq!(layout.staging, ".");
        assert_eq!(layout.tmp, "/tmp");
    }
}
