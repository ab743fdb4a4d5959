use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use super::lock::{LockPolicy, RemoteLock};
use super::{RemoteLayout, SyncError, cancellable};
use crate::archive::ArchiveFormat;
use crate::transport::{Transport, TransportError, quote, remote_path};

/// Publishes built package archives into the remote repository.
pub struct Publisher<'a> {
    transport: &'a dyn Transport,
    layout: &'a RemoteLayout,
    policy: LockPolicy,
    format: ArchiveFormat,
}

impl<'a> Publisher<'a> {
    pub fn new(
        transport: &'a dyn Transport,
        layout: &'a RemoteLayout,
        policy: LockPolicy,
        format: ArchiveFormat,
    ) -> Self {
        Self {
            transport,
            layout,
            policy,
            format,
        }
    }

    /// Staging slot of one `(name, version)`: the lock marker is
    /// `<slot>.lock`, the uploaded archive `<slot>.<ext>` and the expanded
    /// tree `<slot>.d` until it is moved into the repository.
    pub fn staging_slot(&self, name: &str, version: &str) -> String {
        remote_path(
            &self.layout.staging,
            &[format!("gopm-stage-{}-{}", name, version).as_str()],
        )
    }

    /// Land `archive` in `<root>/<name>/<version>/` and return that path.
    ///
    /// The lock marker is released whatever happens after it was taken,
    /// including cancellation.
    #[tracing::instrument(skip(self, archive, cancel), fields(bytes = archive.len()))]
    pub async fn publish(
        &self,
        name: &str,
        version: &str,
        archive: &[u8],
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let slot = self.staging_slot(name, version);
        let lock_path = format!("{}.lock", slot);

        let lock = RemoteLock::acquire(self.transport, &lock_path, &self.policy, cancel).await?;
        let published = self
            .publish_locked(name, version, archive, &slot, overwrite, cancel)
            .await;
        let released = lock.release().await;

        match (published, released) {
            (Ok(version_dir), Ok(())) => {
                info!("Published {} {} to {}", name, version, version_dir);
                Ok(version_dir)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!("{:#}", release_error);
                Err(e)
            }
        }
    }

    /// Upload and expand into the staging slot, then swap the expanded tree
    /// into place. A published version is only removed once its
    /// replacement is complete.
    async fn publish_locked(
        &self,
        name: &str,
        version: &str,
        archive: &[u8],
        slot: &str,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let version_dir = remote_path(&self.layout.root, &[name, version]);
        let archive_path = format!("{}.{}", slot, self.format.extension());
        let expanded_dir = format!("{}.d", slot);

        let published = self.is_published(name, version, cancel).await?;
        if published && !overwrite {
            return Err(SyncError::VersionExists {
                name: name.to_string(),
                version: version.to_string(),
                location: format!("{}:{}", self.transport.describe(), version_dir),
            }
            .into());
        }

        if let Err(e) = cancellable(
            cancel,
            "upload archive",
            self.transport.write_file(&archive_path, archive),
        )
        .await
        {
            self.discard_archive(&archive_path).await;
            return Err(e);
        }

        let expand = format!(
            "rm -rf {dir} && mkdir -p {dir} && {expand}",
            dir = quote(&expanded_dir),
            expand = self.format.expand_command(&archive_path, &expanded_dir)
        );
        let expanded = cancellable(cancel, "expand archive", self.transport.execute(&expand)).await;
        self.discard_archive(&archive_path).await;
        if let Err(e) = expanded {
            self.discard_expanded(&expanded_dir).await;
            return Err(e);
        }

        if published {
            info!("Replacing published {} {}", name, version);
        }
        let package_dir = remote_path(&self.layout.root, &[name]);
        let install = format!(
            "mkdir -p {pkg} && rm -rf {dest} && mv {src} {dest}",
            pkg = quote(&package_dir),
            dest = quote(&version_dir),
            src = quote(&expanded_dir),
        );
        if let Err(e) = cancellable(
            cancel,
            "move expanded package into the repository",
            self.transport.execute(&install),
        )
        .await
        {
            self.discard_expanded(&expanded_dir).await;
            return Err(e);
        }
        Ok(version_dir)
    }

    async fn is_published(&self, name: &str, version: &str, cancel: &CancellationToken) -> Result<bool> {
        let package_dir = remote_path(&self.layout.root, &[name]);
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled("check published versions".into()).into());
        }
        match self.transport.list_directory(&package_dir).await {
            Ok(versions) => Ok(versions.iter().any(|v| v == version)),
            Err(TransportError::NotFound(_)) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to list {}", package_dir)),
        }
    }

    async fn discard_archive(&self, archive_path: &str) {
        match self.transport.remove_file(archive_path).await {
            Ok(()) | Err(TransportError::NotFound(_)) => debug!("Discarded {}", archive_path),
            Err(e) => warn!("Failed to remove uploaded archive {}: {}", archive_path, e),
        }
    }

    async fn discard_expanded(&self, expanded_dir: &str) {
        if let Err(e) = self.transport.remove_dir_all(expanded_dir).await {
            warn!("Failed to remove staged tree {}: {}", expanded_dir, e);
        }
    }
}
