use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

use super::{RemoteLayout, SyncError, cancellable};
use crate::accessor::RemoteSource;
use crate::archive::unpack_tar_gz;
use crate::package::{DependencyConstraint, PackageRepository};
use crate::resolver::{Resolution, Resolver};
use crate::runtime::Runtime;
use crate::transport::{Transport, TransportError, quote, remote_path};

/// Everything a consumer needs for one update, downloaded as one archive.
#[derive(Debug, Clone)]
pub struct FetchedBundle {
    pub resolution: Resolution,
    /// tar.gz holding `<name>/<version>/...` for every selected package.
    pub archive: Vec<u8>,
}

/// Resolves and downloads dependency closures from the remote repository.
///
/// Fetching takes no lock: published versions are immutable, so the only
/// race is with a version that is being published at the same moment.
pub struct Fetcher<'a> {
    transport: &'a dyn Transport,
    layout: &'a RemoteLayout,
}

impl<'a> Fetcher<'a> {
    pub fn new(transport: &'a dyn Transport, layout: &'a RemoteLayout) -> Self {
        Self { transport, layout }
    }

    #[tracing::instrument(skip(self, roots, cancel))]
    pub async fn fetch(
        &self,
        roots: &[DependencyConstraint],
        cancel: &CancellationToken,
    ) -> Result<FetchedBundle> {
        let source = RemoteSource::new(self.transport, self.layout.root.as_str());
        let resolver = Resolver::new(&source);
        let resolution = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(SyncError::Cancelled("dependency resolution".into()).into());
            }
            resolved = resolver.resolve(roots) => resolved?,
        };

        let work_dir = remote_path(&self.layout.tmp, &[unique_work_name().as_str()]);
        let archive_path = format!("{}.tar.gz", work_dir);

        let assembled = self
            .assemble(&resolution, &work_dir, &archive_path, cancel)
            .await;
        let cleaned = self.cleanup(&work_dir, &archive_path).await;

        match (assembled, cleaned) {
            (Ok(archive), Ok(())) => {
                info!(
                    "Fetched {} package(s), {} bytes",
                    resolution.len(),
                    archive.len()
                );
                Ok(FetchedBundle {
                    resolution,
                    archive,
                })
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                warn!("{:#}", cleanup);
                Err(e)
            }
        }
    }

    async fn assemble(
        &self,
        resolution: &Resolution,
        work_dir: &str,
        archive_path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        cancellable(
            cancel,
            "create remote work directory",
            self.transport.execute(&format!("mkdir -p {}", quote(work_dir))),
        )
        .await?;

        for (name, version) in resolution.selected() {
            let source = remote_path(&self.layout.root, &[name, version]);
            let dest = remote_path(work_dir, &[name, version]);
            debug!("Collecting {} into {}", source, dest);
            let copy = format!(
                "mkdir -p {dest} && cp -R {src} {dest}/",
                dest = quote(&dest),
                src = quote(&format!("{}/.", source)),
            );
            cancellable(
                cancel,
                &format!("collect {} {}", name, version),
                self.transport.execute(&copy),
            )
            .await?;
        }

        cancellable(
            cancel,
            "archive remote work directory",
            self.transport.execute(&format!(
                "tar -czf {} -C {} .",
                quote(archive_path),
                quote(work_dir)
            )),
        )
        .await?;

        cancellable(
            cancel,
            "download archive",
            self.transport.read_file(archive_path),
        )
        .await
    }

    /// Remove the work directory and archive. Either may not exist yet.
    async fn cleanup(&self, work_dir: &str, archive_path: &str) -> Result<()> {
        self.transport
            .remove_dir_all(work_dir)
            .await
            .with_context(|| format!("Failed to remove remote work directory {}", work_dir))?;
        match self.transport.remove_file(archive_path).await {
            Ok(()) | Err(TransportError::NotFound(_)) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove remote archive {}", archive_path)),
        }
    }
}

fn unique_work_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("gopm-{}-{}", std::process::id(), nanos)
}

/// Replace the selected versions in the local repository with the fetched
/// ones. Versions that were not selected are left alone. Returns the number
/// of files written.
#[tracing::instrument(skip(runtime, bundle))]
pub fn install_update<R: Runtime>(runtime: &R, root: &Path, bundle: &FetchedBundle) -> Result<usize> {
    let repository = PackageRepository::new(runtime, root.to_path_buf());
    for (name, version) in bundle.resolution.selected() {
        if repository.remove_version_dir(name, version)? {
            debug!("Removed local {} {}", name, version);
        }
    }
    unpack_tar_gz(runtime, &bundle.archive, root)
        .with_context(|| format!("Failed to unpack update into {:?}", root))
}
