use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{build_transport, check_connection, ensure_not_cancelled};
use crate::builder::{BuiltPackage, PackageBuilder};
use crate::cleanup::{CleanupGuard, new_shared, spawn_interrupt_handler};
use crate::config::RemoteConfig;
use crate::package::{PackageManifest, PackageRepository};
use crate::runtime::Runtime;
use crate::sync::Publisher;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Overwrite an existing local version directory without asking.
    pub yes: bool,
    /// Replace an already published remote version.
    pub force: bool,
}

/// Build the package described by `manifest_path` into `root` and publish it.
///
/// Target globs resolve against the current working directory.
#[tracing::instrument(skip(runtime, env_file))]
pub async fn create<R: Runtime>(
    runtime: R,
    manifest_path: &Path,
    root: PathBuf,
    env_file: Option<&Path>,
    options: CreateOptions,
) -> Result<()> {
    let manifest = PackageManifest::load(&runtime, manifest_path)?;
    let config = RemoteConfig::load(&runtime, env_file)?;
    let transport = build_transport(&config);
    let source_root = runtime.current_dir()?;
    let root = source_root.join(root);
    run(
        &runtime,
        transport.as_ref(),
        &config,
        &manifest,
        root,
        source_root,
        options,
    )
    .await
}

pub(crate) async fn run<R: Runtime>(
    runtime: &R,
    transport: &dyn Transport,
    config: &RemoteConfig,
    manifest: &PackageManifest,
    root: PathBuf,
    source_root: PathBuf,
    options: CreateOptions,
) -> Result<()> {
    let repository = PackageRepository::new(runtime, root.clone());
    let version_dir = repository.version_dir(&manifest.name, &manifest.version);
    let installed = repository.is_version_installed(&manifest.name, &manifest.version);
    if installed && !options.yes {
        let prompt = format!(
            "Directory '{}' already exists. Do you want to force rewrite it?",
            version_dir.display()
        );
        if !runtime.confirm(&prompt)? {
            println!("Skipping package upload and unpack...");
            return Ok(());
        }
    }

    let cancel = CancellationToken::new();
    let ctx = new_shared(cancel.clone());
    let interrupt = spawn_interrupt_handler(Arc::clone(&ctx));

    // An interrupted rebuild only discards the staged copy.
    let in_progress = if installed {
        repository.partial_dir(&manifest.name, &manifest.version)
    } else {
        version_dir
    };

    let result: Result<()> = async {
        let guard = CleanupGuard::new(Arc::clone(&ctx), in_progress);
        let built = PackageBuilder::new(runtime, root, source_root)
            .build(manifest, true)
            .await?;
        ensure_not_cancelled(&cancel, "package build")?;
        guard.success();
        publish_built(runtime, transport, config, &built, options.force, &cancel).await
    }
    .await;

    interrupt.abort();
    result
}

async fn publish_built<R: Runtime>(
    runtime: &R,
    transport: &dyn Transport,
    config: &RemoteConfig,
    built: &BuiltPackage,
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let archive = config.archive_format.pack(runtime, &built.dir)?;
    debug!("Archived {:?}: {} bytes", built.dir, archive.len());

    check_connection(transport, cancel).await?;
    println!("Remote connection successful");
    println!("Package {} v{} created locally", built.name, built.version);

    let publisher = Publisher::new(
        transport,
        &config.layout,
        config.lock_policy.clone(),
        config.archive_format,
    );
    publisher
        .publish(&built.name, &built.version, &archive, force, cancel)
        .await?;
    println!(
        "Package {} v{} uploaded and unpacked on remote server {}",
        built.name,
        built.version,
        transport.describe()
    );
    Ok(())
}
