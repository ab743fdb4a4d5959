use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use super::{build_transport, check_connection, ensure_not_cancelled};
use crate::cleanup::{new_shared, spawn_interrupt_handler};
use crate::config::RemoteConfig;
use crate::package::UpdateManifest;
use crate::runtime::Runtime;
use crate::sync::{Fetcher, install_update};
use crate::transport::Transport;

/// Resolve the packages requested by `manifest_path` against the remote
/// repository and replace their local versions under `root`.
#[tracing::instrument(skip(runtime, env_file))]
pub async fn update<R: Runtime>(
    runtime: R,
    manifest_path: &Path,
    root: PathBuf,
    env_file: Option<&Path>,
) -> Result<()> {
    let manifest = UpdateManifest::load(&runtime, manifest_path)?;
    let config = RemoteConfig::load(&runtime, env_file)?;
    let transport = build_transport(&config);
    run(&runtime, transport.as_ref(), &config, &manifest, &root).await
}

pub(crate) async fn run<R: Runtime>(
    runtime: &R,
    transport: &dyn Transport,
    config: &RemoteConfig,
    manifest: &UpdateManifest,
    root: &Path,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(new_shared(cancel.clone()));

    let result: Result<()> = async {
        check_connection(transport, &cancel).await?;
        println!("Remote connection successful");

        let bundle = Fetcher::new(transport, &config.layout)
            .fetch(&manifest.packages, &cancel)
            .await?;
        ensure_not_cancelled(&cancel, "update")?;

        println!("Deleting local versions and unpacking...");
        let files = install_update(runtime, root, &bundle)?;
        println!("Archive unpacked. Local versions updated ({} files)", files);
        for (name, version) in bundle.resolution.selected() {
            println!("  {} v{}", name, version);
        }
        Ok(())
    }
    .await;

    interrupt.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveFormat;
    use crate::config::ConnectionMode;
    use crate::package::{DependencyConstraint, Operator};
    use crate::resolver::ResolveError;
    use crate::runtime::RealRuntime;
    use crate::sync::{LockPolicy, RemoteLayout};
    use crate::transport::MountTransport;
    use std::fs;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn publish_remote(remote: &Path, name: &str, version: &str, deps: &str) {
        let dir = remote.join("gopm_packages").join(name).join(version);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.go", name)), version).unwrap();
        fs::write(dir.join("dependencies.json"), deps).unwrap();
    }

    /// Remote: app 1.0.0 -> lib >=1.0.0; lib 0.9.0 and 1.1.0; tool 2.0.0.
    fn setup() -> (TempDir, PathBuf, RemoteConfig) {
        let dir = tempdir().unwrap();
        let remote = dir.path().join("remote");
        publish_remote(
            &remote,
            "app",
            "1.0.0",
            r#"[{"name":"lib","ver":"1.0.0","operator":">="}]"#,
        );
        publish_remote(&remote, "lib", "0.9.0", "[]");
        publish_remote(&remote, "lib", "1.1.0", "null");
        publish_remote(&remote, "tool", "2.0.0", "");
        fs::create_dir_all(remote.join("tmp")).unwrap();

        let config = RemoteConfig {
            mode: ConnectionMode::Local {
                dir: remote.clone(),
            },
            layout: RemoteLayout {
                root: "gopm_packages".into(),
                staging: ".".into(),
                tmp: "tmp".into(),
            },
            command_timeout: Duration::from_secs(30),
            lock_policy: LockPolicy::default(),
            archive_format: ArchiveFormat::TarGz,
        };
        (dir, remote, config)
    }

    fn request(packages: &[(&str, &str, Operator)]) -> UpdateManifest {
        UpdateManifest {
            packages: packages
                .iter()
                .map(|(n, v, op)| DependencyConstraint::new(*n, *v, *op).unwrap())
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_update_installs_dependency_closure() {
        let (dir, remote, config) = setup();
        let transport = MountTransport::new(remote, config.command_timeout);
        let root = dir.path().join("local/gopm_packages");
        fs::create_dir_all(root.join("lib/1.1.0")).unwrap();
        fs::write(root.join("lib/1.1.0/stale.txt"), "stale").unwrap();
        fs::create_dir_all(root.join("lib/0.1.0")).unwrap();

        run(
            &RealRuntime,
            &transport,
            &config,
            &request(&[("app", "1.0.0", Operator::Eq)]),
            &root,
        )
        .await
        .unwrap();

        assert_eq!(fs::read_to_string(root.join("app/1.0.0/app.go")).unwrap(), "1.0.0");
        assert_eq!(fs::read_to_string(root.join("lib/1.1.0/lib.go")).unwrap(), "1.1.0");
        assert!(!root.join("lib/1.1.0/stale.txt").exists());
        assert!(root.join("lib/0.1.0").is_dir());
        assert!(!root.join("lib/0.9.0").exists());
        assert!(!root.join("tool").exists());
    }

    #[tokio::test]
    async fn test_update_no_suitable_version_leaves_local_untouched() {
        let (dir, remote, config) = setup();
        let transport = MountTransport::new(remote.clone(), config.command_timeout);
        let root = dir.path().join("local/gopm_packages");
        fs::create_dir_all(root.join("lib/1.1.0")).unwrap();

        let err = run(
            &RealRuntime,
            &transport,
            &config,
            &request(&[("lib", "2.0.0", Operator::Ge)]),
            &root,
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ResolveError>(),
            Some(ResolveError::NoSuitableVersion { name, .. }) if name == "lib"
        ));
        assert!(root.join("lib/1.1.0").is_dir());
        assert_eq!(fs::read_dir(remote.join("tmp")).unwrap().count(), 0);
    }
}
