//! Package builder: materializes `<root>/<name>/<version>/` from a manifest.
//!
//! The build is all-or-nothing. Declared dependencies are checked against
//! the local repository before anything is written, and a failure while
//! copying targets or writing `dependencies.json` removes what was built.
//! Rebuilding an existing version never touches it until the new build is
//! complete.

mod copy;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::accessor::{LocalSource, find_suitable_versions};
use crate::package::{DependencyConstraint, PackageManifest, PackageRepository};
use crate::runtime::Runtime;

use copy::TargetCopier;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("dependency '{name}' is not installed in {root:?}")]
    MissingDependency { name: String, root: PathBuf },
    #[error("no installed version of '{name}' satisfies {constraint}")]
    UnsatisfiedDependency { name: String, constraint: String },
    #[error("package directory {0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    InvalidManifest(#[from] crate::package::ManifestError),
}

/// A version directory produced by [`PackageBuilder::build`].
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPackage {
    pub name: String,
    pub version: String,
    pub dir: PathBuf,
    pub files: usize,
}

pub struct PackageBuilder<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
    source_root: PathBuf,
}

impl<'a, R: Runtime> PackageBuilder<'a, R> {
    /// `root` is the local repository; target globs resolve against `source_root`.
    pub fn new(runtime: &'a R, root: PathBuf, source_root: PathBuf) -> Self {
        Self {
            runtime,
            root,
            source_root,
        }
    }

    fn repository(&self) -> PackageRepository<'a, R> {
        PackageRepository::new(self.runtime, self.root.clone())
    }

    /// Build the package. With `overwrite` an existing version directory is
    /// replaced; without it the build fails with [`BuildError::AlreadyExists`].
    ///
    /// A replacement is built in `.<version>.partial` next to the existing
    /// directory and swapped in only once it is complete, so a failed rebuild
    /// leaves the previous build in place.
    #[tracing::instrument(skip(self, manifest), fields(name = %manifest.name, version = %manifest.version))]
    pub async fn build(&self, manifest: &PackageManifest, overwrite: bool) -> Result<BuiltPackage> {
        manifest.validate().map_err(BuildError::from)?;
        self.check_dependencies(&manifest.dependencies).await?;

        let repository = self.repository();
        let version_dir = repository.version_dir(&manifest.name, &manifest.version);
        let replacing = self.runtime.exists(&version_dir);
        if replacing && !overwrite {
            return Err(BuildError::AlreadyExists(version_dir).into());
        }

        let build_dir = if replacing {
            let partial = repository.partial_dir(&manifest.name, &manifest.version);
            self.remove_stale(&partial)?;
            partial
        } else {
            version_dir.clone()
        };

        self.runtime
            .create_dir_all(&build_dir)
            .with_context(|| format!("Failed to create package directory {:?}", build_dir))?;

        let built = self.populate(manifest, &build_dir).and_then(|files| {
            if replacing {
                info!("Replacing existing package directory {:?}", version_dir);
                let previous = repository.previous_dir(&manifest.name, &manifest.version);
                self.swap_into_place(&build_dir, &version_dir, &previous)?;
            }
            Ok(files)
        });

        match built {
            Ok(files) => {
                info!(
                    "Built {} {} with {} file(s) in {:?}",
                    manifest.name, manifest.version, files, version_dir
                );
                Ok(BuiltPackage {
                    name: manifest.name.clone(),
                    version: manifest.version.clone(),
                    dir: version_dir,
                    files,
                })
            }
            Err(e) => {
                if let Err(cleanup) = self.runtime.remove_dir_all(&build_dir) {
                    warn!("Failed to roll back {:?}: {:#}", build_dir, cleanup);
                }
                Err(e)
            }
        }
    }

    /// Remove leftovers of an interrupted rebuild.
    fn remove_stale(&self, dir: &Path) -> Result<()> {
        if self.runtime.exists(dir) {
            debug!("Removing stale build directory {:?}", dir);
            self.runtime
                .remove_dir_all(dir)
                .with_context(|| format!("Failed to remove stale build directory {:?}", dir))?;
        }
        Ok(())
    }

    /// Move the finished build over `version_dir`. The old directory is parked
    /// at `previous` and restored if the new one cannot be moved in.
    fn swap_into_place(&self, build_dir: &Path, version_dir: &Path, previous: &Path) -> Result<()> {
        self.remove_stale(previous)?;
        self.runtime.rename(version_dir, previous)?;
        if let Err(e) = self.runtime.rename(build_dir, version_dir) {
            if let Err(restore) = self.runtime.rename(previous, version_dir) {
                warn!("Failed to restore {:?}: {:#}", version_dir, restore);
            }
            return Err(e);
        }
        if let Err(e) = self.runtime.remove_dir_all(previous) {
            warn!("Failed to remove replaced build {:?}: {:#}", previous, e);
        }
        Ok(())
    }

    /// Every declared dependency must have an installed version satisfying it.
    pub async fn check_dependencies(&self, dependencies: &[DependencyConstraint]) -> Result<()> {
        let source = LocalSource::new(self.repository());
        for dependency in dependencies {
            let suitable = find_suitable_versions(
                &source,
                &dependency.name,
                &dependency.version,
                dependency.operator,
            )
            .await
            .map_err(|_| BuildError::MissingDependency {
                name: dependency.name.clone(),
                root: self.root.clone(),
            })?;

            match suitable.first() {
                Some(version) => info!("Dependency {} satisfied by {}", dependency, version),
                None => {
                    return Err(BuildError::UnsatisfiedDependency {
                        name: dependency.name.clone(),
                        constraint: format!("{}{}", dependency.operator, dependency.version),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    fn populate(&self, manifest: &PackageManifest, build_dir: &Path) -> Result<usize> {
        let copier = TargetCopier::new(self.runtime, &self.source_root, build_dir);
        let mut files = 0;
        for target in &manifest.targets {
            files += copier
                .copy_target(target)
                .with_context(|| format!("Failed to copy target '{}'", target.path))?;
        }
        self.repository()
            .write_dependencies(build_dir, &manifest.dependencies)?;
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{DEPENDENCIES_FILE, Target, parse_dependency_list};
    use crate::package::version::Operator;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = tempdir().unwrap();
            fs::create_dir_all(dir.path().join("src")).unwrap();
            fs::write(dir.path().join("src/main.go"), "package main").unwrap();
            fs::write(dir.path().join("src/util.go"), "package main").unwrap();
            fs::write(dir.path().join("src/main_test.go"), "package main").unwrap();
            Self { dir }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().join("gopm_packages")
        }

        fn install(&self, name: &str, version: &str) {
            fs::create_dir_all(self.root().join(name).join(version)).unwrap();
        }

        fn builder<'a>(&self, runtime: &'a RealRuntime) -> PackageBuilder<'a, RealRuntime> {
            PackageBuilder::new(runtime, self.root(), self.dir.path().to_path_buf())
        }
    }

    fn manifest(targets: Vec<Target>, dependencies: Vec<DependencyConstraint>) -> PackageManifest {
        PackageManifest {
            name: "app".into(),
            version: "1.0.0".into(),
            targets,
            dependencies,
        }
    }

    fn target(path: &str, exclude: &str) -> Target {
        Target {
            path: path.into(),
            exclude: exclude.into(),
        }
    }

    #[tokio::test]
    async fn test_build_with_satisfied_dependency() {
        let ws = Workspace::new();
        ws.install("lib", "1.3.0");
        let runtime = RealRuntime;

        let built = ws
            .builder(&runtime)
            .build(
                &manifest(
                    vec![target("src/*.go", "")],
                    vec![DependencyConstraint::parse("lib", ">=1.2.0").unwrap()],
                ),
                false,
            )
            .await
            .unwrap();

        let dir = ws.root().join("app/1.0.0");
        assert_eq!(built.dir, dir);
        assert_eq!(built.files, 3);
        assert!(dir.join("main.go").exists());
        assert!(dir.join("main_test.go").exists());

        let deps =
            parse_dependency_list(&fs::read_to_string(dir.join(DEPENDENCIES_FILE)).unwrap()).unwrap();
        assert_eq!(deps, vec![DependencyConstraint::new("lib", "1.2.0", Operator::Ge).unwrap()]);
    }

    #[tokio::test]
    async fn test_embedded_and_split_forms_write_same_dependencies() {
        let ws = Workspace::new();
        ws.install("lib", "1.3.0");
        let runtime = RealRuntime;

        let split: PackageManifest = serde_json::from_str(
            r#"{"name":"app","ver":"1.0.0","packets":[{"name":"lib","ver":"1.2.0","operator":">="}]}"#,
        )
        .unwrap();
        let embedded: PackageManifest = serde_json::from_str(
            r#"{"name":"app","ver":"2.0.0","packets":[{"name":"lib","ver":">=1.2.0"}]}"#,
        )
        .unwrap();

        let builder = ws.builder(&runtime);
        builder.build(&split, false).await.unwrap();
        builder.build(&embedded, false).await.unwrap();

        let read = |version: &str| {
            fs::read_to_string(ws.root().join("app").join(version).join(DEPENDENCIES_FILE)).unwrap()
        };
        assert_eq!(read("1.0.0"), read("2.0.0"));
    }

    #[tokio::test]
    async fn test_excludes_apply_to_matches() {
        let ws = Workspace::new();
        let runtime = RealRuntime;

        let built = ws
            .builder(&runtime)
            .build(&manifest(vec![target("src/*.go", "*_test.go, util.*")], vec![]), false)
            .await
            .unwrap();

        assert_eq!(built.files, 1);
        assert!(built.dir.join("main.go").exists());
        assert!(!built.dir.join("main_test.go").exists());
        assert!(!built.dir.join("util.go").exists());
    }

    #[tokio::test]
    async fn test_directory_target_copies_recursively_with_excludes() {
        let ws = Workspace::new();
        fs::create_dir_all(ws.dir.path().join("assets/img/cache")).unwrap();
        fs::write(ws.dir.path().join("assets/img/logo.png"), "png").unwrap();
        fs::write(ws.dir.path().join("assets/img/logo.tmp"), "tmp").unwrap();
        fs::write(ws.dir.path().join("assets/img/cache/x"), "x").unwrap();
        let runtime = RealRuntime;

        let built = ws
            .builder(&runtime)
            .build(&manifest(vec![target("assets", "*.tmp,cache")], vec![]), false)
            .await
            .unwrap();

        assert!(built.dir.join("assets/img/logo.png").exists());
        assert!(!built.dir.join("assets/img/logo.tmp").exists());
        assert!(!built.dir.join("assets/img/cache").exists());
    }

    #[tokio::test]
    async fn test_missing_dependency_builds_nothing() {
        let ws = Workspace::new();
        let runtime = RealRuntime;

        let err = ws
            .builder(&runtime)
            .build(
                &manifest(
                    vec![target("src/*.go", "")],
                    vec![DependencyConstraint::parse("lib", ">=1.0.0").unwrap()],
                ),
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::MissingDependency { name, .. }) if name == "lib"
        ));
        assert!(!ws.root().join("app").exists());
    }

    #[tokio::test]
    async fn test_unsatisfied_dependency_builds_nothing() {
        let ws = Workspace::new();
        ws.install("lib", "1.0.0");
        let runtime = RealRuntime;

        let err = ws
            .builder(&runtime)
            .build(
                &manifest(vec![], vec![DependencyConstraint::parse("lib", ">=2.0.0").unwrap()]),
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::UnsatisfiedDependency { constraint, .. }) if constraint == ">=2.0.0"
        ));
        assert!(!ws.root().join("app/1.0.0").exists());
    }

    #[tokio::test]
    async fn test_existing_version_requires_overwrite() {
        let ws = Workspace::new();
        ws.install("app", "1.0.0");
        fs::write(ws.root().join("app/1.0.0/stale.txt"), "old").unwrap();
        let runtime = RealRuntime;
        let builder = ws.builder(&runtime);
        let m = manifest(vec![target("src/main.go", "")], vec![]);

        let err = builder.build(&m, false).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::AlreadyExists(_))));
        assert!(ws.root().join("app/1.0.0/stale.txt").exists());

        builder.build(&m, true).await.unwrap();
        assert!(!ws.root().join("app/1.0.0/stale.txt").exists());
        assert!(ws.root().join("app/1.0.0/main.go").exists());

        let entries: Vec<_> = fs::read_dir(ws.root().join("app"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_stale_partial_build() {
        let ws = Workspace::new();
        ws.install("app", "1.0.0");
        fs::create_dir_all(ws.root().join("app/.1.0.0.partial")).unwrap();
        fs::write(ws.root().join("app/.1.0.0.partial/leftover.txt"), "x").unwrap();
        let runtime = RealRuntime;

        ws.builder(&runtime)
            .build(&manifest(vec![target("src/main.go", "")], vec![]), true)
            .await
            .unwrap();

        assert!(ws.root().join("app/1.0.0/main.go").exists());
        assert!(!ws.root().join("app/1.0.0/leftover.txt").exists());
        assert!(!ws.root().join("app/.1.0.0.partial").exists());
    }

    #[tokio::test]
    async fn test_failed_overwrite_keeps_existing_version() {
        let mut runtime = MockRuntime::new();

        runtime
            .expect_exists()
            .withf(|p| p == Path::new("/repo/app/1.0.0"))
            .returning(|_| true);
        runtime
            .expect_exists()
            .withf(|p| p == Path::new("/repo/app/.1.0.0.partial"))
            .returning(|_| false);
        runtime
            .expect_create_dir_all()
            .withf(|p| p == Path::new("/repo/app/.1.0.0.partial"))
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_glob()
            .returning(|_| Ok(vec![PathBuf::from("/work/src/a.go")]));
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_copy()
            .withf(|_, to| to == Path::new("/repo/app/.1.0.0.partial/a.go"))
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        runtime
            .expect_remove_dir_all()
            .withf(|p| p == Path::new("/repo/app/.1.0.0.partial"))
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_remove_dir_all()
            .withf(|p| p == Path::new("/repo/app/1.0.0"))
            .never();
        runtime.expect_rename().never();
        runtime.expect_write().never();

        let builder = PackageBuilder::new(&runtime, PathBuf::from("/repo"), PathBuf::from("/work"));
        let err = builder
            .build(&manifest(vec![target("src/*.go", "")], vec![]), true)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("disk full"));
    }

    #[tokio::test]
    async fn test_failed_swap_restores_existing_version() {
        let mut runtime = MockRuntime::new();

        runtime
            .expect_exists()
            .withf(|p| p == Path::new("/repo/app/1.0.0"))
            .returning(|_| true);
        runtime
            .expect_exists()
            .withf(|p| p.ends_with(".1.0.0.partial") || p.ends_with(".1.0.0.previous"))
            .returning(|_| false);
        runtime.expect_create_dir_all().returning(|_| Ok(()));
        runtime
            .expect_write()
            .withf(|p, _| p == Path::new("/repo/app/.1.0.0.partial/dependencies.json"))
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_rename()
            .withf(|from, to| {
                from == Path::new("/repo/app/1.0.0") && to == Path::new("/repo/app/.1.0.0.previous")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_rename()
            .withf(|from, _| from == Path::new("/repo/app/.1.0.0.partial"))
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("cross-device link")));
        runtime
            .expect_rename()
            .withf(|from, to| {
                from == Path::new("/repo/app/.1.0.0.previous") && to == Path::new("/repo/app/1.0.0")
            })
            .times(1)
            .returning(|_, _| Ok(()));
        runtime
            .expect_remove_dir_all()
            .withf(|p| p == Path::new("/repo/app/.1.0.0.partial"))
            .times(1)
            .returning(|_| Ok(()));

        let builder = PackageBuilder::new(&runtime, PathBuf::from("/repo"), PathBuf::from("/work"));
        let err = builder
            .build(&manifest(vec![], vec![]), true)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("cross-device link"));
    }

    #[tokio::test]
    async fn test_copy_failure_rolls_back() {
        let mut runtime = MockRuntime::new();
        let version_dir = PathBuf::from("/repo/app/1.0.0");

        runtime
            .expect_exists()
            .withf(|p| p == Path::new("/repo/app/1.0.0"))
            .returning(|_| false);
        runtime
            .expect_create_dir_all()
            .withf(|p| p == Path::new("/repo/app/1.0.0"))
            .times(1)
            .returning(|_| Ok(()));
        runtime
            .expect_glob()
            .withf(|p| p == "/work/src/*.go")
            .returning(|_| Ok(vec![PathBuf::from("/work/src/a.go")]));
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_copy()
            .returning(|_, _| Err(anyhow::anyhow!("disk full")));
        runtime
            .expect_remove_dir_all()
            .withf(move |p| p == version_dir)
            .times(1)
            .returning(|_| Ok(()));
        // dependencies.json must never be written.
        runtime.expect_write().never();

        let builder = PackageBuilder::new(&runtime, PathBuf::from("/repo"), PathBuf::from("/work"));
        let err = builder
            .build(&manifest(vec![target("src/*.go", "")], vec![]), false)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("disk full"));
    }

    #[tokio::test]
    async fn test_target_matching_nothing_is_not_an_error() {
        let ws = Workspace::new();
        let runtime = RealRuntime;

        let built = ws
            .builder(&runtime)
            .build(&manifest(vec![target("bin/*", "")], vec![]), false)
            .await
            .unwrap();

        assert_eq!(built.files, 0);
        assert!(built.dir.join(DEPENDENCIES_FILE).exists());
    }

    #[tokio::test]
    async fn test_invalid_manifest_rejected_before_any_io() {
        let runtime = MockRuntime::new();
        let builder = PackageBuilder::new(&runtime, PathBuf::from("/repo"), PathBuf::from("/work"));
        let mut m = manifest(vec![], vec![]);
        m.version = "not-a-version".into();

        let err = builder.build(&m, false).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BuildError>(), Some(BuildError::InvalidManifest(_))));
    }
}
