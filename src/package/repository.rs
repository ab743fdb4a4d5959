//! Local package repository layout.
//!
//! ```text
//! <root>/<name>/<version>/...                copied targets
//! <root>/<name>/<version>/dependencies.json  declared dependencies
//! <root>/<name>/.<version>.partial/          rebuild in progress
//! <root>/<name>/.<version>.previous/         replaced build, until swapped out
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::constraint::{DependencyConstraint, parse_dependency_list};
use crate::runtime::Runtime;

/// Name of the generated dependency manifest inside every version directory.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// Default repository root, relative to the working directory.
pub const DEFAULT_ROOT: &str = "gopm_packages";

/// Repository of installed package versions under an explicit root.
pub struct PackageRepository<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
}

impl<'a, R: Runtime> PackageRepository<'a, R> {
    pub fn new(runtime: &'a R, root: PathBuf) -> Self {
        Self { runtime, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns: `<root>/<name>`
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Returns: `<root>/<name>/<version>`
    pub fn version_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name).join(version)
    }

    /// Returns: `<root>/<name>/<version>/dependencies.json`
    pub fn dependencies_path(&self, name: &str, version: &str) -> PathBuf {
        self.version_dir(name, version).join(DEPENDENCIES_FILE)
    }

    /// Returns: `<root>/<name>/.<version>.partial`
    pub fn partial_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name).join(format!(".{}.partial", version))
    }

    /// Returns: `<root>/<name>/.<version>.previous`
    pub fn previous_dir(&self, name: &str, version: &str) -> PathBuf {
        self.package_dir(name).join(format!(".{}.previous", version))
    }

    pub fn is_version_installed(&self, name: &str, version: &str) -> bool {
        self.runtime.is_dir(&self.version_dir(name, version))
    }

    /// Names of the version directories installed for `name`.
    ///
    /// A missing package directory is an error, so callers can tell
    /// "package not installed" apart from "no version fits".
    pub fn installed_versions(&self, name: &str) -> Result<Vec<String>> {
        let package_dir = self.package_dir(name);
        if !self.runtime.is_dir(&package_dir) {
            anyhow::bail!("Package '{}' not found in {:?}", name, self.root);
        }

        let mut versions = Vec::new();
        for entry in self
            .runtime
            .read_dir(&package_dir)
            .with_context(|| format!("Failed to list versions of '{}'", name))?
        {
            if let Some(version) = entry.file_name().and_then(|n| n.to_str())
                && !version.starts_with('.')
                && self.runtime.is_dir(&entry)
            {
                versions.push(version.to_string());
            }
        }
        Ok(versions)
    }

    /// Write the dependency manifest into a (possibly staged) version directory.
    pub fn write_dependencies(&self, dir: &Path, dependencies: &[DependencyConstraint]) -> Result<()> {
        let path = dir.join(DEPENDENCIES_FILE);
        let content = serde_json::to_string_pretty(dependencies)?;
        self.runtime
            .write(&path, content.as_bytes())
            .with_context(|| format!("Failed to write dependencies file {:?}", path))
    }

    /// Read the dependency manifest of a version; an absent file means none.
    pub fn read_dependencies(&self, name: &str, version: &str) -> Result<Vec<DependencyConstraint>> {
        let path = self.dependencies_path(name, version);
        if !self.runtime.exists(&path) {
            return Ok(Vec::new());
        }
        let content = self.runtime.read_to_string(&path)?;
        parse_dependency_list(&content)
            .with_context(|| format!("Failed to parse dependencies file {:?}", path))
    }

    /// Remove one version directory, if present. Other versions are untouched.
    pub fn remove_version_dir(&self, name: &str, version: &str) -> Result<bool> {
        let version_dir = self.version_dir(name, version);
        if !self.runtime.exists(&version_dir) {
            return Ok(false);
        }
        self.runtime
            .remove_dir_all(&version_dir)
            .with_context(|| format!("Failed to delete package directory {:?}", version_dir))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::version::Operator;
    use crate::runtime::{MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    #[test]
    fn test_layout_paths() {
        let runtime = MockRuntime::new();
        let repo = PackageRepository::new(&runtime, PathBuf::from("/repo"));

        assert_eq!(repo.package_dir("lib"), PathBuf::from("/repo/lib"));
        assert_eq!(repo.version_dir("lib", "1.0.0"), PathBuf::from("/repo/lib/1.0.0"));
        assert_eq!(
            repo.dependencies_path("lib", "1.0.0"),
            PathBuf::from("/repo/lib/1.0.0/dependencies.json")
        );
        assert_eq!(repo.partial_dir("lib", "1.0.0"), PathBuf::from("/repo/lib/.1.0.0.partial"));
        assert_eq!(repo.previous_dir("lib", "1.0.0"), PathBuf::from("/repo/lib/.1.0.0.previous"));
    }

    #[test]
    fn test_installed_versions_missing_package_is_error() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_is_dir()
            .with(eq(PathBuf::from("/repo/lib")))
            .returning(|_| false);

        let repo = PackageRepository::new(&runtime, PathBuf::from("/repo"));
        let err = repo.installed_versions("lib").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_installed_versions_skips_files_and_staged_builds() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_is_dir()
            .with(eq(PathBuf::from("/repo/lib")))
            .returning(|_| true);
        runtime
            .expect_read_dir()
            .with(eq(PathBuf::from("/repo/lib")))
            .returning(|_| {
                Ok(vec![
                    PathBuf::from("/repo/lib/1.0.0"),
                    PathBuf::from("/repo/lib/notes.txt"),
                    PathBuf::from("/repo/lib/.1.3.0.partial"),
                    PathBuf::from("/repo/lib/1.3.0"),
                ])
            });
        runtime
            .expect_is_dir()
            .with(eq(PathBuf::from("/repo/lib/1.0.0")))
            .returning(|_| true);
        runtime
            .expect_is_dir()
            .with(eq(PathBuf::from("/repo/lib/notes.txt")))
            .returning(|_| false);
        runtime
            .expect_is_dir()
            .with(eq(PathBuf::from("/repo/lib/1.3.0")))
            .returning(|_| true);

        let repo = PackageRepository::new(&runtime, PathBuf::from("/repo"));
        assert_eq!(repo.installed_versions("lib").unwrap(), vec!["1.0.0", "1.3.0"]);
    }

    #[test]
    fn test_dependencies_round_trip_on_disk() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let repo = PackageRepository::new(&runtime, dir.path().to_path_buf());
        runtime.create_dir_all(&repo.version_dir("app", "1.0.0")).unwrap();

        let deps = vec![
            DependencyConstraint::new("lib", "1.2.0", Operator::Ge).unwrap(),
            DependencyConstraint::new("util", "2.0.0", Operator::Lt).unwrap(),
        ];
        repo.write_dependencies(&repo.version_dir("app", "1.0.0"), &deps).unwrap();

        assert_eq!(repo.read_dependencies("app", "1.0.0").unwrap(), deps);
    }

    #[test]
    fn test_read_dependencies_absent_file_is_empty() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_exists()
            .with(eq(PathBuf::from("/repo/lib/1.0.0/dependencies.json")))
            .returning(|_| false);

        let repo = PackageRepository::new(&runtime, PathBuf::from("/repo"));
        assert!(repo.read_dependencies("lib", "1.0.0").unwrap().is_empty());
    }

    #[test]
    fn test_remove_version_dir_only_touches_that_version() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let repo = PackageRepository::new(&runtime, dir.path().to_path_buf());
        runtime.create_dir_all(&repo.version_dir("lib", "1.0.0")).unwrap();
        runtime.create_dir_all(&repo.version_dir("lib", "1.1.0")).unwrap();

        assert!(repo.remove_version_dir("lib", "1.0.0").unwrap());
        assert!(!repo.remove_version_dir("lib", "1.0.0").unwrap());

        assert!(!repo.is_version_installed("lib", "1.0.0"));
        assert!(repo.is_version_installed("lib", "1.1.0"));
    }
}
