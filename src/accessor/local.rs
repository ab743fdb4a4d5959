use anyhow::Result;
use async_trait::async_trait;

use super::VersionSource;
use crate::package::{DependencyConstraint, PackageRepository};
use crate::runtime::Runtime;

/// Versions installed in a local repository root.
pub struct LocalSource<'a, R: Runtime> {
    repository: PackageRepository<'a, R>,
}

impl<'a, R: Runtime> LocalSource<'a, R> {
    pub fn new(repository: PackageRepository<'a, R>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl<R: Runtime> VersionSource for LocalSource<'_, R> {
    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        self.repository.installed_versions(name)
    }

    async fn read_dependencies(&self, name: &str, version: &str) -> Result<Vec<DependencyConstraint>> {
        self.repository.read_dependencies(name, version)
    }

    fn describe(&self) -> String {
        format!("local repository {:?}", self.repository.root())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::find_suitable_versions;
    use crate::package::version::Operator;
    use crate::runtime::RealRuntime;
    use std::fs;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lists_installed_version_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib/1.3.0")).unwrap();
        fs::create_dir_all(dir.path().join("lib/1.0.0")).unwrap();
        fs::write(dir.path().join("lib/README"), "not a version").unwrap();

        let runtime = RealRuntime;
        let source = LocalSource::new(PackageRepository::new(&runtime, dir.path().to_path_buf()));

        let mut versions = source.list_versions("lib").await.unwrap();
        versions.sort();
        assert_eq!(versions, vec!["1.0.0", "1.3.0"]);

        let best = find_suitable_versions(&source, "lib", "1.2.0", Operator::Ge)
            .await
            .unwrap();
        assert_eq!(best, vec!["1.3.0"]);
    }

    #[tokio::test]
    async fn test_missing_package_is_error_not_empty() {
        let dir = tempdir().unwrap();
        let runtime = RealRuntime;
        let source = LocalSource::new(PackageRepository::new(&runtime, dir.path().to_path_buf()));

        assert!(source.list_versions("lib").await.is_err());
    }

    #[tokio::test]
    async fn test_reads_declared_dependencies() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app/1.0.0")).unwrap();
        fs::write(
            dir.path().join("app/1.0.0/dependencies.json"),
            r#"[{"name":"lib","ver":"1.2.0","operator":">="}]"#,
        )
        .unwrap();

        let runtime = RealRuntime;
        let source = LocalSource::new(PackageRepository::new(&runtime, dir.path().to_path_buf()));

        let deps = source.read_dependencies("app", "1.0.0").await.unwrap();
        assert_eq!(deps, vec![DependencyConstraint::new("lib", "1.2.0", Operator::Ge).unwrap()]);
    }
}
