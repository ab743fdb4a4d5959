use anyhow::{Context, Result};
use async_trait::async_trait;

use super::VersionSource;
use crate::package::{DEPENDENCIES_FILE, DependencyConstraint, parse_dependency_list};
use crate::transport::{Transport, TransportError, remote_path};

/// Versions published under a repository root on the remote side.
pub struct RemoteSource<'a> {
    transport: &'a dyn Transport,
    root: String,
}

impl<'a> RemoteSource<'a> {
    pub fn new(transport: &'a dyn Transport, root: impl Into<String>) -> Self {
        Self {
            transport,
            root: root.into(),
        }
    }

    fn version_path(&self, name: &str, version: &str) -> String {
        remote_path(&self.root, &[name, version])
    }
}

#[async_trait]
impl VersionSource for RemoteSource<'_> {
    async fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let path = remote_path(&self.root, &[name]);
        self.transport
            .list_directory(&path)
            .await
            .with_context(|| {
                format!(
                    "Failed to list versions of '{}' on {}",
                    name,
                    self.transport.describe()
                )
            })
    }

    async fn read_dependencies(&self, name: &str, version: &str) -> Result<Vec<DependencyConstraint>> {
        let path = remote_path(&self.version_path(name, version), &[DEPENDENCIES_FILE]);
        let bytes = match self.transport.read_file(&path).await {
            Ok(bytes) => bytes,
            Err(TransportError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read remote {}", path));
            }
        };
        let content = String::from_utf8(bytes)
            .with_context(|| format!("Remote {} is not valid UTF-8", path))?;
        parse_dependency_list(&content).with_context(|| format!("Failed to parse remote {}", path))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.transport.describe(), self.root)
    }
}
