//! Transport over a shared repository directory mounted on this machine.

use async_trait::async_trait;
use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{Transport, TransportError, TransportResult, with_timeout};

#[derive(Debug, Clone)]
pub struct MountTransport {
    base: PathBuf,
    timeout: Duration,
}

impl MountTransport {
    /// Relative remote paths resolve against `base`, which is also the
    /// working directory of executed commands.
    pub fn new(base: PathBuf, timeout: Duration) -> Self {
        Self { base, timeout }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base.join(path)
        }
    }
}

fn map_io(operation: &str, path: &str, err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::NotFound => TransportError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => TransportError::AlreadyExists(path.to_string()),
        _ => TransportError::Io {
            operation: format!("{} {}", operation, path),
            source: err,
        },
    }
}

#[async_trait]
impl Transport for MountTransport {
    async fn list_directory(&self, path: &str) -> TransportResult<Vec<String>> {
        let dir = self.resolve(path);
        with_timeout("list directory", self.timeout, async {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| map_io("list directory", path, e))?;
            let mut names = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| map_io("list directory", path, e))?
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(names)
        })
        .await
    }

    async fn read_file(&self, path: &str) -> TransportResult<Vec<u8>> {
        with_timeout("read file", self.timeout, async {
            tokio::fs::read(self.resolve(path))
                .await
                .map_err(|e| map_io("read file", path, e))
        })
        .await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> TransportResult<()> {
        with_timeout("write file", self.timeout, async {
            tokio::fs::write(self.resolve(path), contents)
                .await
                .map_err(|e| map_io("write file", path, e))
        })
        .await
    }

    async fn remove_file(&self, path: &str) -> TransportResult<()> {
        with_timeout("remove file", self.timeout, async {
            tokio::fs::remove_file(self.resolve(path))
                .await
                .map_err(|e| map_io("remove file", path, e))
        })
        .await
    }

    async fn remove_dir_all(&self, path: &str) -> TransportResult<()> {
        with_timeout("remove directory", self.timeout, async {
            match tokio::fs::remove_dir_all(self.resolve(path)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(map_io("remove directory", path, e)),
            }
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn execute(&self, command: &str) -> TransportResult<Vec<u8>> {
        debug!("sh -c in {:?}: {}", self.base, command);
        let output = with_timeout("execute", self.timeout, async {
            Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.base)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|source| TransportError::Io {
                    operation: "execute via sh".to_string(),
                    source,
                })
        })
        .await?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(TransportError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn create_exclusive(&self, path: &str) -> TransportResult<()> {
        with_timeout("create exclusive", self.timeout, async {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.resolve(path))
                .await
                .map(|_| ())
                .map_err(|e| map_io("create exclusive", path, e))
        })
        .await
    }

    fn describe(&self) -> String {
        self.base.display().to_string()
    }
}
