//! Remote transport boundary.
//!
//! The synchronization protocol and the remote repository accessor only
//! ever talk to the shared repository through the [`Transport`] trait,
//! which exposes exactly the primitives the protocol needs. Two
//! implementations exist:
//!
//! - [`SshTransport`] drives the system `ssh` client (optionally through
//!   `sshpass` for password logins).
//! - [`MountTransport`] works on a shared directory mounted locally (NFS,
//!   SMB, a bind mount) and runs commands through `sh` inside it.
//!
//! Remote paths are plain `/`-separated strings; relative paths resolve
//! against the remote working directory.

mod mount;
mod ssh;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

pub use mount::MountTransport;
pub use ssh::{SshAuth, SshTransport};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("remote path already exists: {0}")]
    AlreadyExists(String),
    #[error("remote command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },
    #[error("{operation} failed: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Entry names (not paths) directly inside `path`.
    async fn list_directory(&self, path: &str) -> TransportResult<Vec<String>>;

    async fn read_file(&self, path: &str) -> TransportResult<Vec<u8>>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> TransportResult<()>;

    async fn remove_file(&self, path: &str) -> TransportResult<()>;

    /// Remove a directory tree. A missing directory is not an error.
    async fn remove_dir_all(&self, path: &str) -> TransportResult<()>;

    /// Run a shell command line on the remote side and return its stdout.
    async fn execute(&self, command: &str) -> TransportResult<Vec<u8>>;

    /// Create an empty file, failing with [`TransportError::AlreadyExists`]
    /// if anything already exists at `path`.
    async fn create_exclusive(&self, path: &str) -> TransportResult<()>;

    /// Human readable location of the remote side, for messages.
    fn describe(&self) -> String;
}

/// Join remote path components with `/`.
pub fn remote_path(base: &str, parts: &[&str]) -> String {
    let mut path = base.trim_end_matches('/').to_string();
    if path.is_empty() && base.starts_with('/') {
        path.push('/');
    }
    for part in parts {
        if !path.is_empty() && !path.ends_with('/') {
            path.push('/');
        }
        path.push_str(part.trim_matches('/'));
    }
    path
}

/// Quote a value for a POSIX shell command line.
pub fn quote(value: &str) -> String {
    shell_words::quote(value).into_owned()
}

pub(crate) async fn with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    future: F,
) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            operation: operation.to_string(),
            timeout,
        }),
    }
}
