//! Transport over the system OpenSSH client.
//!
//! Every primitive is a short POSIX shell script executed on the remote
//! host. Scripts signal "not found" and "already exists" through reserved
//! exit codes so they can be told apart from ordinary command failures.

use async_trait::async_trait;
use log::debug;
use std::fmt;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Transport, TransportError, TransportResult, quote, with_timeout};

const EXIT_NOT_FOUND: i32 = 44;
const EXIT_ALREADY_EXISTS: i32 = 45;

#[derive(Clone)]
pub enum SshAuth {
    /// Password login, fed to `sshpass` through the `SSHPASS` variable.
    Password(String),
    /// Private key file passed to `ssh -i`.
    Key(PathBuf),
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(<redacted>)"),
            SshAuth::Key(path) => f.debug_tuple("Key").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    login: String,
    host: String,
    port: u16,
    auth: SshAuth,
    timeout: Duration,
}

impl SshTransport {
    pub fn new(
        login: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        auth: SshAuth,
        timeout: Duration,
    ) -> Self {
        Self {
            login: login.into(),
            host: host.into(),
            port,
            auth,
            timeout,
        }
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.login, self.host)
    }

    /// Program and arguments that run `script` on the remote host.
    fn command_line(&self, script: &str) -> (&'static str, Vec<String>) {
        let mut args: Vec<String> = Vec::new();
        let program = match &self.auth {
            SshAuth::Password(_) => {
                args.extend(["-e".into(), "ssh".into()]);
                "sshpass"
            }
            SshAuth::Key(_) => "ssh",
        };

        args.extend([
            "-p".into(),
            self.port.to_string(),
            "-o".into(),
            "StrictHostKeyChecking=accept-new".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.timeout.as_secs().max(1)),
        ]);
        match &self.auth {
            SshAuth::Key(path) => args.extend([
                "-i".into(),
                path.display().to_string(),
                "-o".into(),
                "BatchMode=yes".into(),
            ]),
            SshAuth::Password(_) => args.extend([
                "-o".into(),
                "PubkeyAuthentication=no".into(),
            ]),
        }
        args.push(self.destination());
        args.push(script.to_string());
        (program, args)
    }

    #[tracing::instrument(skip(self, stdin))]
    async fn run(&self, operation: &str, script: &str, stdin: Option<&[u8]>) -> TransportResult<Output> {
        let (program, args) = self.command_line(script);
        debug!("{} on {}: {}", operation, self.destination(), script);

        let mut command = Command::new(program);
        command
            .args(&args)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let SshAuth::Password(password) = &self.auth {
            command.env("SSHPASS", password);
        }

        let io_error = |source: std::io::Error| TransportError::Io {
            operation: format!("{} via {}", operation, program),
            source,
        };

        with_timeout(operation, self.timeout, async {
            let mut child = command.spawn().map_err(io_error)?;
            if let Some(data) = stdin
                && let Some(mut pipe) = child.stdin.take()
            {
                pipe.write_all(data).await.map_err(io_error)?;
                pipe.shutdown().await.map_err(io_error)?;
            }
            child.wait_with_output().await.map_err(io_error)
        })
        .await
    }

    /// Run a primitive whose script may report `path` missing or present.
    async fn run_on_path(
        &self,
        operation: &str,
        path: &str,
        script: &str,
        stdin: Option<&[u8]>,
    ) -> TransportResult<Vec<u8>> {
        let output = self.run(operation, script, stdin).await?;
        check_status(script, Some(path), output)
    }
}

fn check_status(script: &str, path: Option<&str>, output: Output) -> TransportResult<Vec<u8>> {
    match (output.status.code(), path) {
        (Some(0), _) => Ok(output.stdout),
        (Some(EXIT_NOT_FOUND), Some(path)) => Err(TransportError::NotFound(path.to_string())),
        (Some(EXIT_ALREADY_EXISTS), Some(path)) => {
            Err(TransportError::AlreadyExists(path.to_string()))
        }
        _ => Err(TransportError::CommandFailed {
            command: script.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }),
    }
}

fn list_script(path: &str) -> String {
    let p = quote(path);
    format!("[ -d {p} ] || exit {EXIT_NOT_FOUND}; ls -1A -- {p}")
}

fn read_script(path: &str) -> String {
    let p = quote(path);
    format!("[ -f {p} ] || exit {EXIT_NOT_FOUND}; cat -- {p}")
}

fn write_script(path: &str) -> String {
    format!("cat > {}", quote(path))
}

fn remove_file_script(path: &str) -> String {
    let p = quote(path);
    format!("[ -e {p} ] || exit {EXIT_NOT_FOUND}; rm -f -- {p}")
}

fn remove_dir_script(path: &str) -> String {
    format!("rm -rf -- {}", quote(path))
}

/// `set -C` makes `>` fail on an existing file, which gives an atomic
/// create-if-absent on any POSIX shell.
fn create_exclusive_script(path: &str) -> String {
    let p = quote(path);
    format!(
        "(set -C; : > {p}) 2>/dev/null && exit 0; [ -e {p} ] && exit {EXIT_ALREADY_EXISTS}; exit 1"
    )
}

fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Transport for SshTransport {
    async fn list_directory(&self, path: &str) -> TransportResult<Vec<String>> {
        let stdout = self
            .run_on_path("list directory", path, &list_script(path), None)
            .await?;
        Ok(parse_listing(&stdout))
    }

    async fn read_file(&self, path: &str) -> TransportResult<Vec<u8>> {
        self.run_on_path("read file", path, &read_script(path), None)
            .await
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> TransportResult<()> {
        self.run_on_path("write file", path, &write_script(path), Some(contents))
            .await?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> TransportResult<()> {
        self.run_on_path("remove file", path, &remove_file_script(path), None)
            .await?;
        Ok(())
    }

    async fn remove_dir_all(&self, path: &str) -> TransportResult<()> {
        self.run_on_path("remove directory", path, &remove_dir_script(path), None)
            .await?;
        Ok(())
    }

    async fn execute(&self, command: &str) -> TransportResult<Vec<u8>> {
        let output = self.run("execute", command, None).await?;
        check_status(command, None, output)
    }

    async fn create_exclusive(&self, path: &str) -> TransportResult<()> {
        self.run_on_path(
            "create exclusive",
            path,
            &create_exclusive_script(path),
            None,
        )
        .await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.destination(), self.port)
    }
}
