//! Service factory for the remote side of a command.
//!
//! The transport is built from [`RemoteConfig`] values but is not part of
//! the configuration itself.

use anyhow::Result;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::config::{ConnectionMode, RemoteConfig};
use crate::sync::cancellable;
use crate::transport::{MountTransport, SshAuth, SshTransport, Transport};

/// Build the transport selected by the connection mode.
pub fn build_transport(config: &RemoteConfig) -> Box<dyn Transport> {
    let timeout = config.command_timeout;
    let transport: Box<dyn Transport> = match &config.mode {
        ConnectionMode::Password {
            login,
            host,
            port,
            password,
        } => Box::new(SshTransport::new(
            login,
            host,
            *port,
            SshAuth::Password(password.clone()),
            timeout,
        )),
        ConnectionMode::Key {
            login,
            host,
            port,
            key_path,
        } => Box::new(SshTransport::new(
            login,
            host,
            *port,
            SshAuth::Key(key_path.clone()),
            timeout,
        )),
        ConnectionMode::Local { dir } => Box::new(MountTransport::new(dir.clone(), timeout)),
    };
    debug!("Using transport {}", transport.describe());
    transport
}

/// Run a no-op on the remote side so connection problems surface before
/// any remote state is touched.
pub async fn check_connection(transport: &dyn Transport, cancel: &CancellationToken) -> Result<()> {
    let step = format!("connect to {}", transport.describe());
    cancellable(cancel, &step, transport.execute("true")).await?;
    Ok(())
}
