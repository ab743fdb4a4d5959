use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::sync::SyncError;

mod create;
mod services;
mod update;

pub use create::{CreateOptions, create};
pub use services::{build_transport, check_connection};
pub use update::update;

/// Stop between local steps once an interrupt has fired.
fn ensure_not_cancelled(cancel: &CancellationToken, step: &str) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SyncError::Cancelled(step.to_string()).into());
    }
    Ok(())
}
