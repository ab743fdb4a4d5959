use log::debug;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Tracks local paths to remove and remote work to cancel on interruption.
pub struct CleanupContext {
    paths: Vec<PathBuf>,
    cancel: CancellationToken,
}

impl CleanupContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            paths: Vec::new(),
            cancel,
        }
    }

    /// Add a path to be cleaned up on interruption
    pub fn add(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    /// Remove a path from cleanup list (e.g., when operation succeeds)
    pub fn remove(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
    }

    /// Cancel in-flight remote steps and remove all registered paths.
    ///
    /// Remote steps observe the token and release their locks themselves.
    pub fn cleanup(&self) {
        self.cancel.cancel();
        for path in &self.paths {
            debug!("Cleaning up: {:?}", path);
            if path.is_dir() {
                let _ = std::fs::remove_dir_all(path);
            } else {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

/// Type alias for shared cleanup context
pub type SharedCleanupContext = Arc<Mutex<CleanupContext>>;

/// Create a new shared cleanup context
pub fn new_shared(cancel: CancellationToken) -> SharedCleanupContext {
    Arc::new(Mutex::new(CleanupContext::new(cancel)))
}

fn lock(ctx: &SharedCleanupContext) -> MutexGuard<'_, CleanupContext> {
    ctx.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run [`CleanupContext::cleanup`] on Ctrl-C.
///
/// The process keeps running: the guarded operation sees the cancelled
/// token, releases what it holds remotely and returns
/// [`SyncError::Cancelled`](crate::sync::SyncError::Cancelled). Abort the
/// returned handle once the operation has finished.
pub fn spawn_interrupt_handler(ctx: SharedCleanupContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cleaning up...");
            lock(&ctx).cleanup();
        }
    })
}

/// RAII guard that keeps a path registered until the operation succeeds
pub struct CleanupGuard {
    ctx: SharedCleanupContext,
    path: PathBuf,
}

impl CleanupGuard {
    /// Create a new cleanup guard and register the path
    pub fn new(ctx: SharedCleanupContext, path: PathBuf) -> Self {
        lock(&ctx).add(path.clone());
        Self { ctx, path }
    }

    /// Mark the operation as successful, removing the path from cleanup
    pub fn success(self) {
        lock(&self.ctx).remove(&self.path);
    }
}
