use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct Pending {
    path: PathBuf,
    task: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;

/// Cancellable handle to one scheduled deletion.
#[derive(Clone)]
pub struct CleanupHandle {
    id: u64,
    pending: PendingMap,
}

impl CleanupHandle {
    /// Cancel the deletion, keeping the file. Returns `false` if it already ran.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().remove(&self.id) {
            Some(entry) => {
                entry.task.abort();
                debug!(path = %entry.path.display(), "Cancelled deferred cleanup");
                true
            }
            None => false,
        }
    }

    /// Whether the deletion is still scheduled.
    pub fn is_pending(&self) -> bool {
        self.pending.lock().contains_key(&self.id)
    }
}

/// Deletes temporary files after a delay.
///
/// Every scheduled deletion is tracked until it runs or is cancelled, and
/// [`shutdown`](Self::shutdown) deletes whatever is still outstanding.
#[derive(Default)]
pub struct DeferredCleanup {
    next_id: AtomicU64,
    pending: PendingMap,
}

impl DeferredCleanup {
    /// A scheduler with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delete `path` once `delay` has elapsed.
    pub fn schedule(&self, path: PathBuf, delay: Duration) -> CleanupHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let mut map = self.pending.lock();
        let task = {
            let pending = pending.clone();
            let path = path.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if pending.lock().remove(&id).is_some() {
                    remove_quietly(&path).await;
                }
            })
        };
        map.insert(id, Pending { path, task });
        CleanupHandle { id, pending }
    }

    /// Number of deletions still scheduled.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Abort every scheduled task and delete its file now.
    pub async fn shutdown(&self) {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        for entry in drained {
            entry.task.abort();
            remove_quietly(&entry.path).await;
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed temporary file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temporary file"),
    }
}
