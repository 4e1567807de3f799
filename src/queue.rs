//! Debounced change queue (C7). Collects file add/remove events and fires a
//! single batched indexing pass after `debounce_seconds` of quiet.
//!
//! Collapsing rules mirror the original queue: a file marked for removal
//! that gets re-added is simply un-removed (no removal ever reaches the
//! callback for it); a file pending addition that gets removed is dropped
//! from the pending set rather than ever being added.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;

#[derive(Default)]
struct Pending {
    added: HashSet<PathBuf>,
    removed: HashSet<PathBuf>,
    indexing: bool,
}

pub struct ChangeQueue {
    debounce: Duration,
    pending: Arc<Mutex<Pending>>,
    /// Bumped on every change; a debounce timer that wakes up and finds the
    /// generation has moved on knows it was superseded and exits quietly.
    generation: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub pending_additions: usize,
    pub pending_removals: usize,
    pub is_indexing: bool,
}

impl ChangeQueue {
    pub fn new(debounce_seconds: u64) -> Self {
        Self {
            debounce: Duration::from_secs(debounce_seconds),
            pending: Arc::new(Mutex::new(Pending::default())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queues a created/modified file, then (re)starts the debounce timer.
    /// `on_fire` runs once per debounce window, receiving the drained
    /// `(added, removed)` sets; it is not invoked if the queue is empty or
    /// an indexing pass from a previous window is still running.
    pub async fn add_file<F, Fut>(&self, path: PathBuf, on_fire: F)
    where
        F: Fn(Vec<PathBuf>, Vec<PathBuf>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        {
            let mut pending = self.pending.lock().await;
            if !pending.removed.remove(&path) {
                pending.added.insert(path);
            }
        }
        self.reset_timer(on_fire);
    }

    /// Queues a deleted file, then (re)starts the debounce timer.
    pub async fn remove_file<F, Fut>(&self, path: PathBuf, on_fire: F)
    where
        F: Fn(Vec<PathBuf>, Vec<PathBuf>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        {
            let mut pending = self.pending.lock().await;
            if !pending.added.remove(&path) {
                pending.removed.insert(path);
            }
        }
        self.reset_timer(on_fire);
    }

    fn reset_timer<F, Fut>(&self, on_fire: F)
    where
        F: Fn(Vec<PathBuf>, Vec<PathBuf>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation = self.generation.clone();
        let pending = self.pending.clone();
        let debounce = self.debounce;

        tokio::spawn(async move {
            sleep(debounce).await;
            if generation.load(Ordering::SeqCst) != my_generation {
                return; // superseded by a later change
            }

            let (added, removed) = {
                let mut p = pending.lock().await;
                if (p.added.is_empty() && p.removed.is_empty()) || p.indexing {
                    return;
                }
                p.indexing = true;
                (p.added.drain().collect::<Vec<_>>(), p.removed.drain().collect::<Vec<_>>())
            };

            on_fire(added, removed).await;

            let mut p = pending.lock().await;
            p.indexing = false;
        });
    }

    pub async fn status(&self) -> QueueStatus {
        let p = self.pending.lock().await;
        QueueStatus {
            pending_additions: p.added.len(),
            pending_removals: p.removed.len(),
            is_indexing: p.indexing,
        }
    }

    /// Cancels any in-flight debounce timer by bumping the generation past
    /// whatever a pending timer is waiting on, so shutdown doesn't race an
    /// index pass starting after the socket is already gone.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn add_then_remove_before_fire_drops_the_file_entirely() {
        let queue = ChangeQueue::new(1);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        queue
            .add_file(PathBuf::from("a.py"), move |_added, _removed| {
                let fired2 = fired2.clone();
                async move {
                    fired2.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        queue.remove_file(PathBuf::from("a.py"), |_, _| async {}).await;

        let status = queue.status().await;
        assert_eq!(status.pending_additions, 0);
        assert_eq!(status.pending_removals, 0);
    }

    #[tokio::test]
    async fn reports_pending_counts_before_debounce_fires() {
        let queue = ChangeQueue::new(60);
        queue.add_file(PathBuf::from("a.py"), |_, _| async {}).await;
        queue.add_file(PathBuf::from("b.py"), |_, _| async {}).await;
        let status = queue.status().await;
        assert_eq!(status.pending_additions, 2);
    }

    #[tokio::test]
    async fn fires_after_debounce_with_collected_paths() {
        let queue = ChangeQueue::new(0);
        let result: Arc<Mutex<Option<(Vec<PathBuf>, Vec<PathBuf>)>>> = Arc::new(Mutex::new(None));
        let result2 = result.clone();

        queue
            .add_file(PathBuf::from("a.py"), move |added, removed| {
                let result2 = result2.clone();
                async move {
                    *result2.lock().await = Some((added, removed));
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let got = result.lock().await;
        assert!(got.is_some());
        assert_eq!(got.as_ref().unwrap().0, vec![PathBuf::from("a.py")]);
    }
}
