//! Recursive filesystem watcher (C7 producer). Bridges `notify`'s sync
//! callback thread into a tokio task that filters events by extension
//! whitelist and C1 ignore decisions before feeding the change queue.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{RagexError, RagexResult};
use crate::ignore_engine::IgnoreEngine;
use crate::queue::ChangeQueue;

/// Boxed future returned by the watcher's fire callback — avoids pulling in
/// the full `futures` crate for one type alias.
pub type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct FileWatcher {
    // Held only to keep the OS watch alive for the process lifetime.
    _inner: RecommendedWatcher,
}

impl FileWatcher {
    /// Starts watching `root` recursively. Returns immediately; events are
    /// dispatched on `handle_events`'s spawned task until `FileWatcher` is
    /// dropped or `notify` itself errors out.
    pub fn start(
        root: &Path,
        extensions: Vec<String>,
        ignore: Arc<IgnoreEngine>,
        queue: Arc<ChangeQueue>,
        on_fire: impl Fn(Vec<PathBuf>, Vec<PathBuf>) -> FireFuture + Send + Sync + Clone + 'static,
    ) -> RagexResult<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>(256);

        let mut watcher = notify::recommended_watcher(move |res| {
            // Runs on notify's own thread; never blocks on an async runtime.
            let _ = tx.blocking_send(res);
        })
        .map_err(|e| RagexError::internal(format!("failed to start file watcher: {e}")))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|e| RagexError::internal(format!("failed to watch {}: {e}", root.display())))?;

        let extensions: std::collections::HashSet<String> = extensions.into_iter().collect();
        tokio::spawn(dispatch_events(rx, extensions, ignore, queue, on_fire));

        Ok(Self { _inner: watcher })
    }
}

async fn dispatch_events(
    mut rx: mpsc::Receiver<notify::Result<Event>>,
    extensions: std::collections::HashSet<String>,
    ignore: Arc<IgnoreEngine>,
    queue: Arc<ChangeQueue>,
    on_fire: impl Fn(Vec<PathBuf>, Vec<PathBuf>) -> FireFuture + Send + Sync + Clone + 'static,
) {
    while let Some(res) = rx.recv().await {
        let Ok(event) = res else { continue };
        for path in event.paths {
            if !should_process(&path, &extensions, &ignore) {
                continue;
            }
            let fire = on_fire.clone();
            match event.kind {
                EventKind::Remove(_) => {
                    queue.remove_file(path, move |a, r| fire(a, r)).await;
                }
                EventKind::Create(_) | EventKind::Modify(_) => {
                    queue.add_file(path, move |a, r| fire(a, r)).await;
                }
                _ => {}
            }
        }
    }
}

fn should_process(path: &Path, extensions: &std::collections::HashSet<String>, ignore: &IgnoreEngine) -> bool {
    if path.is_dir() {
        return false;
    }
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    if !extensions.contains(&ext.to_ascii_lowercase()) {
        return false;
    }
    !ignore.should_ignore(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn should_process_rejects_unwatched_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "x").unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let mut extensions = HashSet::new();
        extensions.insert("py".to_string());
        assert!(!should_process(&dir.path().join("a.md"), &extensions, &ignore));
    }

    #[test]
    fn should_process_accepts_watched_extension_outside_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x").unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let mut extensions = HashSet::new();
        extensions.insert("py".to_string());
        assert!(should_process(&dir.path().join("a.py"), &extensions, &ignore));
    }

    #[test]
    fn should_process_rejects_default_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/a.js"), "x").unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let mut extensions = HashSet::new();
        extensions.insert("js".to_string());
        assert!(!should_process(&dir.path().join("node_modules/a.js"), &extensions, &ignore));
    }
}
