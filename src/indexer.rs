//! Indexer (C6): drives symbol extraction and embedding from checksum diffs,
//! keeping the vector store in sync with the workspace.
//!
//! Four-phase refresh: stat sweep → delta detection → parallel read+hash →
//! embed+upsert, working against per-symbol sha256 records. `delete_by_file`
//! always precedes a file's new inserts — the ordering invariant the store
//! itself enforces inside `replace_file`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::checksum::{self, CachedStat, ChecksumDiff};
use crate::config::ParallelConfig;
use crate::embedder::{build_context, Embedder};
use crate::error::RagexResult;
use crate::ignore_engine::IgnoreEngine;
use crate::symbol::{self, Symbol};
use crate::vector_store::{VectorRecord, VectorStore};

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexStats {
    pub files_added: usize,
    pub files_modified: usize,
    pub files_removed: usize,
    pub symbols_indexed: usize,
    pub files_failed: usize,
}

pub type ProgressCallback<'a> = dyn FnMut(&Path) + Send + 'a;

/// The outcome of `decide`: what kind of pass `cmd_index` should run.
pub enum IndexPlan {
    Full,
    Incremental(ChecksumDiff),
    NoOp,
}

/// Serializes indexing so a second `full_index`/`incremental_update` call
/// while one is running returns `Busy` instead of racing the vector store.
pub struct Indexer {
    lock: Mutex<()>,
    parallel: ParallelConfig,
    /// `(size, mtime) -> checksum` from the last scan, reused by `decide`
    /// and `incremental_update` to skip re-hashing unchanged files.
    stat_cache: Mutex<HashMap<PathBuf, (CachedStat, String)>>,
}

impl Indexer {
    pub fn new(parallel: ParallelConfig) -> Self {
        Self { lock: Mutex::new(()), parallel, stat_cache: Mutex::new(HashMap::new()) }
    }

    pub fn try_lock(&self) -> RagexResult<std::sync::MutexGuard<'_, ()>> {
        self.lock.try_lock().map_err(|_| crate::error::RagexError::Busy)
    }

    fn scan_with_cache(&self, root: &Path, ignore: &IgnoreEngine) -> RagexResult<HashMap<PathBuf, String>> {
        let cache = self.stat_cache.lock().unwrap().clone();
        let (current, next_cache) = checksum::scan_with_cache(root, ignore, &cache)?;
        *self.stat_cache.lock().unwrap() = next_cache;
        Ok(current)
    }

    /// Chooses between a full rebuild, an incremental pass, or a no-op: no
    /// existing collection or an explicit `force` means full; otherwise
    /// diff the workspace against the store's recorded checksums per §4.6.
    pub fn decide(&self, root: &Path, ignore: &IgnoreEngine, store: &VectorStore, force: bool) -> RagexResult<IndexPlan> {
        if force || store.file_checksums().is_empty() {
            return Ok(IndexPlan::Full);
        }
        let current = self.scan_with_cache(root, ignore)?;
        let stored: HashMap<PathBuf, String> =
            store.file_checksums().into_iter().map(|(file, sum)| (PathBuf::from(file), sum)).collect();
        let diff = checksum::diff(&current, &stored);
        if diff.added.is_empty() && diff.removed.is_empty() && diff.modified.is_empty() {
            Ok(IndexPlan::NoOp)
        } else {
            Ok(IndexPlan::Incremental(diff))
        }
    }

    /// Re-extracts and re-embeds every non-ignored file, replacing the
    /// store's contents entirely. Used by `index --force`.
    pub fn full_index(
        &self,
        root: &Path,
        ignore: &IgnoreEngine,
        store: &mut VectorStore,
        embedder: &dyn Embedder,
        mut on_progress: Box<ProgressCallback>,
    ) -> RagexResult<IndexStats> {
        let _guard = self.try_lock()?;
        store.reset()?;
        let current = checksum::scan(root, ignore)?;
        let mut stats = IndexStats::default();
        for path in current.keys() {
            on_progress(path);
            match self.index_one_file(path, store, embedder) {
                Ok(count) => {
                    stats.files_added += 1;
                    stats.symbols_indexed += count;
                }
                Err(e) => {
                    stats.files_failed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "failed to index file");
                }
            }
        }
        Ok(stats)
    }

    /// Diffs the workspace against the store's recorded checksums and
    /// touches only what changed. Used for startup catch-up and by the
    /// watcher's debounced callback (C7).
    pub fn incremental_update(
        &self,
        root: &Path,
        ignore: &IgnoreEngine,
        store: &mut VectorStore,
        embedder: &dyn Embedder,
        mut on_progress: Box<ProgressCallback>,
    ) -> RagexResult<IndexStats> {
        let _guard = self.try_lock()?;
        let current = self.scan_with_cache(root, ignore)?;
        let stored: std::collections::HashMap<PathBuf, String> = store
            .file_checksums()
            .into_iter()
            .map(|(file, sum)| (PathBuf::from(file), sum))
            .collect();
        let diff = checksum::diff(&current, &stored);
        self.apply_diff(&diff, store, embedder, &mut on_progress)
    }

    /// Applies a pre-computed diff — the watcher already knows which paths
    /// changed from its own event queue, so it skips re-scanning the tree.
    pub fn apply_diff(
        &self,
        diff: &ChecksumDiff,
        store: &mut VectorStore,
        embedder: &dyn Embedder,
        on_progress: &mut ProgressCallback,
    ) -> RagexResult<IndexStats> {
        let mut stats = IndexStats::default();

        for path in &diff.removed {
            on_progress(path);
            store.delete_by_file(&path.to_string_lossy())?;
            stats.files_removed += 1;
        }

        let touched: Vec<&PathBuf> = diff.added.iter().chain(diff.modified.iter()).collect();
        let extracted: Vec<(PathBuf, RagexResult<Vec<Symbol>>)> = if self.parallel.use_parallel {
            touched.par_iter().map(|p| ((*p).clone(), symbol::extract(p, true))).collect()
        } else {
            touched.iter().map(|p| ((*p).clone(), symbol::extract(p, true))).collect()
        };

        for (path, result) in extracted {
            on_progress(&path);
            match result {
                Ok(symbols) => {
                    let records = self.embed_symbols(&symbols, embedder)?;
                    store.replace_file(&path.to_string_lossy(), records)?;
                    stats.symbols_indexed += symbols.len();
                    if diff.added.contains(&path) {
                        stats.files_added += 1;
                    } else {
                        stats.files_modified += 1;
                    }
                }
                Err(e) => {
                    stats.files_failed += 1;
                    tracing::warn!(path = %path.display(), error = %e, "failed to extract symbols");
                }
            }
        }

        Ok(stats)
    }

    fn index_one_file(&self, path: &Path, store: &mut VectorStore, embedder: &dyn Embedder) -> RagexResult<usize> {
        let symbols = symbol::extract(path, true)?;
        let count = symbols.len();
        let records = self.embed_symbols(&symbols, embedder)?;
        store.replace_file(&path.to_string_lossy(), records)?;
        Ok(count)
    }

    fn embed_symbols(&self, symbols: &[Symbol], embedder: &dyn Embedder) -> RagexResult<Vec<VectorRecord>> {
        if symbols.is_empty() {
            return Ok(vec![]);
        }
        let contexts: Vec<String> = symbols.iter().map(build_context).collect();
        let vectors = embedder.embed_batch(&contexts)?;
        Ok(symbols
            .iter()
            .zip(vectors)
            .map(|(symbol, vector)| VectorRecord::from_symbol(symbol, vector))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPreset;

    struct FakeEmbedder {
        dims: usize,
    }

    impl Embedder for FakeEmbedder {
        fn dimensions(&self) -> usize {
            self.dims
        }
        fn model_name(&self) -> &str {
            "fake"
        }
        fn embed_text(&self, _text: &str) -> RagexResult<Vec<f32>> {
            Ok(vec![1.0; self.dims])
        }
        fn embed_batch(&self, texts: &[String]) -> RagexResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    #[test]
    fn full_index_populates_store_from_scratch() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def authenticate_user():\n    pass\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let ignore = IgnoreEngine::new(workspace.path());
        let mut store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        let embedder = FakeEmbedder { dims: 4 };
        let indexer = Indexer::new(ParallelConfig { use_parallel: false, ..Default::default() });

        let stats = indexer.full_index(workspace.path(), &ignore, &mut store, &embedder, Box::new(|_| {})).unwrap();
        assert_eq!(stats.files_added, 1);
        assert!(stats.symbols_indexed >= 1);
        assert_eq!(store.statistics().total_symbols, stats.symbols_indexed);
    }

    #[test]
    fn incremental_update_is_noop_when_nothing_changed() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();

        let ignore = IgnoreEngine::new(workspace.path());
        let mut store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        let embedder = FakeEmbedder { dims: 4 };
        let indexer = Indexer::new(ParallelConfig { use_parallel: false, ..Default::default() });

        indexer.full_index(workspace.path(), &ignore, &mut store, &embedder, Box::new(|_| {})).unwrap();
        let before = store.statistics().total_symbols;
        let stats = indexer.incremental_update(workspace.path(), &ignore, &mut store, &embedder, Box::new(|_| {})).unwrap();
        assert_eq!(stats.files_added, 0);
        assert_eq!(stats.files_modified, 0);
        assert_eq!(store.statistics().total_symbols, before);
    }

    #[test]
    fn decide_picks_full_when_store_is_empty() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let ignore = IgnoreEngine::new(workspace.path());
        let store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        let indexer = Indexer::new(ParallelConfig { use_parallel: false, ..Default::default() });

        match indexer.decide(workspace.path(), &ignore, &store, false).unwrap() {
            IndexPlan::Full => {}
            _ => panic!("expected a full index plan for an empty store"),
        }
    }

    #[test]
    fn decide_picks_noop_when_nothing_changed_since_full_index() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let ignore = IgnoreEngine::new(workspace.path());
        let mut store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        let embedder = FakeEmbedder { dims: 4 };
        let indexer = Indexer::new(ParallelConfig { use_parallel: false, ..Default::default() });
        indexer.full_index(workspace.path(), &ignore, &mut store, &embedder, Box::new(|_| {})).unwrap();

        match indexer.decide(workspace.path(), &ignore, &store, false).unwrap() {
            IndexPlan::NoOp => {}
            _ => panic!("expected a no-op plan when nothing changed"),
        }
    }

    #[test]
    fn decide_picks_incremental_when_a_file_changed() {
        let workspace = tempfile::tempdir().unwrap();
        std::fs::write(workspace.path().join("a.py"), "def f():\n    pass\n").unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let ignore = IgnoreEngine::new(workspace.path());
        let mut store = VectorStore::open(store_dir.path(), "fake", 4, "code", Default::default()).unwrap();
        let embedder = FakeEmbedder { dims: 4 };
        let indexer = Indexer::new(ParallelConfig { use_parallel: false, ..Default::default() });
        indexer.full_index(workspace.path(), &ignore, &mut store, &embedder, Box::new(|_| {})).unwrap();
        std::fs::write(workspace.path().join("b.py"), "def g():\n    pass\n").unwrap();

        match indexer.decide(workspace.path(), &ignore, &store, false).unwrap() {
            IndexPlan::Incremental(diff) => assert_eq!(diff.added.len(), 1),
            _ => panic!("expected an incremental plan when a file was added"),
        }
    }

    #[test]
    fn concurrent_index_attempt_returns_busy() {
        let indexer = Indexer::new(ParallelConfig::default());
        let _held = indexer.try_lock().unwrap();
        assert!(indexer.try_lock().is_err());
    }

    #[test]
    fn preset_dims_used_for_fake_embedder_smoke() {
        let preset = ModelPreset { model_name: "fast".into(), dimensions: 4, max_seq_length: 512, batch_size: 1 };
        let embedder = FakeEmbedder { dims: preset.dimensions };
        assert_eq!(embedder.embed_text("x").unwrap().len(), 4);
    }
}
