//! Content-hash–driven change detection (C2).
//!
//! Walks the workspace (honoring C1 ignore decisions), computes a streamed
//! SHA-256 per file, and diffs against a previously stored checksum map to
//! decide what an incremental re-index needs to touch.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::RagexResult;
use crate::ignore_engine::IgnoreEngine;

const CHUNK_SIZE: usize = 8192;
/// `(size, mtime)` cached tuples within this tolerance are treated as
/// unchanged without re-reading the file.
const MTIME_TOLERANCE: std::time::Duration = std::time::Duration::from_millis(100);

/// Streamed SHA-256 of a single file's contents.
pub fn checksum_file(path: &Path) -> RagexResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy)]
pub struct CachedStat {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Decide whether a cached checksum can be reused based on `(size, mtime)`
/// agreeing with the cached tuple, avoiding a full re-read.
pub fn fast_path_unchanged(path: &Path, cached: &CachedStat) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if meta.len() != cached.size {
        return false;
    }
    match meta.modified() {
        Ok(mtime) => {
            let diff = mtime
                .duration_since(cached.mtime)
                .or_else(|_| cached.mtime.duration_since(mtime))
                .unwrap_or(std::time::Duration::MAX);
            diff <= MTIME_TOLERANCE
        }
        Err(_) => false,
    }
}

/// Scans the workspace, returning `{absolute path: checksum}` for every
/// non-ignored file. `WORKSPACE_PATH` normalization is the caller's concern
/// (see `project::required_workspace_path`); this operates on whatever root
/// it's given. Hashes every file; callers doing repeated scans of the same
/// tree want `scan_with_cache` instead.
pub fn scan(root: &Path, ignore: &IgnoreEngine) -> RagexResult<HashMap<PathBuf, String>> {
    let (results, _cache) = scan_with_cache(root, ignore, &HashMap::new())?;
    Ok(results)
}

/// Like `scan`, but skips re-hashing files whose `(size, mtime)` still
/// matches `cache`'s recorded tuple — the fast path for the watcher's
/// repeated incremental passes over an otherwise-unchanged tree. Returns
/// the refreshed cache alongside the checksum map so the caller can carry
/// it into the next call.
pub fn scan_with_cache(
    root: &Path,
    ignore: &IgnoreEngine,
    cache: &HashMap<PathBuf, (CachedStat, String)>,
) -> RagexResult<(HashMap<PathBuf, String>, HashMap<PathBuf, (CachedStat, String)>)> {
    let mut results = HashMap::new();
    let mut next_cache = HashMap::new();
    for entry in ignore::WalkBuilder::new(root).hidden(false).build() {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        let path = entry.path();
        if ignore.should_ignore(path) {
            continue;
        }

        let stat = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok().map(|mtime| CachedStat { size: m.len(), mtime }));

        if let Some(stat) = stat {
            if let Some((cached_stat, cached_sum)) = cache.get(path) {
                if fast_path_unchanged(path, cached_stat) {
                    results.insert(path.to_path_buf(), cached_sum.clone());
                    next_cache.insert(path.to_path_buf(), (stat, cached_sum.clone()));
                    continue;
                }
            }
        }

        match checksum_file(path) {
            Ok(sum) => {
                if let Some(stat) = stat {
                    next_cache.insert(path.to_path_buf(), (stat, sum.clone()));
                }
                results.insert(path.to_path_buf(), sum);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file during checksum scan");
            }
        }
    }
    Ok((results, next_cache))
}

pub struct ChecksumDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

/// Diffs a freshly scanned checksum map against a previously stored one.
pub fn diff(current: &HashMap<PathBuf, String>, stored: &HashMap<PathBuf, String>) -> ChecksumDiff {
    let mut added = Vec::new();
    let mut modified = Vec::new();
    for (path, sum) in current {
        match stored.get(path) {
            None => added.push(path.clone()),
            Some(old_sum) if old_sum != sum => modified.push(path.clone()),
            Some(_) => {}
        }
    }
    let removed = stored
        .keys()
        .filter(|p| !current.contains_key(*p))
        .cloned()
        .collect();
    ChecksumDiff { added, removed, modified }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn checksum_is_stable_for_identical_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.py");
        fs::write(&path, b"def f(): pass\n").unwrap();
        let a = checksum_file(&path).unwrap();
        let b = checksum_file(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn checksum_changes_with_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.py");
        fs::write(&path, b"def f(): pass\n").unwrap();
        let a = checksum_file(&path).unwrap();
        fs::write(&path, b"def f(): return 1\n").unwrap();
        let b = checksum_file(&path).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn diff_classifies_added_removed_modified() {
        let mut stored = HashMap::new();
        stored.insert(PathBuf::from("a.py"), "aaa".to_string());
        stored.insert(PathBuf::from("b.py"), "bbb".to_string());

        let mut current = HashMap::new();
        current.insert(PathBuf::from("a.py"), "aaa".to_string()); // unchanged
        current.insert(PathBuf::from("b.py"), "bbb2".to_string()); // modified
        current.insert(PathBuf::from("c.py"), "ccc".to_string()); // added

        let d = diff(&current, &stored);
        assert_eq!(d.added, vec![PathBuf::from("c.py")]);
        assert_eq!(d.modified, vec![PathBuf::from("b.py")]);
        assert!(d.removed.is_empty());
    }

    #[test]
    fn scan_with_cache_reuses_checksum_when_stat_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.py");
        fs::write(&path, b"def f(): pass\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());

        let (first, cache) = scan_with_cache(tmp.path(), &engine, &HashMap::new()).unwrap();
        let (second, _) = scan_with_cache(tmp.path(), &engine, &cache).unwrap();
        assert_eq!(first.get(&path), second.get(&path));
    }

    #[test]
    fn scan_with_cache_rehashes_when_content_changes_but_stat_looks_stale() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.py");
        fs::write(&path, b"def f(): pass\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        let (_, cache) = scan_with_cache(tmp.path(), &engine, &HashMap::new()).unwrap();

        let mut stale_cache = cache.clone();
        for (_, sum) in stale_cache.values_mut() {
            *sum = "stale".to_string();
        }
        // A cache entry with a mismatched (size, mtime) is not reused even
        // though the content would otherwise be found identical.
        fs::write(&path, b"def f(): return 2\n").unwrap();
        let (current, _) = scan_with_cache(tmp.path(), &engine, &stale_cache).unwrap();
        assert_ne!(current.get(&path), Some(&"stale".to_string()));
    }

    #[test]
    fn scan_honors_ignore_engine() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("keep.py"), b"x = 1\n").unwrap();
        fs::write(tmp.path().join("skip.log"), b"noise\n").unwrap();
        fs::write(tmp.path().join(".mcpignore"), "*.log\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        let result = scan(tmp.path(), &engine).unwrap();
        assert!(result.keys().any(|p| p.ends_with("keep.py")));
        assert!(!result.keys().any(|p| p.ends_with("skip.log")));
    }
}
