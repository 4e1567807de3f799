//! Hierarchical `.mcpignore` matching (C1).
//!
//! Every directory between the workspace root and a candidate path may carry
//! its own `.mcpignore` file, gitignore-syntax, evaluated root-to-leaf so a
//! deeper file can re-include something a shallower one excluded. Decisions
//! are cached per path; a cache entry is invalidated only when a `.mcpignore`
//! file on its specific lookup chain changes, via a reverse index from
//! ignore-file path to the decision-cache keys that consulted it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::RagexResult;

const IGNORE_FILE_NAME: &str = ".mcpignore";

/// Directory/file names always excluded, independent of any `.mcpignore`.
/// Kept as a live, queryable set rather than a one-shot `ignore::overrides::Override`.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "coverage",
    ".next",
    ".nuxt",
    "venv",
    ".venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ragex",
];

/// Glob/extension patterns always excluded, independent of any `.mcpignore`.
/// Covers what a directory-name check can't: language caches, build
/// artifacts, editor and OS droppings, logs/databases, temp files, archives
/// and media, and environment files (with `.env.example` carved back out).
const DEFAULT_EXCLUDED_PATTERNS: &[&str] = &[
    ".svn",
    ".hg",
    ".bzr",
    "env",
    ".tox",
    "*.egg-info",
    ".npm",
    ".yarn",
    "*.tsbuildinfo",
    "out",
    ".cache",
    ".parcel-cache",
    ".webpack",
    "CMakeFiles",
    "cmake-build-*",
    "*.o",
    "*.obj",
    "*.a",
    "*.so",
    "*.dylib",
    "*.dll",
    "*.exe",
    ".vscode",
    ".idea",
    "*.swp",
    "*~",
    ".DS_Store",
    "Thumbs.db",
    "*.log",
    "*.sqlite*",
    "*.db",
    "*.tmp",
    "*.bak",
    "*.old",
    "*.zip",
    "*.tar*",
    "*.gz",
    "*.7z",
    "*.rar",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.mp4",
    "*.mov",
    "*.mp3",
    "*.pdf",
    ".env",
    ".env.*",
    "!.env.example",
];

/// Compiles `DEFAULT_EXCLUDED_PATTERNS` into a matcher rooted at `root`. Falls
/// back to an empty matcher if construction somehow fails; default patterns
/// are a convenience, not load-bearing correctness.
fn build_default_patterns_matcher(root: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in DEFAULT_EXCLUDED_PATTERNS {
        let _ = builder.add_line(None, pattern);
    }
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

struct CompiledDir {
    matcher: Gitignore,
    mtime: Option<std::time::SystemTime>,
}

pub struct IgnoreEngine {
    root: PathBuf,
    extra_excluded_dirs: Vec<String>,
    default_patterns: Gitignore,
    compiled: RwLock<HashMap<PathBuf, Arc<CompiledDir>>>,
    decisions: Mutex<HashMap<PathBuf, bool>>,
    /// ignore-file directory -> decision-cache keys whose lookup chain
    /// consulted it. Drives targeted invalidation on `notify_file_changed`.
    reverse_deps: Mutex<HashMap<PathBuf, HashSet<PathBuf>>>,
}

impl IgnoreEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let default_patterns = build_default_patterns_matcher(&root);
        Self {
            root,
            extra_excluded_dirs: Vec::new(),
            default_patterns,
            compiled: RwLock::new(HashMap::new()),
            decisions: Mutex::new(HashMap::new()),
            reverse_deps: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_extra_excluded_dirs(mut self, dirs: Vec<String>) -> Self {
        self.extra_excluded_dirs = dirs;
        self
    }

    /// Returns whether `path` should be excluded from scanning/indexing.
    /// Cheap default-exclusion check (names and patterns) first, then the
    /// hierarchical `.mcpignore` chain.
    pub fn should_ignore(&self, path: &Path) -> bool {
        if self.matches_default_excluded_dir(path) {
            return true;
        }
        let key = match path.strip_prefix(&self.root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        };
        if let Some(decision) = self.decisions.lock().unwrap().get(&key).copied() {
            return decision;
        }
        let (decision, chain) = self.evaluate_chain(path);
        self.decisions.lock().unwrap().insert(key.clone(), decision);
        let mut reverse = self.reverse_deps.lock().unwrap();
        for dir in chain {
            reverse.entry(dir).or_default().insert(key.clone());
        }
        decision
    }

    fn matches_default_excluded_dir(&self, path: &Path) -> bool {
        let by_name = path.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            DEFAULT_EXCLUDED_DIRS.contains(&name.as_ref())
                || self.extra_excluded_dirs.iter().any(|d| d == name.as_ref())
        });
        if by_name {
            return true;
        }
        matches!(
            self.default_patterns.matched(path, path.is_dir()),
            ignore::Match::Ignore(_)
        )
    }

    /// Walks from `path`'s parent directory up to the workspace root,
    /// evaluating each directory's compiled `.mcpignore` (if present) in
    /// root-to-leaf order so deeper rules win. Returns the final decision
    /// and the set of directories whose ignore file was consulted.
    fn evaluate_chain(&self, path: &Path) -> (bool, Vec<PathBuf>) {
        let mut dirs = Vec::new();
        let mut cur = if path.is_dir() {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone())
        };
        loop {
            dirs.push(cur.clone());
            if cur == self.root || !cur.starts_with(&self.root) {
                break;
            }
            match cur.parent() {
                Some(p) => cur = p.to_path_buf(),
                None => break,
            }
        }
        dirs.reverse(); // root first

        let mut decision = false;
        let mut consulted = Vec::new();
        for dir in &dirs {
            if let Some(compiled) = self.compiled_for(dir) {
                consulted.push(dir.clone());
                let is_dir = path.is_dir();
                match compiled.matcher.matched(path, is_dir) {
                    ignore::Match::Ignore(_) => decision = true,
                    ignore::Match::Whitelist(_) => decision = false,
                    ignore::Match::None => {}
                }
            }
        }
        (decision, consulted)
    }

    fn compiled_for(&self, dir: &Path) -> Option<Arc<CompiledDir>> {
        let ignore_path = dir.join(IGNORE_FILE_NAME);
        let mtime = std::fs::metadata(&ignore_path).and_then(|m| m.modified()).ok();
        if mtime.is_none() {
            return None;
        }
        {
            let cache = self.compiled.read().unwrap();
            if let Some(existing) = cache.get(dir) {
                if existing.mtime == mtime {
                    return Some(existing.clone());
                }
            }
        }
        let mut builder = GitignoreBuilder::new(dir);
        if builder.add(&ignore_path).is_some() {
            // add() returns Some(Error) only on read failure; treat as "no rules".
            return None;
        }
        let matcher = builder.build().ok()?;
        let compiled = Arc::new(CompiledDir { matcher, mtime });
        self.compiled.write().unwrap().insert(dir.to_path_buf(), compiled.clone());
        Some(compiled)
    }

    /// Call when a `.mcpignore` file changes on disk (watcher event or
    /// explicit reload request). Drops the compiled matcher for its
    /// directory and invalidates every cached decision whose lookup chain
    /// consulted it — not the whole cache.
    pub fn notify_file_changed(&self, ignore_file_path: &Path) {
        let dir = ignore_file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        self.compiled.write().unwrap().remove(&dir);
        let affected = self.reverse_deps.lock().unwrap().remove(&dir);
        if let Some(keys) = affected {
            let mut decisions = self.decisions.lock().unwrap();
            for key in keys {
                decisions.remove(&key);
            }
        }
    }

    /// Patterns active for a directory, for `status`/debugging output.
    pub fn patterns_for(&self, dir: &Path) -> Vec<String> {
        let ignore_path = dir.join(IGNORE_FILE_NAME);
        std::fs::read_to_string(&ignore_path)
            .map(|text| {
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validates every `.mcpignore` found under the workspace, returning
    /// `(path, error)` pairs for any that fail to parse.
    pub fn validate_all(&self) -> RagexResult<Vec<(PathBuf, String)>> {
        let mut errors = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).hidden(false).build() {
            let Ok(entry) = entry else { continue };
            if entry.file_name() == IGNORE_FILE_NAME {
                let mut builder = GitignoreBuilder::new(
                    entry.path().parent().unwrap_or(&self.root),
                );
                if let Some(err) = builder.add(entry.path()) {
                    errors.push((entry.path().to_path_buf(), err.to_string()));
                }
            }
        }
        Ok(errors)
    }

    pub fn clear_cache(&self) {
        self.decisions.lock().unwrap().clear();
        self.reverse_deps.lock().unwrap().clear();
        self.compiled.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_excluded_dirs_are_always_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        let node_modules = tmp.path().join("node_modules/pkg/index.js");
        assert!(engine.should_ignore(&node_modules));
    }

    #[test]
    fn mcpignore_excludes_matching_paths() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".mcpignore"), "*.generated.ts\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        let target = tmp.path().join("foo.generated.ts");
        assert!(engine.should_ignore(&target));
        let other = tmp.path().join("foo.ts");
        assert!(!engine.should_ignore(&other));
    }

    #[test]
    fn nested_mcpignore_can_re_include() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".mcpignore"), "*.log\n").unwrap();
        fs::create_dir_all(tmp.path().join("keep")).unwrap();
        fs::write(tmp.path().join("keep/.mcpignore"), "!important.log\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        assert!(engine.should_ignore(&tmp.path().join("other.log")));
        assert!(!engine.should_ignore(&tmp.path().join("keep/important.log")));
    }

    #[test]
    fn default_patterns_exclude_build_artifacts_and_editor_files() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        assert!(engine.should_ignore(&tmp.path().join("pkg.egg-info")));
        assert!(engine.should_ignore(&tmp.path().join("tsconfig.tsbuildinfo")));
        assert!(engine.should_ignore(&tmp.path().join("lib.so")));
        assert!(engine.should_ignore(&tmp.path().join("notes.swp")));
        assert!(engine.should_ignore(&tmp.path().join(".DS_Store")));
        assert!(engine.should_ignore(&tmp.path().join("server.log")));
        assert!(engine.should_ignore(&tmp.path().join("archive.tar.gz")));
        assert!(!engine.should_ignore(&tmp.path().join("main.rs")));
    }

    #[test]
    fn env_files_are_excluded_but_env_example_is_carved_back_out() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        assert!(engine.should_ignore(&tmp.path().join(".env")));
        assert!(engine.should_ignore(&tmp.path().join(".env.local")));
        assert!(!engine.should_ignore(&tmp.path().join(".env.example")));
    }

    #[test]
    fn notify_file_changed_invalidates_only_affected_decisions() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(".mcpignore"), "*.log\n").unwrap();
        let engine = IgnoreEngine::new(tmp.path());
        let log_path = tmp.path().join("a.log");
        assert!(engine.should_ignore(&log_path));
        fs::write(tmp.path().join(".mcpignore"), "*.txt\n").unwrap();
        engine.notify_file_changed(&tmp.path().join(".mcpignore"));
        assert!(!engine.should_ignore(&log_path));
    }
}
