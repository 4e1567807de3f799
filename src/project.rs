//! Project identity and the per-project persistent data layout.
//!
//! `project_id` is derived the same way as the original `ragex_core.project_utils`:
//! `"ragex_" + user_id + "_" + sha256(f"{user_id}:{abs_path}").hexdigest()[:16]`.
//! This is stable across restarts and unique per (user, absolute workspace path).

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RagexError, RagexResult};

/// Compute `project_id` for a (user, absolute workspace path) pair.
pub fn project_id(user_id: &str, abs_workspace_path: &Path) -> String {
    let path_str = abs_workspace_path.to_string_lossy();
    let mut hasher = Sha256::new();
    hasher.update(format!("{user_id}:{path_str}").as_bytes());
    let digest = hasher.finalize();
    let hex = hex16(&digest);
    format!("ragex_{user_id}_{hex}")
}

/// First 16 hex characters of a digest (8 bytes), matching the Python
/// implementation's `hexdigest()[:16]` truncation.
fn hex16(digest: &[u8]) -> String {
    let mut s = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        s.push_str(&format!("{byte:02x}"));
    }
    s
}

/// Resolves the user id used for project isolation: the numeric OS uid,
/// matching the original launcher's `os.getuid()`, honoring `DOCKER_USER_ID`
/// as an override for containerized deployments where the in-container uid
/// doesn't match the host uid.
pub fn current_user_id() -> String {
    if let Ok(v) = std::env::var("DOCKER_USER_ID") {
        if !v.trim().is_empty() {
            return v;
        }
    }
    #[cfg(unix)]
    {
        // SAFETY: getuid(2) takes no arguments and cannot fail.
        unsafe { libc::getuid() }.to_string()
    }
    #[cfg(not(unix))]
    {
        "0".to_string()
    }
}

/// Required host path of the workspace root. The core refuses to operate
/// without it so that every persisted path shares one namespace (see
/// SPEC_FULL.md §4.2 path-mapping note).
pub fn required_workspace_path() -> RagexResult<PathBuf> {
    let raw = std::env::var("WORKSPACE_PATH").map_err(|_| {
        RagexError::configuration_mismatch(
            "WORKSPACE_PATH is not set. Re-run with WORKSPACE_PATH=<absolute host path to your \
             project> set in the environment.",
        )
    })?;
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(RagexError::configuration_mismatch(format!(
            "WORKSPACE_PATH must be an absolute path, got {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Root directory under which every project's persistent state lives.
/// Defaults to the platform data directory; overridable for tests and for
/// multi-tenant deployments via `RAGEX_DATA_ROOT`.
pub fn data_root() -> PathBuf {
    if let Ok(v) = std::env::var("RAGEX_DATA_ROOT") {
        if !v.trim().is_empty() {
            return PathBuf::from(v);
        }
    }
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ragex")
}

pub struct ProjectPaths {
    pub project_id: String,
    pub root: PathBuf,
}

impl ProjectPaths {
    pub fn new(project_id: String) -> Self {
        let root = data_root().join("projects").join(&project_id);
        Self { project_id, root }
    }

    pub fn project_info_path(&self) -> PathBuf {
        self.root.join("project_info.json")
    }

    pub fn vector_store_dir(&self) -> PathBuf {
        self.root.join("chroma_db")
    }

    pub fn socket_path(&self) -> PathBuf {
        // Per-project socket, distinct from the single default /tmp/ragex.sock
        // so multiple daemons for different projects can coexist on one host.
        std::env::temp_dir().join(format!("{}.sock", self.project_id))
    }

    pub fn ensure_dirs(&self) -> RagexResult<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.vector_store_dir())?;
        Ok(())
    }
}

/// `{project_id, workspace_path, project_name, embedding_model_name,
/// embedding_dimensions, created_at, last_indexed_at, files_indexed}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub project_id: String,
    pub workspace_path: String,
    pub project_name: String,
    pub embedding_model_name: String,
    pub embedding_dimensions: usize,
    pub created_at: u64,
    pub last_indexed_at: Option<u64>,
    pub files_indexed: usize,
}

impl ProjectMetadata {
    pub fn new(
        project_id: String,
        workspace_path: &Path,
        embedding_model_name: String,
        embedding_dimensions: usize,
    ) -> Self {
        let project_name = workspace_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| workspace_path.to_string_lossy().to_string());
        Self {
            project_id,
            workspace_path: workspace_path.to_string_lossy().to_string(),
            project_name,
            embedding_model_name,
            embedding_dimensions,
            created_at: now_unix(),
            last_indexed_at: None,
            files_indexed: 0,
        }
    }

    pub fn load(path: &Path) -> RagexResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        let meta = serde_json::from_str(&text)?;
        Ok(Some(meta))
    }

    /// Writes atomically: write to a sibling temp file, then rename. Prevents
    /// a reader from ever observing a half-written `project_info.json`.
    pub fn save(&self, path: &Path) -> RagexResult<()> {
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn mark_indexed(&mut self, files_indexed: usize) {
        self.last_indexed_at = Some(now_unix());
        self.files_indexed = files_indexed;
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_id_is_stable_and_path_sensitive() {
        let a = project_id("1000", Path::new("/home/dev/repo-a"));
        let b = project_id("1000", Path::new("/home/dev/repo-a"));
        let c = project_id("1000", Path::new("/home/dev/repo-b"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("ragex_1000_"));
        // "ragex_" + uid + "_" + 16 hex chars
        let hash_part = a.rsplit('_').next().unwrap();
        assert_eq!(hash_part.len(), 16);
        assert!(hash_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_id_is_user_sensitive() {
        let a = project_id("1000", Path::new("/home/dev/repo"));
        let b = project_id("1001", Path::new("/home/dev/repo"));
        assert_ne!(a, b);
    }
}
