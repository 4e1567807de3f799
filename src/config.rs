//! Layered configuration: compiled defaults → `.ragex.json` → environment
//! variables, each layer overriding the previous field-by-field.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A named embedding preset fixing `{model_name, dimensions, max_seq_length,
/// batch_size}`. Model ids are Model2Vec-compatible static-embedding repos
/// (no ONNX runtime, no network calls once cached).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelPreset {
    pub model_name: String,
    pub dimensions: usize,
    pub max_seq_length: usize,
    pub batch_size: usize,
}

/// Resolve a preset name to its `ModelPreset`, or `None` if `name` isn't one
/// of the built-ins (callers then treat it as a literal HuggingFace repo id
/// with the `fast` preset's dimensions as a best-effort default).
pub fn resolve_preset(name: &str) -> Option<ModelPreset> {
    match name {
        "fast" => Some(ModelPreset {
            model_name: "minishlab/potion-base-8M".to_string(),
            dimensions: 256,
            max_seq_length: 512,
            batch_size: 64,
        }),
        "balanced" => Some(ModelPreset {
            model_name: "minishlab/potion-retrieval-32M".to_string(),
            dimensions: 512,
            max_seq_length: 512,
            batch_size: 32,
        }),
        "accurate" => Some(ModelPreset {
            model_name: "minishlab/potion-base-32M".to_string(),
            dimensions: 512,
            max_seq_length: 1024,
            batch_size: 16,
        }),
        _ => None,
    }
}

pub const DEFAULT_PRESET: &str = "fast";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswConfig {
    pub construction_ef: u32,
    pub search_ef: u32,
    pub m: u32,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            construction_ef: 100,
            search_ef: 50,
            m: 16,
        }
    }
}

impl HnswConfig {
    pub fn validate(&mut self) {
        self.construction_ef = self.construction_ef.clamp(10, 500);
        self.search_ef = self.search_ef.clamp(10, 500);
        self.m = self.m.clamp(2, 100);
    }

    /// `search_ef` must never be below `k`; the store raises it at query time.
    pub fn search_ef_for(&self, k: usize) -> u32 {
        self.search_ef.max(k as u32)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Directory names to skip anywhere in the tree, in addition to built-in
    /// ignore defaults and `.mcpignore` rules.
    pub exclude_dir_names: Vec<String>,
    /// Files larger than this are skipped for symbol extraction (still
    /// regex-searchable). Default 1 MiB.
    pub max_symbol_file_bytes: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            exclude_dir_names: vec![],
            max_symbol_file_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// 0 = auto-detect from available parallelism.
    pub max_workers: usize,
    pub use_parallel: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            use_parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub debounce_seconds: u64,
    pub watched_extensions: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_seconds: 60,
            watched_extensions: vec![
                "py".into(),
                "pyi".into(),
                "js".into(),
                "jsx".into(),
                "mjs".into(),
                "cjs".into(),
                "ts".into(),
                "tsx".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub exact_name_match: f32,
    pub partial_name_match: f32,
    pub symbol_type_match: f32,
    pub has_documentation: f32,
    pub file_relevance: f32,
    pub test_file_penalty: f32,
    pub comment_penalty: f32,
    pub import_statement: f32,
    pub definition_bonus: f32,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            exact_name_match: 0.30,
            partial_name_match: 0.15,
            symbol_type_match: 0.10,
            has_documentation: 0.05,
            file_relevance: 0.10,
            test_file_penalty: -0.10,
            comment_penalty: -0.15,
            import_statement: 0.05,
            definition_bonus: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Embedding preset name, or a literal HuggingFace repo id.
    pub embedding_model: String,
    pub hnsw: HnswConfig,
    pub scan: ScanConfig,
    pub parallel: ParallelConfig,
    pub watcher: WatcherConfig,
    pub reranker: RerankerConfig,
    /// Collection name within a project's vector store.
    pub collection_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_PRESET.to_string(),
            hnsw: HnswConfig::default(),
            scan: ScanConfig::default(),
            parallel: ParallelConfig::default(),
            watcher: WatcherConfig::default(),
            reranker: RerankerConfig::default(),
            collection_name: "code_embeddings".to_string(),
        }
    }
}

impl Config {
    pub fn resolved_preset(&self) -> ModelPreset {
        resolve_preset(&self.embedding_model).unwrap_or_else(|| {
            let fallback = resolve_preset(DEFAULT_PRESET).expect("default preset always resolves");
            ModelPreset {
                model_name: self.embedding_model.clone(),
                ..fallback
            }
        })
    }

    /// Load layered config: defaults → `<workspace>/.ragex.json` → environment.
    pub fn load(workspace_root: &Path) -> Self {
        let mut cfg = Self::default();
        cfg.merge_file(&workspace_root.join(".ragex.json"));
        cfg.merge_env();
        cfg.hnsw.validate();
        cfg
    }

    fn merge_file(&mut self, path: &Path) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return;
        };
        match serde_json::from_str::<Config>(&text) {
            Ok(file_cfg) => *self = file_cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring malformed .ragex.json");
            }
        }
    }

    fn merge_env(&mut self) {
        if let Ok(v) = std::env::var("RAGEX_EMBEDDING_MODEL") {
            if !v.is_empty() {
                self.embedding_model = v;
            }
        }
        if let Ok(v) = std::env::var("RAGEX_CHROMA_COLLECTION") {
            if !v.is_empty() {
                self.collection_name = v;
            }
        }
        if let Ok(v) = env_u32("RAGEX_HNSW_CONSTRUCTION_EF") {
            self.hnsw.construction_ef = v;
        }
        if let Ok(v) = env_u32("RAGEX_HNSW_SEARCH_EF") {
            self.hnsw.search_ef = v;
        }
        if let Ok(v) = env_u32("RAGEX_HNSW_M") {
            self.hnsw.m = v;
        }
        if let Ok(v) = std::env::var("RAGEX_USE_PARALLEL") {
            self.parallel.use_parallel = matches!(v.to_lowercase().as_str(), "true" | "1" | "yes");
        }
        if let Ok(v) = env_usize("RAGEX_MAX_WORKERS") {
            self.parallel.max_workers = v;
        }
    }

    /// `RAGEX_CHROMA_PERSIST_DIR` overrides the computed per-project vector
    /// store directory; resolved separately since it depends on `ProjectPaths`.
    pub fn persist_dir_override() -> Option<PathBuf> {
        std::env::var("RAGEX_CHROMA_PERSIST_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }
}

fn env_u32(name: &str) -> Result<u32, ()> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn env_usize(name: &str) -> Result<usize, ()> {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_fast_preset() {
        let cfg = Config::default();
        let preset = cfg.resolved_preset();
        assert_eq!(preset.dimensions, 256);
        assert_eq!(preset.model_name, "minishlab/potion-base-8M");
    }

    #[test]
    fn unknown_preset_name_is_treated_as_literal_repo_id() {
        let mut cfg = Config::default();
        cfg.embedding_model = "some-org/custom-model".to_string();
        let preset = cfg.resolved_preset();
        assert_eq!(preset.model_name, "some-org/custom-model");
        // Falls back to the default preset's dimensions as a best effort.
        assert_eq!(preset.dimensions, 256);
    }

    #[test]
    fn hnsw_validate_clamps_out_of_range_values() {
        let mut hnsw = HnswConfig {
            construction_ef: 5,
            search_ef: 1000,
            m: 1,
        };
        hnsw.validate();
        assert_eq!(hnsw.construction_ef, 10);
        assert_eq!(hnsw.search_ef, 500);
        assert_eq!(hnsw.m, 2);
    }

    #[test]
    fn search_ef_for_raises_below_k() {
        let hnsw = HnswConfig::default();
        assert_eq!(hnsw.search_ef_for(10), 50);
        assert_eq!(hnsw.search_ef_for(200), 200);
    }
}
