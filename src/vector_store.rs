//! Persistent per-symbol vector store (C5).
//!
//! Flat-file JSON storage keyed by `symbol_id`, brute-force O(n·d) cosine
//! search: file → symbol records plus a sidecar meta file guarding
//! model/dimension drift, with per-symbol metadata (`file_checksum`,
//! `files_by_checksum`, full `statistics()`) layered on top.
//!
//! Search index strategy: given the explicit goal of exact correctness over
//! guaranteed ranking quality on a small per-workspace corpus, this store
//! implements exact brute-force cosine search rather than a graph-based
//! HNSW index. `construction_ef`/`search_ef`/`M` are still accepted,
//! validated, and persisted with the collection metadata so the on-disk
//! schema is forward-compatible with a future graph-backed implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::HnswConfig;
use crate::error::{RagexError, RagexResult};
use crate::symbol::Symbol;

/// Records are persisted in batches of this size to keep any single write
/// bounded even for very large workspaces.
const BATCH_SIZE: usize = 5000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub symbol_id: String,
    pub vector: Vec<f32>,
    pub file: String,
    pub name: String,
    pub kind: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parent: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub file_checksum: String,
    /// `code_snippet` — kept separate from the lighter metadata fields above
    /// so callers can fetch it only when they need to render a hit.
    pub document: String,
}

impl VectorRecord {
    pub fn from_symbol(symbol: &Symbol, vector: Vec<f32>) -> Self {
        Self {
            symbol_id: symbol.id.clone(),
            vector,
            file: symbol.file.clone(),
            name: symbol.name.clone(),
            kind: symbol.kind.as_str().to_string(),
            language: symbol.language.clone(),
            start_line: symbol.start_line,
            end_line: symbol.end_line,
            parent: symbol.parent.clone(),
            signature: symbol.signature.clone(),
            docstring: symbol.docstring.clone(),
            file_checksum: symbol.file_checksum.clone(),
            document: symbol.code_snippet.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionMeta {
    model_name: String,
    dimensions: usize,
    collection_name: String,
    construction_ef: u32,
    search_ef: u32,
    m: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OnDiskStore {
    records: HashMap<String, VectorRecord>,
}

#[derive(Clone)]
pub struct VectorStore {
    dir: PathBuf,
    records_path: PathBuf,
    meta_path: PathBuf,
    meta: CollectionMeta,
    records: HashMap<String, VectorRecord>,
    /// file -> symbol_ids, for O(1) `delete_by_file`/`files_by_checksum`.
    by_file: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub symbol_id: String,
    pub file: String,
    pub name: String,
    pub kind: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parent: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub document: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_symbols: usize,
    pub unique_files: usize,
    pub by_kind: HashMap<String, usize>,
    pub by_language: HashMap<String, usize>,
    pub size_bytes: u64,
}

impl VectorStore {
    /// Opens (or creates) a collection on disk. Validates the stored
    /// dimension against `dimensions`; mismatch is a fatal
    /// `configuration_mismatch` error — the daemon refuses to search or
    /// insert rather than silently truncate/pad vectors.
    pub fn open(
        dir: &Path,
        model_name: &str,
        dimensions: usize,
        collection_name: &str,
        mut hnsw: HnswConfig,
    ) -> RagexResult<Self> {
        std::fs::create_dir_all(dir)?;
        hnsw.validate();

        let meta_path = dir.join("collection_meta.json");
        let records_path = dir.join("embeddings.json");

        let existing_meta: Option<CollectionMeta> = std::fs::read_to_string(&meta_path)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok());

        let (meta, records) = match existing_meta {
            Some(existing) if existing.dimensions != dimensions => {
                return Err(RagexError::configuration_mismatch(format!(
                    "Embedding dimension mismatch: collection={}d, model={dimensions}d",
                    existing.dimensions
                )));
            }
            Some(mut existing) => {
                existing.construction_ef = hnsw.construction_ef;
                existing.search_ef = hnsw.search_ef;
                existing.m = hnsw.m;
                let on_disk: OnDiskStore = std::fs::read_to_string(&records_path)
                    .ok()
                    .and_then(|t| serde_json::from_str(&t).ok())
                    .unwrap_or_default();
                (existing, on_disk.records)
            }
            None => {
                let meta = CollectionMeta {
                    model_name: model_name.to_string(),
                    dimensions,
                    collection_name: collection_name.to_string(),
                    construction_ef: hnsw.construction_ef,
                    search_ef: hnsw.search_ef,
                    m: hnsw.m,
                };
                (meta, HashMap::new())
            }
        };

        let mut by_file: HashMap<String, Vec<String>> = HashMap::new();
        for record in records.values() {
            by_file.entry(record.file.clone()).or_default().push(record.symbol_id.clone());
        }

        let mut store = Self {
            dir: dir.to_path_buf(),
            records_path,
            meta_path,
            meta,
            records,
            by_file,
        };
        store.persist_meta()?;
        Ok(store)
    }

    fn persist_meta(&self) -> RagexResult<()> {
        let text = serde_json::to_string_pretty(&self.meta)?;
        std::fs::write(&self.meta_path, text)?;
        Ok(())
    }

    fn persist_records(&self) -> RagexResult<()> {
        let on_disk = OnDiskStore { records: self.records.clone() };
        let tmp = self.records_path.with_extension("json.tmp");
        let text = serde_json::to_string(&on_disk)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.records_path)?;
        Ok(())
    }

    /// Deletes every record for `file`, returning how many were removed.
    /// Callers updating a file call this before `add` so a file's old
    /// symbols never coexist with its new ones (a symbol whose name or
    /// byte range moved would otherwise linger as a stale duplicate).
    pub fn delete_by_file(&mut self, file: &str) -> RagexResult<usize> {
        let removed = self.by_file.remove(file).unwrap_or_default();
        for id in &removed {
            self.records.remove(id);
        }
        if !removed.is_empty() {
            self.persist_records()?;
        }
        Ok(removed.len())
    }

    /// Replaces all records for `file`: deletes its existing records first,
    /// then inserts `new_records`. Enforces the delete-before-insert
    /// ordering invariant in one call.
    pub fn replace_file(&mut self, file: &str, new_records: Vec<VectorRecord>) -> RagexResult<()> {
        self.delete_by_file(file)?;
        self.add(new_records)
    }

    /// Upserts records, batching writes at `BATCH_SIZE` so one call never
    /// holds an unbounded amount of unwritten state.
    pub fn add(&mut self, records: Vec<VectorRecord>) -> RagexResult<()> {
        for chunk in records.chunks(BATCH_SIZE) {
            for record in chunk {
                if record.vector.len() != self.meta.dimensions {
                    return Err(RagexError::configuration_mismatch(format!(
                        "record '{}' has {}d vector, collection expects {}d",
                        record.symbol_id,
                        record.vector.len(),
                        self.meta.dimensions
                    )));
                }
                self.by_file.entry(record.file.clone()).or_default().push(record.symbol_id.clone());
                self.records.insert(record.symbol_id.clone(), record.clone());
            }
            self.persist_records()?;
        }
        Ok(())
    }

    /// Brute-force cosine search over resident records, O(n·d). `search_ef`
    /// (from collection metadata) is raised to `k` for this query if lower;
    /// it is otherwise an inert, persisted tuning value.
    pub fn search(
        &self,
        query_vector: &[f32],
        k: usize,
        min_similarity: Option<f32>,
        language_filter: Option<&str>,
    ) -> RagexResult<Vec<SearchHit>> {
        if query_vector.len() != self.meta.dimensions {
            return Err(RagexError::configuration_mismatch(format!(
                "Embedding dimension mismatch: collection={}d, model={}d",
                self.meta.dimensions,
                query_vector.len()
            )));
        }
        let _effective_search_ef = self.meta.search_ef.max(k as u32);

        let mut scored: Vec<(f32, &VectorRecord)> = self
            .records
            .values()
            .filter(|r| language_filter.map(|l| r.language == l).unwrap_or(true))
            .map(|r| (cosine_similarity(query_vector, &r.vector), r))
            .filter(|(sim, _)| min_similarity.map(|min| *sim >= min).unwrap_or(true))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(similarity, r)| SearchHit {
                symbol_id: r.symbol_id.clone(),
                file: r.file.clone(),
                name: r.name.clone(),
                kind: r.kind.clone(),
                language: r.language.clone(),
                start_line: r.start_line,
                end_line: r.end_line,
                parent: r.parent.clone(),
                signature: r.signature.clone(),
                docstring: r.docstring.clone(),
                document: r.document.clone(),
                similarity,
            })
            .collect())
    }

    /// `{file: file_checksum}` derived from resident records, one checksum
    /// per file (all a file's symbols share one checksum by construction).
    pub fn file_checksums(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        for record in self.records.values() {
            out.entry(record.file.clone()).or_insert_with(|| record.file_checksum.clone());
        }
        out
    }

    pub fn files_by_checksum(&self, checksum: &str) -> Vec<String> {
        self.records
            .values()
            .filter(|r| r.file_checksum == checksum)
            .map(|r| r.file.clone())
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn statistics(&self) -> Statistics {
        let mut by_kind = HashMap::new();
        let mut by_language = HashMap::new();
        for record in self.records.values() {
            *by_kind.entry(record.kind.clone()).or_insert(0) += 1;
            *by_language.entry(record.language.clone()).or_insert(0) += 1;
        }
        let size_bytes = std::fs::metadata(&self.records_path).map(|m| m.len()).unwrap_or(0);
        Statistics {
            total_symbols: self.records.len(),
            unique_files: self.by_file.len(),
            by_kind,
            by_language,
            size_bytes,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.meta.dimensions
    }

    pub fn model_name(&self) -> &str {
        &self.meta.model_name
    }

    /// Exact, case-insensitive name match over resident symbol metadata —
    /// the cheap in-memory pre-pass §4.9 asks the symbol backend to run
    /// before falling back to the regex backend.
    pub fn symbols_by_name(&self, name: &str) -> Vec<SearchHit> {
        let lower = name.to_ascii_lowercase();
        self.records
            .values()
            .filter(|r| r.name.to_ascii_lowercase() == lower)
            .map(|r| SearchHit {
                symbol_id: r.symbol_id.clone(),
                file: r.file.clone(),
                name: r.name.clone(),
                kind: r.kind.clone(),
                language: r.language.clone(),
                start_line: r.start_line,
                end_line: r.end_line,
                parent: r.parent.clone(),
                signature: r.signature.clone(),
                docstring: r.docstring.clone(),
                document: r.document.clone(),
                similarity: 1.0,
            })
            .collect()
    }

    /// Drops every record, keeping the collection's meta (model/dimensions)
    /// intact — used by `index --force` to rebuild from scratch.
    pub fn reset(&mut self) -> RagexResult<()> {
        self.records.clear();
        self.by_file.clear();
        self.persist_records()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
