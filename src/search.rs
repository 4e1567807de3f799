//! Search service (C9): routes a query to the right backend and shapes its
//! output. The daemon (C10) is the only caller; this module owns no state of
//! its own beyond what's passed in.

use std::path::Path;

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::config::RerankerConfig;
use crate::embedder::Embedder;
use crate::error::RagexResult;
use crate::ignore_engine::IgnoreEngine;
use crate::regex_search::{self, RegexMatch, RegexSearchOptions};
use crate::reranker::{rerank, RerankCandidate, RerankedHit};
use crate::vector_store::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Auto,
    Semantic,
    Symbol,
    Regex,
}

impl SearchMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "semantic" => Some(Self::Semantic),
            "symbol" => Some(Self::Symbol),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "mode")]
pub enum SearchResult {
    Semantic { hits: Vec<RerankedHit> },
    Regex { matches: Vec<RegexMatch> },
}

pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub mode: SearchMode,
    pub limit: usize,
    pub min_similarity: Option<f32>,
    pub language_filter: Option<&'a str>,
}

fn probes() -> &'static (Regex, Regex, Regex, Regex) {
    static CACHE: OnceLock<(Regex, Regex, Regex, Regex)> = OnceLock::new();
    CACHE.get_or_init(|| {
        (
            Regex::new(r"^[A-Z][A-Z_]+[A-Z]$").unwrap(),
            Regex::new(r"(?i)\b(import|require|from|use|using|include)\b").unwrap(),
            Regex::new(r"^(class\s+\w+|def\s+\w+|\w+\s*\()").unwrap(),
            Regex::new(r"(?i)\b(that|which|how|where|handles|processes|implements|responsible)\b").unwrap(),
        )
    })
}

const REGEX_METACHARS: &[char] = &['.', '*', '+', '?', '[', ']', '{', '}', '^', '$', '|', '\\'];

const WELL_KNOWN_ENV_NAMES: &[&str] = &["PATH", "HOME", "API_KEY", "SECRET_KEY", "DATABASE_URL", "NODE_ENV"];

/// Applies §4.9's six ordered auto-detection rules, first match wins.
pub fn detect_mode(query: &str) -> SearchMode {
    let (env_name_re, import_re, symbol_shape_re, nl_re) = probes();
    let trimmed = query.trim();
    let word_count = trimmed.split_whitespace().count();

    if env_name_re.is_match(trimmed) || WELL_KNOWN_ENV_NAMES.contains(&trimmed) {
        return SearchMode::Semantic;
    }
    if import_re.is_match(trimmed) {
        return SearchMode::Semantic;
    }
    if trimmed.chars().any(|c| REGEX_METACHARS.contains(&c)) {
        return SearchMode::Regex;
    }
    if symbol_shape_re.is_match(trimmed) || (word_count == 1 && is_identifier(trimmed)) {
        return SearchMode::Symbol;
    }
    if word_count > 1 && nl_re.is_match(trimmed) {
        return SearchMode::Semantic;
    }
    if word_count >= 3 {
        SearchMode::Semantic
    } else if is_identifier(trimmed) {
        SearchMode::Symbol
    } else {
        SearchMode::Regex
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_').unwrap_or(false)
        && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Human-readable guidance returned alongside an empty result set, so
/// downstream clients can suggest another mode.
pub fn empty_result_guidance(mode: SearchMode) -> String {
    match mode {
        SearchMode::Semantic => {
            "No semantic matches. Try --regex for a literal search, or a shorter/more specific phrase.".to_string()
        }
        SearchMode::Regex => "No regex matches. Check escaping, or try a semantic natural-language query.".to_string(),
        SearchMode::Symbol => "No symbol named that was found. Try a semantic query describing its behavior.".to_string(),
        SearchMode::Auto => "No matches in any mode.".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn run(
    request: &SearchRequest,
    workspace_root: &Path,
    ignore: &IgnoreEngine,
    store: &VectorStore,
    embedder: &dyn Embedder,
    reranker_weights: &RerankerConfig,
) -> RagexResult<SearchResult> {
    let mode = match request.mode {
        SearchMode::Auto => detect_mode(request.query),
        other => other,
    };

    match mode {
        SearchMode::Semantic => run_semantic(request, store, embedder, reranker_weights),
        SearchMode::Regex => run_regex(request, workspace_root, ignore),
        SearchMode::Symbol => run_symbol(request, workspace_root, ignore, store),
        SearchMode::Auto => unreachable!("resolved above"),
    }
}

fn run_semantic(
    request: &SearchRequest,
    store: &VectorStore,
    embedder: &dyn Embedder,
    reranker_weights: &RerankerConfig,
) -> RagexResult<SearchResult> {
    let query_vector = embedder.embed_text(request.query)?;
    // Over-fetch before re-ranking so feature weights can reorder within a
    // wider candidate pool than the final limit.
    let overfetch = (request.limit * 3).max(request.limit + 20);
    let hits = store.search(&query_vector, overfetch, request.min_similarity, request.language_filter)?;

    let candidates: Vec<RerankCandidate> = hits
        .iter()
        .map(|h| RerankCandidate {
            name: h.name.clone(),
            kind: h.kind.clone(),
            file: h.file.clone(),
            code: h.document.clone(),
            signature: h.signature.clone(),
            docstring: h.docstring.clone(),
            base_score: h.similarity,
        })
        .collect();

    let reranked = rerank(request.query, candidates, request.limit, reranker_weights);
    Ok(SearchResult::Semantic { hits: reranked })
}

fn run_regex(request: &SearchRequest, workspace_root: &Path, ignore: &IgnoreEngine) -> RagexResult<SearchResult> {
    let options = RegexSearchOptions { result_cap: request.limit, ..Default::default() };
    let matches = regex_search::search(workspace_root, request.query, ignore, &options)?;
    Ok(SearchResult::Regex { matches })
}

/// Symbol mode: a cheap in-memory name-equality pre-pass over the resident
/// vector store, then the regex backend for symbols not yet indexed.
fn run_symbol(
    request: &SearchRequest,
    workspace_root: &Path,
    ignore: &IgnoreEngine,
    store: &VectorStore,
) -> RagexResult<SearchResult> {
    let resident = store.symbols_by_name(request.query);
    if !resident.is_empty() {
        let candidates: Vec<RerankCandidate> = resident
            .into_iter()
            .map(|h| RerankCandidate {
                name: h.name,
                kind: h.kind,
                file: h.file,
                code: h.document,
                signature: h.signature,
                docstring: h.docstring,
                base_score: h.similarity,
            })
            .collect();
        let hits = rerank(request.query, candidates, request.limit, &RerankerConfig::default());
        return Ok(SearchResult::Semantic { hits });
    }

    let pattern = regex_search::symbol_pattern(request.query);
    let options = RegexSearchOptions { case_insensitive: true, result_cap: request.limit, ..Default::default() };
    let matches = regex_search::search(workspace_root, &pattern, ignore, &options)?;
    Ok(SearchResult::Regex { matches })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_env_var_shape_as_semantic() {
        assert_eq!(detect_mode("API_KEY"), SearchMode::Semantic);
    }

    #[test]
    fn detects_regex_metacharacters() {
        assert_eq!(detect_mode(r"foo.*bar"), SearchMode::Regex);
    }

    #[test]
    fn detects_single_identifier_as_symbol() {
        assert_eq!(detect_mode("authenticate_user"), SearchMode::Symbol);
    }

    #[test]
    fn detects_def_shape_as_symbol() {
        assert_eq!(detect_mode("def authenticate_user"), SearchMode::Symbol);
    }

    #[test]
    fn detects_natural_language_as_semantic() {
        assert_eq!(detect_mode("how does the code handle authentication"), SearchMode::Semantic);
    }

    #[test]
    fn detects_import_tokens_as_semantic() {
        assert_eq!(detect_mode("import requests"), SearchMode::Semantic);
    }

    #[test]
    fn default_rule_falls_back_to_regex_for_short_nonidentifier() {
        assert_eq!(detect_mode("a+b"), SearchMode::Regex);
    }
}
