//! Feature-weighted re-ranking of semantic search hits (C8).
//!
//! Pure function: a candidate list plus the query in, a re-scored and
//! re-sorted list out, with per-hit feature contributions attached for
//! debuggability. No I/O, no shared state — every weight lives in
//! `RerankerConfig` so the scoring can be tuned without touching this file.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::config::RerankerConfig;

#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub code: String,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub base_score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RerankedHit {
    pub name: String,
    pub kind: String,
    pub file: String,
    pub base_score: f32,
    pub reranked_score: f32,
    pub feature_scores: HashMap<String, f32>,
    pub rank: usize,
}

struct QueryIntent {
    wants_class: bool,
    wants_function: bool,
    wants_variable: bool,
    wants_test: bool,
    wants_auth: bool,
    wants_api: bool,
}

fn intent_regexes() -> &'static (Regex, Regex, Regex, Regex, Regex, Regex) {
    static CACHE: OnceLock<(Regex, Regex, Regex, Regex, Regex, Regex)> = OnceLock::new();
    CACHE.get_or_init(|| {
        (
            Regex::new(r"(?i)\bclass\b").unwrap(),
            Regex::new(r"(?i)\b(function|func|def|method)\b").unwrap(),
            Regex::new(r"(?i)\b(var|variable|const|constant)\b").unwrap(),
            Regex::new(r"(?i)\b(test|spec|testing)\b").unwrap(),
            Regex::new(r"(?i)\b(auth|login|user|password|token)\b").unwrap(),
            Regex::new(r"(?i)\b(api|endpoint|route|handler)\b").unwrap(),
        )
    })
}

fn analyze_query(query: &str) -> QueryIntent {
    let (class_re, func_re, var_re, test_re, auth_re, api_re) = intent_regexes();
    QueryIntent {
        wants_class: class_re.is_match(query),
        wants_function: func_re.is_match(query),
        wants_variable: var_re.is_match(query),
        wants_test: test_re.is_match(query),
        wants_auth: auth_re.is_match(query),
        wants_api: api_re.is_match(query),
    }
}

fn is_test_file(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [
        "test.", "_test.", ".test.", "spec.", "_spec.", ".spec.", "/test/", "/tests/", "/spec/", "/specs/",
        "__test__", "__tests__",
    ]
    .iter()
    .any(|p| lower.contains(p))
}

fn import_regexes() -> &'static [Regex] {
    static CACHE: OnceLock<Vec<Regex>> = OnceLock::new();
    CACHE
        .get_or_init(|| {
            [r"^\s*import\s+", r"^\s*from\s+.*\s+import\s+", r"^\s*require\s*\(", r"^\s*use\s+", r"^\s*using\s+"]
                .iter()
                .map(|p| Regex::new(&format!("(?i){p}")).unwrap())
                .collect()
        })
        .as_slice()
}

fn is_import_statement(code: &str) -> bool {
    !code.is_empty() && import_regexes().iter().any(|re| re.is_match(code))
}

fn is_definition(kind: &str, code: &str) -> bool {
    if matches!(kind, "function" | "class" | "method") {
        return true;
    }
    if matches!(kind, "variable" | "constant") && !code.is_empty() {
        return code.contains('=') || code.contains(':');
    }
    false
}

fn score_file_relevance(file: &str, intent: &QueryIntent, weights: &RerankerConfig) -> f32 {
    if file.is_empty() {
        return 0.0;
    }
    let lower = file.to_ascii_lowercase();
    let mut score = 0.0;
    if intent.wants_test && lower.contains("/test") {
        score += weights.file_relevance;
    } else if intent.wants_api && ["/api", "/routes", "/handlers"].iter().any(|x| lower.contains(x)) {
        score += weights.file_relevance;
    } else if intent.wants_auth && ["/auth", "/login", "/user"].iter().any(|x| lower.contains(x)) {
        score += weights.file_relevance;
    }
    if ["/vendor/", "/node_modules/", "/.git/"].iter().any(|x| lower.contains(x)) {
        score -= 0.2;
    }
    score
}

/// Re-scores and re-sorts `candidates`, returning at most `top_k` hits.
pub fn rerank(query: &str, candidates: Vec<RerankCandidate>, top_k: usize, weights: &RerankerConfig) -> Vec<RerankedHit> {
    if candidates.is_empty() {
        return vec![];
    }
    let intent = analyze_query(query);
    let query_lower = query.to_ascii_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();

    let mut scored: Vec<RerankedHit> = candidates
        .into_iter()
        .map(|c| {
            let mut features = HashMap::new();
            let name_lower = c.name.to_ascii_lowercase();

            if !name_lower.is_empty() && name_lower.contains(&query_lower) {
                features.insert("exact_name_match".to_string(), weights.exact_name_match);
            } else if !name_lower.is_empty() && query_words.iter().any(|w| name_lower.contains(w)) {
                features.insert("partial_name_match".to_string(), weights.partial_name_match);
            }

            let wants_matching_kind = (intent.wants_class && c.kind == "class")
                || (intent.wants_function && matches!(c.kind.as_str(), "function" | "method"))
                || (intent.wants_variable && matches!(c.kind.as_str(), "variable" | "constant"));
            if wants_matching_kind {
                features.insert("symbol_type_match".to_string(), weights.symbol_type_match);
            }

            if c.docstring.as_deref().map(|d| !d.is_empty()).unwrap_or(false) {
                features.insert("has_documentation".to_string(), weights.has_documentation);
            }

            let file_score = score_file_relevance(&c.file, &intent, weights);
            if file_score != 0.0 {
                features.insert("file_relevance".to_string(), file_score);
            }

            if !intent.wants_test && is_test_file(&c.file) {
                features.insert("test_file_penalty".to_string(), weights.test_file_penalty);
            }

            if c.kind == "comment" {
                features.insert("comment_penalty".to_string(), weights.comment_penalty);
            }

            let code = if !c.code.is_empty() { c.code.clone() } else { c.signature.clone().unwrap_or_default() };
            if is_import_statement(&code) {
                features.insert("import_statement".to_string(), weights.import_statement);
            }
            if is_definition(&c.kind, &code) {
                features.insert("definition_bonus".to_string(), weights.definition_bonus);
            }

            let feature_sum: f32 = features.values().sum();
            RerankedHit {
                name: c.name,
                kind: c.kind,
                file: c.file,
                base_score: c.base_score,
                reranked_score: c.base_score + feature_sum,
                feature_scores: features,
                rank: 0,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.reranked_score.partial_cmp(&a.reranked_score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    for (i, hit) in scored.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, kind: &str, file: &str, base_score: f32) -> RerankCandidate {
        RerankCandidate {
            name: name.to_string(),
            kind: kind.to_string(),
            file: file.to_string(),
            code: String::new(),
            signature: None,
            docstring: None,
            base_score,
        }
    }

    #[test]
    fn exact_name_match_outranks_unrelated_hit() {
        let weights = RerankerConfig::default();
        let candidates = vec![
            candidate("authenticate_user", "function", "src/auth.py", 0.5),
            candidate("unrelated_helper", "function", "src/misc.py", 0.55),
        ];
        let hits = rerank("authenticate user", candidates, 10, &weights);
        assert_eq!(hits[0].name, "authenticate_user");
        assert!(hits[0].reranked_score > hits[0].base_score);
    }

    #[test]
    fn comment_kind_is_penalized() {
        let weights = RerankerConfig::default();
        let candidates = vec![candidate("TODO", "comment", "src/a.py", 0.9)];
        let hits = rerank("todo", candidates, 10, &weights);
        assert!(hits[0].reranked_score < hits[0].base_score + weights.exact_name_match);
    }

    #[test]
    fn test_file_penalized_unless_query_is_test_oriented() {
        let weights = RerankerConfig::default();
        let candidates = vec![candidate("helper", "function", "src/tests/helper.py", 0.5)];
        let penalized = rerank("helper", candidates.clone(), 10, &weights);
        assert!(penalized[0].feature_scores.contains_key("test_file_penalty"));

        let not_penalized = rerank("test helper", candidates, 10, &weights);
        assert!(!not_penalized[0].feature_scores.contains_key("test_file_penalty"));
    }

    #[test]
    fn empty_candidates_returns_empty() {
        assert!(rerank("q", vec![], 10, &RerankerConfig::default()).is_empty());
    }
}
