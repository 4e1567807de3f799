//! In-process literal/regex matcher (C9 backend). Built from the same crate
//! family ripgrep uses (`grep-matcher`/`grep-regex`/`grep-searcher`) instead
//! of shelling out to an external binary, per §6's "in-process regex engine
//! meeting the same contract" option. File iteration reuses C1's ignore
//! decisions directly rather than re-walking with a second ignore engine.

use std::path::Path;
use std::time::{Duration, Instant};

use grep_matcher::Matcher;
use grep_regex::RegexMatcher;
use grep_searcher::sinks::UTF8;
use grep_searcher::Searcher;
use serde::Serialize;

use crate::error::{RagexError, RagexResult};
use crate::ignore_engine::IgnoreEngine;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_RESULT_CAP: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct RegexMatch {
    pub path: String,
    pub line_number: u64,
    pub line_text: String,
    pub column: usize,
}

pub struct RegexSearchOptions {
    pub case_insensitive: bool,
    pub timeout: Duration,
    pub result_cap: usize,
}

impl Default for RegexSearchOptions {
    fn default() -> Self {
        Self {
            case_insensitive: false,
            timeout: DEFAULT_TIMEOUT,
            result_cap: DEFAULT_RESULT_CAP,
        }
    }
}

/// Searches every non-ignored file under `root` for `pattern`, stopping once
/// `options.result_cap` matches are found or `options.timeout` elapses.
pub fn search(root: &Path, pattern: &str, ignore: &IgnoreEngine, options: &RegexSearchOptions) -> RagexResult<Vec<RegexMatch>> {
    let matcher = RegexMatcher::new_line_matcher(&build_pattern(pattern, options.case_insensitive))
        .map_err(|e| RagexError::invalid_input(format!("invalid regex '{pattern}': {e}")))?;

    let started = Instant::now();
    let mut results = Vec::new();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(false)
        .git_exclude(false)
        .build();

    for entry in walker {
        if started.elapsed() > options.timeout {
            return Err(RagexError::Timeout);
        }
        if results.len() >= options.result_cap {
            break;
        }
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if ignore.should_ignore(path) {
            continue;
        }
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let remaining_cap = options.result_cap - results.len();
        let path_owned = path.to_path_buf();
        let mut searcher = Searcher::new();
        let search_result = searcher.search_path(
            &matcher,
            path,
            UTF8(|line_number, line| {
                let is_match = matcher
                    .find(line.as_bytes())
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                if let Some(m) = is_match {
                    results.push(RegexMatch {
                        path: path_owned.display().to_string(),
                        line_number,
                        line_text: line.trim_end_matches(['\n', '\r']).to_string(),
                        column: m.start() + 1,
                    });
                }
                Ok(results.len() < remaining_cap)
            }),
        );
        // Unreadable / binary files are skipped rather than failing the whole search.
        let _ = search_result;
    }

    Ok(results)
}

fn build_pattern(pattern: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        format!("(?i){pattern}")
    } else {
        pattern.to_string()
    }
}

/// Builds a whole-word, case-insensitive pattern for symbol-name lookups.
pub fn symbol_pattern(name: &str) -> String {
    format!(r"\b{}\b", regex::escape(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn finds_matching_lines() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "def authenticate_user():\n    pass\n").unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let hits = search(dir.path(), "authenticate_user", &ignore, &RegexSearchOptions::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].line_number, 1);
    }

    #[test]
    fn respects_ignore_engine() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/lib.js"), "function authenticate_user() {}\n").unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let hits = search(dir.path(), "authenticate_user", &ignore, &RegexSearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn symbol_pattern_is_word_bounded() {
        assert_eq!(symbol_pattern("foo"), r"\bfoo\b");
    }

    #[test]
    fn result_cap_is_honored() {
        let dir = tempdir().unwrap();
        let body = "needle\n".repeat(10);
        fs::write(dir.path().join("a.txt"), body).unwrap();
        let ignore = IgnoreEngine::new(dir.path().to_path_buf());
        let options = RegexSearchOptions { result_cap: 3, ..Default::default() };
        let hits = search(dir.path(), "needle", &ignore, &options).unwrap();
        assert_eq!(hits.len(), 3);
    }
}
