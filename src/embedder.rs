//! Embedder (C4): turns a Symbol's structured context into a unit-normalized
//! vector. `Embedder` is an abstract trait so the vector store and indexer
//! never depend on a concrete model; `Model2VecEmbedder` is the only
//! implementation this crate ships, wrapping `model2vec-rs::StaticModel`.

use model2vec_rs::model::StaticModel;

use crate::config::ModelPreset;
use crate::error::{RagexError, RagexResult};
use crate::symbol::{env_var_category, Symbol, SymbolKind};

pub trait Embedder: Send + Sync {
    fn dimensions(&self) -> usize;
    fn model_name(&self) -> &str;
    fn embed_text(&self, text: &str) -> RagexResult<Vec<f32>>;
    fn embed_batch(&self, texts: &[String]) -> RagexResult<Vec<Vec<f32>>>;
}

pub struct Model2VecEmbedder {
    model: StaticModel,
    model_name: String,
    dimensions: usize,
}

impl Model2VecEmbedder {
    pub fn load(preset: &ModelPreset) -> RagexResult<Self> {
        let model = StaticModel::from_pretrained(&preset.model_name, None, None, None).map_err(|e| {
            RagexError::configuration_mismatch(format!(
                "failed to load embedding model '{}': {e}",
                preset.model_name
            ))
        })?;
        Ok(Self {
            model,
            model_name: preset.model_name.clone(),
            dimensions: preset.dimensions,
        })
    }
}

impl Embedder for Model2VecEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn embed_text(&self, text: &str) -> RagexResult<Vec<f32>> {
        Ok(self.model.encode_single(text))
    }

    fn embed_batch(&self, texts: &[String]) -> RagexResult<Vec<Vec<f32>>> {
        Ok(self.model.encode(texts))
    }
}

/// Builds the structured, per-kind multi-line embedder input for a Symbol.
/// A symbol's name alone is too sparse for natural-language queries; this
/// injects the domain signals §4.4 calls for.
pub fn build_context(symbol: &Symbol) -> String {
    match symbol.kind {
        SymbolKind::Function | SymbolKind::Method => function_context(symbol),
        SymbolKind::Class => class_context(symbol),
        SymbolKind::Import | SymbolKind::ImportFrom => import_context(symbol),
        SymbolKind::EnvVar => env_var_context(symbol),
        SymbolKind::Constant | SymbolKind::Variable => constant_context(symbol),
        SymbolKind::Comment | SymbolKind::ModuleDoc => doc_context(symbol),
        SymbolKind::Interface => class_context(symbol),
    }
}

fn name_variations(name: &str) -> String {
    let spaced_snake = name.replace('_', " ");
    let mut spaced_camel = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            spaced_camel.push(' ');
        }
        spaced_camel.push(c.to_ascii_lowercase());
    }
    let private = if name.starts_with('_') { " (private)" } else { "" };
    format!("{spaced_snake} / {spaced_camel}{private}")
}

const STOPWORDS: &[&str] = &[
    "self", "this", "return", "if", "else", "for", "while", "def", "function", "const", "let",
    "var", "import", "from", "class", "true", "false", "none", "null", "and", "or", "not",
];

fn extract_keywords(code: &str, cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in code.chars().chain(std::iter::once(' ')) {
        if ch.is_alphanumeric() || ch == '_' {
            cur.push(ch);
        } else if !cur.is_empty() {
            let lower = cur.to_ascii_lowercase();
            if cur.len() > 2 && !STOPWORDS.contains(&lower.as_str()) && seen.insert(lower.clone()) {
                out.push(cur.clone());
                if out.len() >= cap {
                    break;
                }
            }
            cur.clear();
        }
    }
    out
}

fn function_context(s: &Symbol) -> String {
    let mut out = String::new();
    out.push_str(&format!("Type: {}\n", s.kind.as_str()));
    out.push_str(&format!("Name: {} ({})\n", s.name, name_variations(&s.name)));
    out.push_str(&format!("Language: {}\n", s.language));
    out.push_str(&format!("File: {}\n", s.file));
    if let Some(sig) = &s.signature {
        out.push_str(&format!("Signature: {sig}\n"));
    }
    if let Some(doc) = &s.docstring {
        out.push_str(&format!("Documentation: {doc}\n"));
    }
    if let Some(parent) = &s.parent {
        out.push_str(&format!("Parent: {parent}\n"));
    }
    let keywords = extract_keywords(&s.code_snippet, 15);
    if !keywords.is_empty() {
        out.push_str(&format!("Keywords: {}\n", keywords.join(", ")));
    }
    out.push_str(&format!("Code:\n{}\n", first_n_lines(&s.code_snippet, 5)));
    out
}

fn class_context(s: &Symbol) -> String {
    let mut out = String::new();
    out.push_str(&format!("Type: {}\n", s.kind.as_str()));
    out.push_str(&format!("Name: {} ({})\n", s.name, name_variations(&s.name)));
    if let Some(sig) = &s.signature {
        out.push_str(&format!("Signature: {sig}\n"));
    }
    if let Some(doc) = &s.docstring {
        out.push_str(&format!("Documentation: {doc}\n"));
    }
    if !s.method_names.is_empty() {
        let (special, rest): (Vec<_>, Vec<_>) =
            s.method_names.iter().partition(|m| m.starts_with("__") || m.starts_with("special_"));
        let (private, public): (Vec<_>, Vec<_>) = rest.into_iter().partition(|m| m.starts_with('_'));
        out.push_str(&format!("Public methods: {}\n", public.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        if !private.is_empty() {
            out.push_str(&format!("Private methods: {}\n", private.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        }
        if !special.is_empty() {
            out.push_str(&format!("Special methods: {}\n", special.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")));
        }
    }
    out.push_str(&format!("Header: {}\n", first_n_lines(&s.code_snippet, 1)));
    out
}

fn import_context(s: &Symbol) -> String {
    let module = s.name.trim();
    let parent_package = module.split(['.', '/']).next().unwrap_or(module);
    let category = import_category(module);
    format!(
        "Type: {}\nModule: {module}\nParent package: {parent_package}\nCategory: {category}\n",
        s.kind.as_str()
    )
}

fn import_category(module: &str) -> &'static str {
    let lower = module.to_ascii_lowercase();
    if ["os", "sys", "subprocess", "pathlib", "io"].iter().any(|m| lower.contains(m)) {
        "system"
    } else if ["numpy", "pandas", "torch", "sklearn", "scipy"].iter().any(|m| lower.contains(m)) {
        "data science"
    } else if ["requests", "http", "axios", "fetch", "socket", "aiohttp"].iter().any(|m| lower.contains(m)) {
        "networking/http"
    } else {
        "general"
    }
}

fn env_var_context(s: &Symbol) -> String {
    format!(
        "Type: {}\nVariable: {}\nAccess pattern: {}\nCategory: {}\nFile: {}\nContext: {}\n",
        s.kind.as_str(),
        s.name,
        s.code_snippet.trim(),
        env_var_category(&s.name),
        s.file,
        s.code_snippet.trim(),
    )
}

fn constant_context(s: &Symbol) -> String {
    format!("Type: {}\nName: {}\nFile: {}\nCode: {}\n", s.kind.as_str(), s.name, s.file, s.code_snippet.trim())
}

fn doc_context(s: &Symbol) -> String {
    format!("Type: {}\nFile: {}\nText: {}\n", s.kind.as_str(), s.file, s.code_snippet.trim())
}

fn first_n_lines(text: &str, n: usize) -> String {
    text.lines().take(n).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolKind;

    fn sample_function() -> Symbol {
        Symbol {
            id: "f1".into(),
            name: "authenticate_user".into(),
            kind: SymbolKind::Function,
            file: "src/auth.py".into(),
            language: "python".into(),
            start_line: 10,
            end_line: 12,
            start_byte: 0,
            end_byte: 10,
            parent: None,
            signature: Some("def authenticate_user(username, password):".into()),
            docstring: Some("Authenticate user credentials".into()),
            code_snippet: "def authenticate_user(username, password):\n    return True".into(),
            file_checksum: "abc".into(),
            method_names: vec![],
        }
    }

    #[test]
    fn function_context_includes_name_signature_and_doc() {
        let ctx = build_context(&sample_function());
        assert!(ctx.contains("authenticate_user"));
        assert!(ctx.contains("Authenticate user credentials"));
        assert!(ctx.contains("def authenticate_user"));
    }

    #[test]
    fn name_variations_splits_snake_and_camel() {
        let v = name_variations("authenticate_user");
        assert!(v.contains("authenticate user"));
    }

    #[test]
    fn import_category_detects_networking() {
        assert_eq!(import_category("requests"), "networking/http");
        assert_eq!(import_category("os.path"), "system");
    }
}
