//! Structural symbol extraction (C3): tree-sitter grammars + queries turn a
//! file's bytes into a flat list of `Symbol`s, sized for the full record
//! shape a vector store entry needs rather than just skeleton-pruning
//! captures.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tree_sitter::{Language, Node, Parser, Query, QueryCursor, StreamingIterator};

use crate::checksum::checksum_file;
use crate::error::{RagexError, RagexResult};

/// Files larger than this are skipped for symbol extraction (still
/// regex-searchable).
pub const MAX_SYMBOL_FILE_BYTES: u64 = 1_000_000;

/// Classes report at most this many method names in their embedder context.
pub const METHOD_NAME_CAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Interface,
    Import,
    ImportFrom,
    Constant,
    EnvVar,
    Comment,
    ModuleDoc,
    Variable,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Import => "import",
            Self::ImportFrom => "import_from",
            Self::Constant => "constant",
            Self::EnvVar => "env_var",
            Self::Comment => "comment",
            Self::ModuleDoc => "module_doc",
            Self::Variable => "variable",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub id: String,
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub language: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: usize,
    pub end_byte: usize,
    pub parent: Option<String>,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub code_snippet: String,
    pub file_checksum: String,
    /// Method names on a `class` symbol, capped at `METHOD_NAME_CAP`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub method_names: Vec<String>,
}

static GLOBAL_SYMBOL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_global_index() -> u64 {
    GLOBAL_SYMBOL_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn make_id(file: &str, line: u32, kind: SymbolKind, name: &str) -> String {
    format!("{file}:{line}:{}:{name}:{}", kind.as_str(), next_global_index())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl SourceLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
        }
    }
}

/// Infers language from extension; an unrecognized extension means the file
/// is excluded from symbol extraction (it may still be regex-searchable).
pub fn detect_language(path: &Path) -> Option<SourceLanguage> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "py" | "pyi" => Some(SourceLanguage::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(SourceLanguage::JavaScript),
        "ts" | "mts" | "cts" => Some(SourceLanguage::TypeScript),
        "tsx" => Some(SourceLanguage::Tsx),
        _ => None,
    }
}

fn ts_language(lang: SourceLanguage) -> Language {
    match lang {
        SourceLanguage::Python => tree_sitter_python::language(),
        SourceLanguage::JavaScript => tree_sitter_javascript::language(),
        SourceLanguage::TypeScript => tree_sitter_typescript::language_typescript(),
        SourceLanguage::Tsx => tree_sitter_typescript::language_tsx(),
    }
}

/// Parses a file into symbols. Pure function of the file's bytes at the time
/// of the call; the returned `file_checksum` ties every symbol to that
/// snapshot. A parse failure on one file never affects others — callers
/// collect the `Err` and move on.
pub fn extract(path: &Path, include_docs_and_comments: bool) -> RagexResult<Vec<Symbol>> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_SYMBOL_FILE_BYTES {
        tracing::warn!(
            path = %path.display(),
            bytes = meta.len(),
            "skipping symbol extraction: file exceeds max_symbol_file_bytes"
        );
        return Ok(vec![]);
    }
    let Some(lang) = detect_language(path) else {
        return Ok(vec![]);
    };
    let source_text = std::fs::read_to_string(path)
        .map_err(|e| RagexError::ParseError { path: path.to_path_buf(), reason: e.to_string() })?;
    let source = source_text.as_bytes();

    let mut parser = Parser::new();
    let ts_lang = ts_language(lang);
    parser
        .set_language(&ts_lang)
        .map_err(|e| RagexError::ParseError { path: path.to_path_buf(), reason: e.to_string() })?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| RagexError::ParseError { path: path.to_path_buf(), reason: "tree-sitter returned no tree".into() })?;

    let file_checksum = checksum_file(path)?;
    let file_str = path.to_string_lossy().to_string();

    let extractor = match lang {
        SourceLanguage::Python => extract_python as ExtractFn,
        SourceLanguage::JavaScript | SourceLanguage::TypeScript | SourceLanguage::Tsx => extract_js_ts as ExtractFn,
    };

    let ctx = ExtractCtx {
        path: &file_str,
        language: lang,
        source,
        file_checksum: &file_checksum,
        include_docs_and_comments,
    };
    Ok(extractor(&ctx, &ts_lang, tree.root_node()))
}

type ExtractFn = fn(&ExtractCtx, &Language, Node) -> Vec<Symbol>;

struct ExtractCtx<'a> {
    path: &'a str,
    language: SourceLanguage,
    source: &'a [u8],
    file_checksum: &'a str,
    include_docs_and_comments: bool,
}

fn node_text<'a>(source: &'a [u8], node: Node) -> &'a str {
    std::str::from_utf8(&source[node.start_byte()..node.end_byte()]).unwrap_or("")
}

fn first_line(text: &str, max_len: usize) -> String {
    let first = text.lines().next().unwrap_or(text);
    let mut out: String = first.chars().take(max_len).collect();
    out = out.trim().to_string();
    out
}

fn first_n_lines(text: &str, n: usize) -> String {
    text.lines().take(n).collect::<Vec<_>>().join("\n")
}

fn run_captures<'a>(
    language: &Language,
    root: Node<'a>,
    source: &'a [u8],
    query_src: &str,
) -> Vec<Vec<(String, Node<'a>)>> {
    let Ok(query) = Query::new(language, query_src) else {
        return vec![];
    };
    let names = query.capture_names().to_vec();
    let mut cursor = QueryCursor::new();
    let mut out = Vec::new();
    let mut matches = cursor.matches(&query, root, source);
    while let Some(m) = matches.next() {
        let mut row = Vec::new();
        for cap in m.captures {
            row.push((names[cap.index as usize].clone(), cap.node));
        }
        out.push(row);
    }
    out
}

fn is_constant_name(name: &str) -> bool {
    (!name.is_empty() && name.chars().all(|c| c.is_ascii_uppercase() || c == '_' || c.is_ascii_digit()))
        || name.to_ascii_lowercase().contains("config")
        || name.to_ascii_lowercase().contains("setting")
}

fn make_symbol(
    ctx: &ExtractCtx,
    name: &str,
    kind: SymbolKind,
    def_node: Node,
    signature: Option<String>,
    docstring: Option<String>,
    parent: Option<String>,
    method_names: Vec<String>,
) -> Symbol {
    let start_line = def_node.start_position().row as u32;
    let end_line = def_node.end_position().row as u32;
    let code = node_text(ctx.source, def_node);
    Symbol {
        id: make_id(ctx.path, start_line, kind, name),
        name: name.to_string(),
        kind,
        file: ctx.path.to_string(),
        language: ctx.language.as_str().to_string(),
        start_line,
        end_line,
        start_byte: def_node.start_byte(),
        end_byte: def_node.end_byte(),
        parent,
        signature,
        docstring,
        code_snippet: first_n_lines(code, 30),
        file_checksum: ctx.file_checksum.to_string(),
        method_names,
    }
}

fn extract_python(ctx: &ExtractCtx, language: &Language, root: Node) -> Vec<Symbol> {
    let mut out = Vec::new();
    let source = ctx.source;

    for row in run_captures(language, root, source, "(function_definition name: (identifier) @name) @def") {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let docstring = ctx.include_docs_and_comments.then(|| python_docstring(source, *def_node)).flatten();
        let sig = Some(first_line(node_text(source, *def_node), 240));
        let parent = enclosing_class_name(source, *def_node);
        let kind = if parent.is_some() { SymbolKind::Method } else { SymbolKind::Function };
        out.push(make_symbol(ctx, name, kind, *def_node, sig, docstring, parent, vec![]));
    }

    for row in run_captures(language, root, source, "(class_definition name: (identifier) @name) @def") {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let docstring = ctx.include_docs_and_comments.then(|| python_docstring(source, *def_node)).flatten();
        let sig = Some(first_line(node_text(source, *def_node), 240));
        let methods = class_method_names(source, *def_node, "function_definition", "identifier");
        out.push(make_symbol(ctx, name, SymbolKind::Class, *def_node, sig, docstring, None, methods));
    }

    for row in run_captures(language, root, source, "(import_statement) @def") {
        if let Some((_, def_node)) = row.iter().find(|(n, _)| n == "def") {
            let text = node_text(source, *def_node).trim();
            out.push(make_symbol(ctx, text, SymbolKind::Import, *def_node, None, None, None, vec![]));
        }
    }
    for row in run_captures(language, root, source, "(import_from_statement) @def") {
        if let Some((_, def_node)) = row.iter().find(|(n, _)| n == "def") {
            let text = node_text(source, *def_node).trim();
            out.push(make_symbol(ctx, text, SymbolKind::ImportFrom, *def_node, None, None, None, vec![]));
        }
    }

    for row in run_captures(
        language,
        root,
        source,
        "(expression_statement (assignment left: (identifier) @name)) @def",
    ) {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        if def_node.start_position().column != 0 {
            continue; // only module-level assignments
        }
        let kind = if is_constant_name(name) { SymbolKind::Constant } else { SymbolKind::Variable };
        if kind == SymbolKind::Variable {
            continue; // spec captures constants, not every variable
        }
        out.push(make_symbol(ctx, name, kind, *def_node, None, None, None, vec![]));
    }

    if ctx.include_docs_and_comments {
        out.extend(extract_comments_generic(ctx, language, root, "#"));
        if let Some(doc) = python_module_docstring(source, root) {
            out.push(Symbol {
                id: make_id(ctx.path, 0, SymbolKind::ModuleDoc, "__doc__"),
                name: "__doc__".to_string(),
                kind: SymbolKind::ModuleDoc,
                file: ctx.path.to_string(),
                language: ctx.language.as_str().to_string(),
                start_line: 0,
                end_line: 0,
                start_byte: 0,
                end_byte: doc.len(),
                parent: None,
                signature: None,
                docstring: Some(doc.clone()),
                code_snippet: doc,
                file_checksum: ctx.file_checksum.to_string(),
                method_names: vec![],
            });
        }
    }

    out.extend(extract_env_vars(ctx, source, &["os.environ.get", "os.getenv"]));

    out
}

fn extract_js_ts(ctx: &ExtractCtx, language: &Language, root: Node) -> Vec<Symbol> {
    let mut out = Vec::new();
    let source = ctx.source;

    for row in run_captures(language, root, source, "(function_declaration name: (identifier) @name) @def") {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let sig = Some(first_line(node_text(source, *def_node), 240));
        out.push(make_symbol(ctx, name, SymbolKind::Function, *def_node, sig, None, None, vec![]));
    }

    for row in run_captures(
        language,
        root,
        source,
        "(lexical_declaration (variable_declarator name: (identifier) @name value: (arrow_function))) @def",
    ) {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let sig = Some(first_line(node_text(source, *def_node), 240));
        out.push(make_symbol(ctx, name, SymbolKind::Function, *def_node, sig, None, None, vec![]));
    }

    let class_query = if ctx.language == SourceLanguage::TypeScript || ctx.language == SourceLanguage::Tsx {
        "(class_declaration name: (type_identifier) @name) @def"
    } else {
        "(class_declaration name: (identifier) @name) @def"
    };
    for row in run_captures(language, root, source, class_query) {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let sig = Some(first_line(node_text(source, *def_node), 240));
        let methods = class_method_names(source, *def_node, "method_definition", "property_identifier");
        out.push(make_symbol(ctx, name, SymbolKind::Class, *def_node, sig, None, None, methods));
    }

    for row in run_captures(language, root, source, "(method_definition name: (property_identifier) @name) @def") {
        let (Some((_, name_node)), Some((_, def_node))) =
            (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
        else {
            continue;
        };
        let name = node_text(source, *name_node);
        let sig = Some(first_line(node_text(source, *def_node), 240));
        let parent = enclosing_class_name(source, *def_node);
        out.push(make_symbol(ctx, name, SymbolKind::Method, *def_node, sig, None, parent, vec![]));
    }

    if ctx.language == SourceLanguage::TypeScript || ctx.language == SourceLanguage::Tsx {
        for row in run_captures(language, root, source, "(interface_declaration name: (type_identifier) @name) @def") {
            let (Some((_, name_node)), Some((_, def_node))) =
                (row.iter().find(|(n, _)| n == "name"), row.iter().find(|(n, _)| n == "def"))
            else {
                continue;
            };
            let name = node_text(source, *name_node);
            out.push(make_symbol(ctx, name, SymbolKind::Interface, *def_node, None, None, None, vec![]));
        }
    }

    for row in run_captures(language, root, source, "(import_statement source: (string) @src) @def") {
        if let Some((_, def_node)) = row.iter().find(|(n, _)| n == "def") {
            let text = node_text(source, *def_node).trim();
            out.push(make_symbol(ctx, text, SymbolKind::Import, *def_node, None, None, None, vec![]));
        }
    }

    if ctx.include_docs_and_comments {
        out.extend(extract_comments_generic(ctx, language, root, "//"));
    }

    out.extend(extract_env_vars(ctx, source, &["process.env"]));

    out
}

/// Method names for a class body, capped at `METHOD_NAME_CAP`.
fn class_method_names(source: &[u8], class_node: Node, def_kind: &str, name_kind: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = class_node.walk();
    for child in class_node.children(&mut cursor) {
        collect_method_names(source, child, def_kind, name_kind, &mut names);
        if names.len() >= METHOD_NAME_CAP {
            break;
        }
    }
    names.truncate(METHOD_NAME_CAP);
    names
}

fn collect_method_names(source: &[u8], node: Node, def_kind: &str, name_kind: &str, out: &mut Vec<String>) {
    if out.len() >= METHOD_NAME_CAP {
        return;
    }
    if node.kind() == def_kind {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind() == name_kind {
                out.push(node_text(source, child).to_string());
                break;
            }
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_method_names(source, child, def_kind, name_kind, out);
    }
}

fn enclosing_class_name(source: &[u8], node: Node) -> Option<String> {
    let mut cur = node.parent();
    while let Some(n) = cur {
        if n.kind() == "class_definition" || n.kind() == "class_declaration" || n.kind() == "class_body" {
            let target = if n.kind() == "class_body" { n.parent()? } else { n };
            let mut cursor = target.walk();
            for child in target.children(&mut cursor) {
                if child.kind() == "identifier" || child.kind() == "type_identifier" {
                    return Some(node_text(source, child).to_string());
                }
            }
        }
        cur = n.parent();
    }
    None
}

fn python_docstring(source: &[u8], def_node: Node) -> Option<String> {
    let body = def_node.child_by_field_name("body")?;
    let mut cursor = body.walk();
    let first_stmt = body.children(&mut cursor).next()?;
    if first_stmt.kind() != "expression_statement" {
        return None;
    }
    let mut cursor2 = first_stmt.walk();
    let string_node = first_stmt.children(&mut cursor2).find(|c| c.kind() == "string")?;
    Some(strip_quotes(node_text(source, string_node)))
}

fn python_module_docstring(source: &[u8], root: Node) -> Option<String> {
    let mut cursor = root.walk();
    let first_stmt = root.children(&mut cursor).next()?;
    if first_stmt.kind() != "expression_statement" {
        return None;
    }
    let mut cursor2 = first_stmt.walk();
    let string_node = first_stmt.children(&mut cursor2).find(|c| c.kind() == "string")?;
    Some(strip_quotes(node_text(source, string_node)))
}

fn strip_quotes(s: &str) -> String {
    let t = s.trim();
    for q in ["\"\"\"", "'''"] {
        if let Some(inner) = t.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner.trim().to_string();
        }
    }
    t.trim_matches(['"', '\'']).trim().to_string()
}

fn extract_comments_generic(ctx: &ExtractCtx, language: &Language, root: Node, _marker: &str) -> Vec<Symbol> {
    let mut out = Vec::new();
    for row in run_captures(language, root, ctx.source, "(comment) @c") {
        if let Some((_, node)) = row.first() {
            let text = node_text(ctx.source, *node).trim().to_string();
            if text.is_empty() {
                continue;
            }
            let upper = text.to_ascii_uppercase();
            let name = if upper.contains("TODO") {
                "TODO"
            } else if upper.contains("FIXME") {
                "FIXME"
            } else {
                "comment"
            };
            out.push(make_symbol(ctx, name, SymbolKind::Comment, *node, None, None, None, vec![]));
        }
    }
    out
}

/// Environment-variable access patterns, e.g. `os.environ.get("NAME")` or
/// `process.env.NAME`. A lightweight text scan rather than a query, since
/// the call shape varies too much across languages for one tree pattern.
fn extract_env_vars(ctx: &ExtractCtx, source: &[u8], patterns: &[&str]) -> Vec<Symbol> {
    let text = std::str::from_utf8(source).unwrap_or("");
    let mut out = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        for pattern in patterns {
            if let Some(idx) = line.find(pattern) {
                let rest = &line[idx..];
                let var_name = rest
                    .chars()
                    .skip_while(|c| !c.is_ascii_uppercase())
                    .take_while(|c| c.is_ascii_uppercase() || *c == '_' || c.is_ascii_digit())
                    .collect::<String>();
                if var_name.is_empty() {
                    continue;
                }
                let start = text.lines().take(line_no).map(|l| l.len() + 1).sum();
                out.push(Symbol {
                    id: make_id(ctx.path, line_no as u32, SymbolKind::EnvVar, &var_name),
                    name: var_name,
                    kind: SymbolKind::EnvVar,
                    file: ctx.path.to_string(),
                    language: ctx.language.as_str().to_string(),
                    start_line: line_no as u32,
                    end_line: line_no as u32,
                    start_byte: start,
                    end_byte: start + line.len(),
                    parent: None,
                    signature: None,
                    docstring: None,
                    code_snippet: line.trim().to_string(),
                    file_checksum: ctx.file_checksum.to_string(),
                    method_names: vec![],
                });
            }
        }
    }
    out
}

/// Category tag for an env var name, used by the embedder's context builder.
pub fn env_var_category(name: &str) -> &'static str {
    let upper = name.to_ascii_uppercase();
    if upper.contains("SECRET") || upper.contains("KEY") || upper.contains("TOKEN") || upper.contains("PASSWORD") {
        "credentials/secrets"
    } else if upper.contains("PATH") || upper.contains("DIR") || upper.contains("FILE") {
        "filesystem/paths"
    } else if upper.contains("DEBUG") || upper.contains("LOG") {
        "debugging/logging"
    } else {
        "configuration/connection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp(contents: &str, ext: &str) -> tempfile::TempPath {
        let mut f = tempfile::Builder::new().suffix(&format!(".{ext}")).tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.into_temp_path()
    }

    #[test]
    fn detects_language_from_extension() {
        assert_eq!(detect_language(Path::new("a.py")), Some(SourceLanguage::Python));
        assert_eq!(detect_language(Path::new("a.tsx")), Some(SourceLanguage::Tsx));
        assert_eq!(detect_language(Path::new("a.ts")), Some(SourceLanguage::TypeScript));
        assert_eq!(detect_language(Path::new("a.js")), Some(SourceLanguage::JavaScript));
        assert_eq!(detect_language(Path::new("a.rs")), None);
    }

    #[test]
    fn extracts_python_function_and_class() {
        let path = write_tmp(
            "def authenticate_user(username, password):\n    \"\"\"Authenticate user credentials\"\"\"\n    return True\n\nclass Session:\n    def start(self):\n        pass\n",
            "py",
        );
        let symbols = extract(&path, true).unwrap();
        let func = symbols.iter().find(|s| s.name == "authenticate_user").unwrap();
        assert_eq!(func.kind, SymbolKind::Function);
        assert_eq!(func.docstring.as_deref(), Some("Authenticate user credentials"));

        let class = symbols.iter().find(|s| s.name == "Session").unwrap();
        assert_eq!(class.kind, SymbolKind::Class);
        assert!(class.method_names.contains(&"start".to_string()));
    }

    #[test]
    fn skips_oversized_files() {
        let huge = "x = 1\n".repeat(200_000);
        let path = write_tmp(&huge, "py");
        let symbols = extract(&path, false).unwrap();
        assert!(symbols.is_empty());
    }

    #[test]
    fn extracts_typescript_class_and_method() {
        let path = write_tmp(
            "class Widget {\n  render(): string {\n    return 'x';\n  }\n}\n",
            "ts",
        );
        let symbols = extract(&path, false).unwrap();
        assert!(symbols.iter().any(|s| s.name == "Widget" && s.kind == SymbolKind::Class));
        assert!(symbols.iter().any(|s| s.name == "render" && s.kind == SymbolKind::Method));
    }

    #[test]
    fn env_var_category_classifies_known_patterns() {
        assert_eq!(env_var_category("DB_SECRET_KEY"), "credentials/secrets");
        assert_eq!(env_var_category("LOG_LEVEL"), "debugging/logging");
        assert_eq!(env_var_category("DATA_DIR"), "filesystem/paths");
        assert_eq!(env_var_category("MAX_WORKERS"), "configuration/connection");
    }
}
