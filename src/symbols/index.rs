use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use tree_sitter::{Query, QueryCursor, StreamingIterator};

use crate::verify::languages::LanguageConfig;

static TYPE_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^\s*(?:(?:pub(?:\([^)]*\))?|public|private|protected|internal|export|default|abstract|final|static|sealed|open|data|partial)\s+)*(?:class|struct|interface|enum|trait|record|object)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .unwrap()
});

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub original_name: String,
    pub new_name: String,
    pub namespace: String,
    pub source_path: PathBuf,
}

impl SymbolEntry {
    pub fn is_rename(&self) -> bool {
        self.original_name != self.new_name
    }
}

/// Project-wide map from original identifier to its replacement.
///
/// Append-only: the first entry recorded for a name wins.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    entries: BTreeMap<String, SymbolEntry>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when `original_name` is already indexed.
    pub fn insert(&mut self, entry: SymbolEntry) -> bool {
        if let Some(existing) = self.entries.get(&entry.original_name) {
            warn!(
                "symbol {} already indexed from {}, ignoring {}",
                entry.original_name,
                existing.source_path.display(),
                entry.source_path.display()
            );
            return false;
        }
        self.entries.insert(entry.original_name.clone(), entry);
        true
    }

    pub fn get(&self, original_name: &str) -> Option<&SymbolEntry> {
        self.entries.get(original_name)
    }

    pub fn by_path(&self, path: &Path) -> Option<&SymbolEntry> {
        self.entries.values().find(|e| e.source_path == path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.values()
    }

    /// Entries whose new name differs from the original.
    pub fn renames(&self) -> impl Iterator<Item = &SymbolEntry> {
        self.entries.values().filter(|e| e.is_rename())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extracts the primary type name and namespace of translated files.
pub struct SymbolIndexer {
    config: Option<LanguageConfig>,
    type_query: Option<Query>,
    namespace_query: Option<Query>,
    source_roots: Vec<PathBuf>,
}

impl SymbolIndexer {
    pub fn new(config: Option<LanguageConfig>) -> Self {
        let compile = |source: &str| -> Option<Query> {
            let config = config.as_ref()?;
            if source.is_empty() {
                return None;
            }
            Query::new(&config.language, source).ok()
        };
        let type_query = config.as_ref().and_then(|c| compile(c.type_query));
        let namespace_query = config.as_ref().and_then(|c| compile(c.namespace_query));
        Self {
            config,
            type_query,
            namespace_query,
            source_roots: Vec::new(),
        }
    }

    pub fn for_language(language: &str) -> Self {
        Self::new(LanguageConfig::get_by_name(language))
    }

    /// Directory prefixes (e.g. `src/main/java`) that carry no namespace.
    pub fn with_source_roots(mut self, roots: &[String]) -> Self {
        self.source_roots = roots.iter().map(PathBuf::from).collect();
        self
    }

    /// First type-like declaration: parser query, then a declaration
    /// heuristic, then the file stem in PascalCase.
    pub fn primary_name(&self, code: &str, path: &Path) -> String {
        if let Some(name) = self.query_name(code) {
            return name;
        }
        if let Some(caps) = TYPE_DECLARATION.captures(code) {
            return caps[1].to_string();
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        normalize_name(stem)
    }

    /// Builds the entry for one translated file. `generated` is used as the
    /// new name only when it is a plain identifier.
    pub fn entry(&self, path: &Path, code: &str, generated: Option<&str>) -> SymbolEntry {
        let original_name = self.primary_name(code, path);
        let new_name = match generated.map(str::trim) {
            Some(name) if is_identifier(name) => name.to_string(),
            Some(name) => {
                debug!("ignoring generated name {name:?} for {}", path.display());
                original_name.clone()
            }
            None => original_name.clone(),
        };
        let declared = self.declared_namespace(code);
        SymbolEntry {
            original_name,
            new_name,
            namespace: expected_namespace(
                path,
                declared.as_deref(),
                self.config.as_ref(),
                &self.source_roots,
            ),
            source_path: path.to_path_buf(),
        }
    }

    /// Path of the first namespace/package declaration in `code`.
    pub fn declared_namespace(&self, code: &str) -> Option<String> {
        let config = self.config.as_ref()?;
        let query = self.namespace_query.as_ref()?;
        let tree = config.parse(code)?;
        captures(query, "namespace", tree.root_node(), code.as_bytes())
            .into_iter()
            .min_by_key(|(start, _, _)| *start)
            .map(|(_, _, text)| text)
    }

    fn query_name(&self, code: &str) -> Option<String> {
        let config = self.config.as_ref()?;
        let query = self.type_query.as_ref()?;
        let tree = config.parse(code)?;
        let source = code.as_bytes();

        let mut cursor = QueryCursor::new();
        let mut matches = cursor.matches(query, tree.root_node(), source);
        let mut first: Option<(usize, String)> = None;
        while let Some(m) = matches.next() {
            for cap in m.captures {
                if query.capture_names()[cap.index as usize] != "name" {
                    continue;
                }
                let start = cap.node.start_byte();
                if first.as_ref().is_some_and(|(s, _)| *s <= start) {
                    continue;
                }
                if let Ok(text) = cap.node.utf8_text(source) {
                    first = Some((start, text.to_string()));
                }
            }
        }
        first.map(|(_, name)| name)
    }
}

/// Namespace implied by the directory of `path`, joined with the language's
/// separator. Languages whose declarations name only the innermost package
/// get the last directory alone.
pub fn namespace_for(path: &Path, config: Option<&LanguageConfig>) -> String {
    let segments: Vec<&str> = path
        .parent()
        .map(|p| p.iter().filter_map(|s| s.to_str()).collect())
        .unwrap_or_default();

    match config {
        Some(c) if c.leaf_namespace => segments.last().copied().unwrap_or_default().to_string(),
        Some(c) => segments.join(c.namespace_separator),
        None => segments.join("."),
    }
}

/// `path` below the longest matching source root, or `path` itself.
pub fn strip_source_root<'p>(path: &'p Path, source_roots: &[PathBuf]) -> &'p Path {
    source_roots
        .iter()
        .filter_map(|root| path.strip_prefix(root).ok().map(|rest| (root, rest)))
        .max_by_key(|(root, _)| root.components().count())
        .map_or(path, |(_, rest)| rest)
}

/// Namespace a file should declare. A `declared` namespace whose segments end
/// the file's directory path already agrees with its location and is kept;
/// otherwise the directory below its source root decides.
pub fn expected_namespace(
    path: &Path,
    declared: Option<&str>,
    config: Option<&LanguageConfig>,
    source_roots: &[PathBuf],
) -> String {
    let separator = config.map_or(".", |c| c.namespace_separator);
    if let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) {
        let directories: Vec<&str> = path
            .parent()
            .map(|p| p.iter().filter_map(|s| s.to_str()).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = declared.split(separator).collect();
        if directories.ends_with(&segments) {
            return declared.to_string();
        }
    }
    namespace_for(strip_source_root(path, source_roots), config)
}

/// `(start byte, end byte, text)` of every `capture` in `query` matches.
pub(crate) fn captures(
    query: &Query,
    capture: &str,
    root: tree_sitter::Node,
    source: &[u8],
) -> Vec<(usize, usize, String)> {
    let mut found = Vec::new();
    let mut cursor = QueryCursor::new();
    let mut matches = cursor.matches(query, root, source);
    while let Some(m) = matches.next() {
        for cap in m.captures {
            if query.capture_names()[cap.index as usize] != capture {
                continue;
            }
            if let Ok(text) = cap.node.utf8_text(source) {
                found.push((cap.node.start_byte(), cap.node.end_byte(), text.to_string()));
            }
        }
    }
    found
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// `user_service-impl` -> `UserServiceImpl`.
pub fn normalize_name(stem: &str) -> String {
    let name: String = stem
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect();

    if name.is_empty() {
        "Unnamed".to_string()
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{name}")
    } else {
        name
    }
}
