use tree_sitter::Node;

use super::languages::LanguageConfig;
use super::{SyntaxError, SyntaxVerifier};

const SNIPPET_CHARS: usize = 40;

/// Reports tree-sitter `ERROR` and `MISSING` nodes as syntax errors.
pub struct TreeSitterVerifier {
    config: LanguageConfig,
}

impl TreeSitterVerifier {
    pub fn new(config: LanguageConfig) -> Self {
        Self { config }
    }

    pub fn for_language(name: &str) -> Option<Self> {
        LanguageConfig::get_by_name(name).map(Self::new)
    }

    pub fn language(&self) -> &LanguageConfig {
        &self.config
    }
}

impl SyntaxVerifier for TreeSitterVerifier {
    fn verify(&self, code: &str) -> Vec<SyntaxError> {
        let Some(tree) = self.config.parse(code) else {
            return vec![SyntaxError::unlocated(format!(
                "{} parser produced no syntax tree",
                self.config.name
            ))];
        };

        let root = tree.root_node();
        if !root.has_error() {
            return Vec::new();
        }

        let mut errors = Vec::new();
        collect_errors(root, code.as_bytes(), &mut errors);
        if errors.is_empty() {
            errors.push(SyntaxError::unlocated("unspecified syntax error"));
        }
        errors
    }
}

fn collect_errors(node: Node, source: &[u8], errors: &mut Vec<SyntaxError>) {
    let line = node.start_position().row as i64 + 1;

    if node.is_missing() {
        errors.push(SyntaxError::new(format!("missing `{}`", node.kind()), line));
        return;
    }
    if node.is_error() {
        let text = node.utf8_text(source).unwrap_or_default();
        let first_line = text.lines().next().unwrap_or_default().trim();
        let snippet: String = first_line.chars().take(SNIPPET_CHARS).collect();
        errors.push(SyntaxError::new(format!("unexpected `{snippet}`"), line));
        return;
    }
    if !node.has_error() {
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_errors(child, source, errors);
    }
}
