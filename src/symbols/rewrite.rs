use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::{debug, info, warn};
use tree_sitter::Query;

use super::index::{SymbolIndex, captures, expected_namespace};
use crate::verify::languages::LanguageConfig;

/// How a construct kind is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteStrategy {
    /// Namespace declarations and import paths, located through the syntax
    /// tree so only genuine path positions are edited.
    Structural,
    /// Remaining identifier references, replaced on word boundaries.
    WholeWord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteReport {
    /// Passes over the whole tree, including the final unchanged one.
    pub iterations: usize,
    pub converged: bool,
    pub files_changed: BTreeSet<PathBuf>,
}

struct Edit {
    start: usize,
    end: usize,
    text: String,
}

/// Rewrites references across all translated files until a pass changes
/// nothing, or `max_iterations` passes have run.
pub struct CrossFileRewriter<'a> {
    index: &'a SymbolIndex,
    config: Option<LanguageConfig>,
    namespace_query: Option<Query>,
    import_query: Option<Query>,
    renames: HashMap<String, String>,
    pattern: Option<Regex>,
    max_iterations: usize,
    source_roots: Vec<PathBuf>,
}

impl<'a> CrossFileRewriter<'a> {
    pub fn new(index: &'a SymbolIndex, config: Option<LanguageConfig>, max_iterations: usize) -> Self {
        let compile = |source: &str| -> Option<Query> {
            let config = config.as_ref()?;
            if source.is_empty() {
                return None;
            }
            Query::new(&config.language, source).ok()
        };
        let namespace_query = config.as_ref().and_then(|c| compile(c.namespace_query));
        let import_query = config.as_ref().and_then(|c| compile(c.import_query));

        let renames: HashMap<String, String> = index
            .renames()
            .map(|e| (e.original_name.clone(), e.new_name.clone()))
            .collect();

        let mut names: Vec<&str> = renames.keys().map(String::as_str).collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let pattern = (!names.is_empty()).then(|| {
            let alternation: Vec<String> = names.iter().map(|n| regex::escape(n)).collect();
            // Escaped identifiers cannot make this pattern invalid.
            Regex::new(&format!(r"\b(?:{})\b", alternation.join("|"))).unwrap()
        });

        Self {
            index,
            config,
            namespace_query,
            import_query,
            renames,
            pattern,
            max_iterations: max_iterations.max(1),
            source_roots: Vec::new(),
        }
    }

    pub fn for_language(index: &'a SymbolIndex, language: &str, max_iterations: usize) -> Self {
        Self::new(index, LanguageConfig::get_by_name(language), max_iterations)
    }

    /// Directory prefixes that carry no namespace, for files the index
    /// does not know.
    pub fn with_source_roots(mut self, roots: &[String]) -> Self {
        self.source_roots = roots.iter().map(PathBuf::from).collect();
        self
    }

    /// One pass over one file, structural edits first.
    pub fn rewrite_file(&self, path: &Path, code: &str) -> String {
        let structural = self.apply(RewriteStrategy::Structural, path, code);
        self.apply(RewriteStrategy::WholeWord, path, &structural)
    }

    pub fn apply(&self, strategy: RewriteStrategy, path: &Path, code: &str) -> String {
        match strategy {
            RewriteStrategy::Structural => self.rewrite_structure(path, code),
            RewriteStrategy::WholeWord => self.rewrite_identifiers(code),
        }
    }

    /// Rewrites every file in place until a pass modifies none.
    pub fn rewrite_all(&self, files: &mut BTreeMap<PathBuf, String>) -> RewriteReport {
        let mut report = RewriteReport::default();

        while report.iterations < self.max_iterations {
            report.iterations += 1;
            let mut changed = 0;

            for (path, code) in files.iter_mut() {
                let rewritten = self.rewrite_file(path, code);
                if rewritten != *code {
                    *code = rewritten;
                    changed += 1;
                    report.files_changed.insert(path.clone());
                }
            }

            debug!("rewrite pass {} changed {changed} file(s)", report.iterations);
            if changed == 0 {
                report.converged = true;
                break;
            }
        }

        if report.converged {
            info!(
                "cross-file rewrite converged after {} pass(es), {} file(s) changed",
                report.iterations,
                report.files_changed.len()
            );
        } else {
            warn!(
                "cross-file rewrite did not converge within {} passes; renames may be cyclic",
                self.max_iterations
            );
        }
        report
    }

    fn rewrite_identifiers(&self, code: &str) -> String {
        let Some(pattern) = &self.pattern else {
            return code.to_string();
        };
        pattern
            .replace_all(code, |caps: &Captures| {
                self.renames
                    .get(&caps[0])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    fn rewrite_structure(&self, path: &Path, code: &str) -> String {
        let Some(config) = &self.config else {
            return code.to_string();
        };
        if self.namespace_query.is_none() && self.import_query.is_none() {
            return code.to_string();
        }
        let Some(tree) = config.parse(code) else {
            return code.to_string();
        };
        let source = code.as_bytes();
        let mut edits = Vec::new();

        if let Some(query) = &self.namespace_query {
            let indexed = self.index.by_path(path).map(|e| e.namespace.clone());
            for (start, end, text) in captures(query, "namespace", tree.root_node(), source) {
                let expected = indexed.clone().unwrap_or_else(|| {
                    expected_namespace(path, Some(&text), Some(config), &self.source_roots)
                });
                if !expected.is_empty() && text != expected {
                    edits.push(Edit {
                        start,
                        end,
                        text: expected,
                    });
                }
            }
        }

        if let Some(query) = &self.import_query {
            for (start, end, text) in captures(query, "import", tree.root_node(), source) {
                if let Some(rewritten) = self.rewrite_import(config, &text) {
                    edits.push(Edit {
                        start,
                        end,
                        text: rewritten,
                    });
                }
            }
        }

        if edits.is_empty() {
            return code.to_string();
        }
        edits.sort_by_key(|e| e.start);
        edits.dedup_by_key(|e| e.start);

        let mut out = code.to_string();
        for edit in edits.iter().rev() {
            out.replace_range(edit.start..edit.end, &edit.text);
        }
        out
    }

    /// Maps the last path segment through the index. Unquoted paths also
    /// take the entry's namespace as their prefix.
    fn rewrite_import(&self, config: &LanguageConfig, path: &str) -> Option<String> {
        let separator = config.namespace_separator;

        if config.quoted_imports {
            let quote = path.chars().next().filter(|c| matches!(c, '"' | '\'' | '`'))?;
            let inner = path.strip_prefix(quote)?.strip_suffix(quote)?;
            let (prefix, last) = match inner.rsplit_once(separator) {
                Some((prefix, last)) => (Some(prefix), last),
                None => (None, inner),
            };
            let new_name = self.renames.get(last)?;
            let rewritten = match prefix {
                Some(prefix) => format!("{prefix}{separator}{new_name}"),
                None => new_name.clone(),
            };
            return Some(format!("{quote}{rewritten}{quote}"));
        }

        // Follows a rename, and a namespace move where the language declares
        // namespaces.
        let last = path.rsplit(separator).next()?;
        let entry = self
            .index
            .get(last)
            .filter(|e| e.is_rename() || self.namespace_query.is_some())?;
        let rewritten = if entry.namespace.is_empty() {
            match path.rsplit_once(separator) {
                Some((prefix, _)) => format!("{prefix}{separator}{}", entry.new_name),
                None => entry.new_name.clone(),
            }
        } else {
            format!("{}{separator}{}", entry.namespace, entry.new_name)
        };
        (rewritten != path).then_some(rewritten)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolEntry;

    fn index(entries: &[(&str, &str, &str, &str)]) -> SymbolIndex {
        let mut index = SymbolIndex::new();
        for (original, new, namespace, path) in entries {
            index.insert(SymbolEntry {
                original_name: original.to_string(),
                new_name: new.to_string(),
                namespace: namespace.to_string(),
                source_path: PathBuf::from(path),
            });
        }
        index
    }

    #[test]
    fn test_import_and_call_rewritten_then_stable() {
        let index = index(&[("OldName", "NewName", "com.acme", "com/acme/OldName.java")]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 10);

        let path = PathBuf::from("com/app/Main.java");
        let code = "package com.app;\n\nimport com.acme.OldName;\n\nclass Main {\n    void run() {\n        OldName.start();\n    }\n}\n";

        let once = rewriter.rewrite_file(&path, code);
        assert!(once.contains("import com.acme.NewName;"));
        assert!(once.contains("NewName.start();"));
        assert!(!once.contains("OldName"));

        let twice = rewriter.rewrite_file(&path, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_import_follows_moved_namespace() {
        let index = index(&[("Invoice", "Invoice", "billing", "billing/Invoice.java")]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 10);

        let mut files = BTreeMap::new();
        files.insert(
            PathBuf::from("billing/Invoice.java"),
            "package legacy;\n\npublic class Invoice {}\n".to_string(),
        );
        files.insert(
            PathBuf::from("app/Main.java"),
            "package app;\n\nimport legacy.Invoice;\n\nclass Main {\n    Invoice open;\n}\n".to_string(),
        );

        let report = rewriter.rewrite_all(&mut files);
        assert!(report.converged);
        assert!(files[Path::new("billing/Invoice.java")].starts_with("package billing;"));
        assert!(files[Path::new("app/Main.java")].contains("import billing.Invoice;"));

        let again = rewriter.rewrite_all(&mut files);
        assert!(again.files_changed.is_empty());
    }

    #[test]
    fn test_declaration_below_source_root_is_kept() {
        let index = index(&[]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 10)
            .with_source_roots(&["src/main/java".to_string()]);
        let path = Path::new("src/main/java/com/acme/Foo.java");

        let kept = "package com.acme;\n\nclass Foo {}\n";
        assert_eq!(rewriter.apply(RewriteStrategy::Structural, path, kept), kept);

        let moved = rewriter.apply(RewriteStrategy::Structural, path, "package legacy;\n\nclass Foo {}\n");
        assert_eq!(moved, "package com.acme;\n\nclass Foo {}\n");
    }

    #[test]
    fn test_whole_word_only() {
        let index = index(&[("Foo", "Bar", "", "Foo.py")]);
        let rewriter = CrossFileRewriter::for_language(&index, "python", 10);
        let out = rewriter.apply(
            RewriteStrategy::WholeWord,
            Path::new("x.py"),
            "x = Foo()\ny = FooBar()\nz = my_Foo\n",
        );
        assert_eq!(out, "x = Bar()\ny = FooBar()\nz = my_Foo\n");
    }

    #[test]
    fn test_namespace_declaration_follows_directory() {
        let index = index(&[]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 10);
        let out = rewriter.apply(
            RewriteStrategy::Structural,
            Path::new("billing/core/Invoice.java"),
            "package legacy.stuff;\n\nclass Invoice {}\n",
        );
        assert_eq!(out, "package billing.core;\n\nclass Invoice {}\n");
    }

    #[test]
    fn test_go_package_uses_leaf_directory() {
        let index = index(&[]);
        let rewriter = CrossFileRewriter::for_language(&index, "go", 10);
        let out = rewriter.apply(
            RewriteStrategy::Structural,
            Path::new("internal/billing/invoice.go"),
            "package legacy\n\ntype Invoice struct{}\n",
        );
        assert_eq!(out, "package billing\n\ntype Invoice struct{}\n");
    }

    #[test]
    fn test_quoted_import_last_segment() {
        let index = index(&[("old_util", "new_util", "", "old_util.ts")]);
        let rewriter = CrossFileRewriter::for_language(&index, "typescript", 10);
        let out = rewriter.apply(
            RewriteStrategy::Structural,
            Path::new("app.ts"),
            "import { a } from './lib/old_util';\n",
        );
        assert_eq!(out, "import { a } from './lib/new_util';\n");
    }

    #[test]
    fn test_rewrite_all_reaches_fixed_point() {
        let index = index(&[
            ("Alpha", "Beta", "", "Alpha.java"),
            ("Beta", "Gamma", "", "Beta.java"),
        ]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 10);

        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("A.java"), "class A { Alpha a; }\n".to_string());
        files.insert(PathBuf::from("B.java"), "class B { int n; }\n".to_string());

        let report = rewriter.rewrite_all(&mut files);
        assert!(report.converged);
        assert_eq!(files[Path::new("A.java")], "class A { Gamma a; }\n");
        assert_eq!(report.files_changed.len(), 1);

        let again = rewriter.rewrite_all(&mut files);
        assert_eq!(again.iterations, 1);
        assert!(again.files_changed.is_empty());
    }

    #[test]
    fn test_cyclic_renames_hit_the_cap() {
        let index = index(&[("A", "B", "", "A.java"), ("B", "A", "", "B.java")]);
        let rewriter = CrossFileRewriter::for_language(&index, "java", 4);

        let mut files = BTreeMap::new();
        files.insert(PathBuf::from("X.java"), "class X { A a; }\n".to_string());

        let report = rewriter.rewrite_all(&mut files);
        assert!(!report.converged);
        assert_eq!(report.iterations, 4);
    }

    #[test]
    fn test_no_renames_is_identity() {
        let index = index(&[("Same", "Same", "", "Same.rs")]);
        let rewriter = CrossFileRewriter::for_language(&index, "rust", 3);
        let code = "struct Same;\n";
        assert_eq!(rewriter.rewrite_file(Path::new("Same.rs"), code), code);
    }
}
