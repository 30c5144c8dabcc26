use tree_sitter::{Language, Parser, Tree};

/// Grammar and structural queries for one target language.
#[derive(Clone)]
pub struct LanguageConfig {
    pub name: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    /// Captures `@name` on type-like declarations.
    pub type_query: &'static str,
    /// Captures `@namespace` on the path of a package/namespace declaration.
    pub namespace_query: &'static str,
    /// Captures `@import` on the path of an import-like statement.
    pub import_query: &'static str,
    pub namespace_separator: &'static str,
    /// Import paths are string literals (relative module paths).
    pub quoted_imports: bool,
    /// Namespace declarations name only the innermost segment (Go packages).
    pub leaf_namespace: bool,
}

impl LanguageConfig {
    pub fn get_all() -> Vec<LanguageConfig> {
        vec![
            java_config(),
            go_config(),
            python_config(),
            typescript_config(),
            javascript_config(),
            rust_config(),
        ]
    }

    pub fn get_by_extension(ext: &str) -> Option<LanguageConfig> {
        let ext = ext.trim_start_matches('.');
        Self::get_all()
            .into_iter()
            .find(|c| c.extensions.contains(&ext))
    }

    /// By name, falling back to the grammar that owns `extension`.
    pub fn resolve(name: &str, extension: &str) -> Option<LanguageConfig> {
        Self::get_by_name(name).or_else(|| Self::get_by_extension(extension))
    }

    pub fn get_by_name(name: &str) -> Option<LanguageConfig> {
        let name = name.trim().to_ascii_lowercase();
        let name = match name.as_str() {
            "golang" => "go",
            "py" => "python",
            "ts" => "typescript",
            "js" => "javascript",
            "rs" => "rust",
            other => other,
        };
        Self::get_all().into_iter().find(|c| c.name == name)
    }

    /// Parses `code`; `None` when the grammar cannot be loaded or the parser
    /// gives up.
    pub fn parse(&self, code: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        parser.set_language(&self.language).ok()?;
        parser.parse(code, None)
    }
}

fn java_config() -> LanguageConfig {
    LanguageConfig {
        name: "java",
        language: tree_sitter_java::LANGUAGE.into(),
        extensions: &["java"],
        type_query: r#"
(class_declaration
  name: (identifier) @name)

(interface_declaration
  name: (identifier) @name)

(enum_declaration
  name: (identifier) @name)

(record_declaration
  name: (identifier) @name)
"#,
        namespace_query: r#"
(package_declaration
  (scoped_identifier) @namespace)
(package_declaration
  (identifier) @namespace)
"#,
        import_query: r#"
(import_declaration
  (scoped_identifier) @import)
(import_declaration
  (identifier) @import)
"#,
        namespace_separator: ".",
        quoted_imports: false,
        leaf_namespace: false,
    }
}

fn go_config() -> LanguageConfig {
    LanguageConfig {
        name: "go",
        language: tree_sitter_go::LANGUAGE.into(),
        extensions: &["go"],
        type_query: r#"
(type_spec
  name: (type_identifier) @name)
"#,
        namespace_query: r#"
(package_clause
  (package_identifier) @namespace)
"#,
        import_query: r#"
(import_spec
  path: (interpreted_string_literal) @import)
"#,
        namespace_separator: "/",
        quoted_imports: true,
        leaf_namespace: true,
    }
}

fn python_config() -> LanguageConfig {
    LanguageConfig {
        name: "python",
        language: tree_sitter_python::LANGUAGE.into(),
        extensions: &["py"],
        type_query: r#"
(class_definition
  name: (identifier) @name)
"#,
        namespace_query: "",
        import_query: r#"
(import_statement
  name: (dotted_name) @import)
(import_from_statement
  module_name: (dotted_name) @import)
"#,
        namespace_separator: ".",
        quoted_imports: false,
        leaf_namespace: false,
    }
}

fn typescript_config() -> LanguageConfig {
    LanguageConfig {
        name: "typescript",
        language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        extensions: &["ts", "tsx"],
        type_query: r#"
(class_declaration
  name: (type_identifier) @name)

(interface_declaration
  name: (type_identifier) @name)
"#,
        namespace_query: "",
        import_query: r#"
(import_statement
  source: (string) @import)
"#,
        namespace_separator: "/",
        quoted_imports: true,
        leaf_namespace: false,
    }
}

fn javascript_config() -> LanguageConfig {
    LanguageConfig {
        name: "javascript",
        language: tree_sitter_javascript::LANGUAGE.into(),
        extensions: &["js", "jsx"],
        type_query: r#"
(class_declaration
  name: (identifier) @name)
"#,
        namespace_query: "",
        import_query: r#"
(import_statement
  source: (string) @import)
"#,
        namespace_separator: "/",
        quoted_imports: true,
        leaf_namespace: false,
    }
}

fn rust_config() -> LanguageConfig {
    LanguageConfig {
        name: "rust",
        language: tree_sitter_rust::LANGUAGE.into(),
        extensions: &["rs"],
        type_query: r#"
(struct_item
  name: (type_identifier) @name)

(enum_item
  name: (type_identifier) @name)

(trait_item
  name: (type_identifier) @name)
"#,
        namespace_query: "",
        import_query: r#"
(use_declaration
  argument: (scoped_identifier) @import)
"#,
        namespace_separator: "::",
        quoted_imports: false,
        leaf_namespace: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Query;

    #[test]
    fn test_all_queries_compile() {
        for config in LanguageConfig::get_all() {
            for query in [config.type_query, config.namespace_query, config.import_query] {
                if query.is_empty() {
                    continue;
                }
                assert!(
                    Query::new(&config.language, query).is_ok(),
                    "query failed to compile for {}",
                    config.name
                );
            }
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(LanguageConfig::get_by_name("Java").unwrap().name, "java");
        assert_eq!(LanguageConfig::get_by_name("golang").unwrap().name, "go");
        assert_eq!(LanguageConfig::get_by_extension(".rs").unwrap().name, "rust");
        assert!(LanguageConfig::get_by_name("cobol").is_none());
        assert_eq!(LanguageConfig::resolve("TypeScript 5", ".tsx").unwrap().name, "typescript");
        assert!(LanguageConfig::resolve("cobol", ".cbl").is_none());
    }
}
