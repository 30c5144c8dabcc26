/// Configuration module for codeshift.
///
/// Handles loading, validating, and providing default settings values.
/// Settings are read from YAML; a missing file at the default path produces a
/// template the user can fill in.
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::TranslateError;
use crate::verify::languages::LanguageConfig;

pub const DEFAULT_SETTINGS_PATH: &str = "settings.yaml";

// ── Default value functions ──────────────────────────────────────────

fn default_input_extensions() -> Vec<String> {
    vec![".java".to_string()]
}

fn default_max_tokens() -> usize {
    4096
}

fn default_max_chunk_size() -> usize {
    2000
}

fn default_class_structure_threshold() -> usize {
    1500
}

fn default_opening_tag() -> String {
    "<code>".to_string()
}

fn default_closing_tag() -> String {
    "</code>".to_string()
}

fn default_block_start_pattern() -> String {
    r"^\s*((public|private|protected|internal|abstract|final|static|sealed|export|pub)\s+)*(class|interface|struct|enum|trait|record)\b".to_string()
}

fn default_block_end_pattern() -> String {
    r"\{".to_string()
}

fn default_open_symbol() -> String {
    "{".to_string()
}

fn default_close_symbol() -> String {
    "}".to_string()
}

fn default_source_roots() -> Vec<String> {
    ["src/main/java", "src/test/java", "src/main/kotlin", "src/test/kotlin"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_small_file_threshold() -> usize {
    300
}

fn default_history_limit() -> usize {
    10
}

fn default_max_redo_attempts() -> usize {
    2
}

fn default_max_continuations() -> usize {
    16
}

fn default_max_repair_depth() -> usize {
    3
}

fn default_max_fix_attempts() -> usize {
    5
}

fn default_max_rewrite_iterations() -> usize {
    10
}

fn default_checkpoint_path() -> String {
    ".codeshift/checkpoint.json".to_string()
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_timeout_secs() -> u64 {
    500
}

// ── Settings structs ─────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Target language identifier, e.g. `java`, `rust`, `python`.
    #[serde(default)]
    pub target_language: String,

    #[serde(default = "default_input_extensions")]
    pub input_extensions: Vec<String>,

    /// Extension (with leading dot) given to every output file.
    #[serde(default)]
    pub output_extension: String,

    /// Free-text instruction sent with every chunk.
    #[serde(default)]
    pub prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Character budget per chunk.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Structural chunks longer than this are translated as skeleton + methods.
    #[serde(default = "default_class_structure_threshold")]
    pub class_structure_threshold: usize,

    #[serde(default = "default_opening_tag")]
    pub opening_tag: String,

    #[serde(default = "default_closing_tag")]
    pub closing_tag: String,

    #[serde(default = "default_block_start_pattern")]
    pub block_start_pattern: String,

    #[serde(default = "default_block_end_pattern")]
    pub block_end_pattern: String,

    #[serde(default = "default_open_symbol")]
    pub block_open_symbol: String,

    #[serde(default = "default_close_symbol")]
    pub block_close_symbol: String,

    /// Carry a running summary of already translated files as context.
    #[serde(default)]
    pub include_meta: bool,

    /// Ask the service for new primary type names and rename outputs.
    #[serde(default)]
    pub use_generated_names: bool,

    #[serde(default)]
    pub merge_small_files: bool,

    #[serde(default = "default_small_file_threshold")]
    pub small_file_threshold: usize,

    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_max_redo_attempts")]
    pub max_redo_attempts: usize,

    #[serde(default = "default_max_continuations")]
    pub max_continuations: usize,

    #[serde(default = "default_max_repair_depth")]
    pub max_repair_depth: usize,

    #[serde(default = "default_max_fix_attempts")]
    pub max_fix_attempts: usize,

    #[serde(default = "default_max_rewrite_iterations")]
    pub max_rewrite_iterations: usize,

    /// Glob patterns (relative to the input root) that are never translated.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Directory prefixes (relative to the input root) that carry no
    /// namespace, e.g. `src/main/java`.
    #[serde(default = "default_source_roots")]
    pub source_roots: Vec<String>,

    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: String,

    #[serde(default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// `openai`, `claude` or `custom`.
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub api_url: String,

    /// Empty means "read the provider's environment variable".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    #[serde(default)]
    pub model: String,

    #[serde(default)]
    pub api_version: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: String::new(),
            input_extensions: default_input_extensions(),
            output_extension: String::new(),
            prompt: String::new(),
            max_tokens: default_max_tokens(),
            max_chunk_size: default_max_chunk_size(),
            class_structure_threshold: default_class_structure_threshold(),
            opening_tag: default_opening_tag(),
            closing_tag: default_closing_tag(),
            block_start_pattern: default_block_start_pattern(),
            block_end_pattern: default_block_end_pattern(),
            block_open_symbol: default_open_symbol(),
            block_close_symbol: default_close_symbol(),
            include_meta: false,
            use_generated_names: false,
            merge_small_files: false,
            small_file_threshold: default_small_file_threshold(),
            history_limit: default_history_limit(),
            max_redo_attempts: default_max_redo_attempts(),
            max_continuations: default_max_continuations(),
            max_repair_depth: default_max_repair_depth(),
            max_fix_attempts: default_max_fix_attempts(),
            max_rewrite_iterations: default_max_rewrite_iterations(),
            exclude_patterns: Vec::new(),
            source_roots: default_source_roots(),
            checkpoint_path: default_checkpoint_path(),
            service: ServiceConfig::default(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            api_version: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Settings implementation ──────────────────────────────────────────

impl Settings {
    /// Load settings from a YAML file.
    ///
    /// If `path` is empty, defaults to [`DEFAULT_SETTINGS_PATH`]. If the file
    /// does not exist, returns defaults and writes a template when the default
    /// path was requested. Defaults alone do not pass [`Settings::validate`].
    pub fn load(path: &str) -> Result<Self> {
        let path = if path.is_empty() {
            DEFAULT_SETTINGS_PATH
        } else {
            path
        };

        if !Path::new(path).exists() {
            info!("{path} not found, using defaults");
            let settings = Self::default();

            if path == DEFAULT_SETTINGS_PATH {
                match settings.save(path) {
                    Ok(()) => info!("Generated settings template: {path}"),
                    Err(e) => warn!("Failed to generate settings template: {e}"),
                }
            }

            return Ok(settings);
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings: {path}"))?;
        let mut settings: Settings = serde_yaml::from_str(&data)
            .with_context(|| format!("invalid YAML in settings: {path}"))?;

        info!("Loaded settings from {path}");

        settings.input_extensions = settings
            .input_extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();
        if !settings.output_extension.is_empty() {
            settings.output_extension = normalize_extension(&settings.output_extension);
        }

        Ok(settings)
    }

    /// Save settings to a YAML file.
    pub fn save(&self, path: &str) -> Result<()> {
        let data = serde_yaml::to_string(self).context("failed to serialize settings")?;
        std::fs::write(path, data).with_context(|| format!("failed to write settings: {path}"))?;
        Ok(())
    }

    /// Validate settings values. Every failure is a startup-fatal
    /// configuration error.
    pub fn validate(&self) -> Result<(), TranslateError> {
        require(!self.target_language.trim().is_empty(), "target_language is required")?;
        require(!self.output_extension.trim().is_empty(), "output_extension is required")?;
        require(!self.prompt.trim().is_empty(), "prompt is required")?;
        require(
            !self.input_extensions.is_empty(),
            "at least one input extension must be specified",
        )?;
        require(self.max_tokens > 0, "max_tokens must be positive")?;
        require(self.max_chunk_size > 0, "max_chunk_size must be positive")?;
        require(self.history_limit > 0, "history_limit must be positive")?;
        require(self.max_repair_depth > 0, "max_repair_depth must be positive")?;
        require(
            self.max_rewrite_iterations > 0,
            "max_rewrite_iterations must be positive",
        )?;
        require(
            !self.opening_tag.is_empty() && !self.closing_tag.is_empty(),
            "opening_tag and closing_tag must not be empty",
        )?;
        require(
            !self.block_open_symbol.is_empty() && !self.block_close_symbol.is_empty(),
            "block_open_symbol and block_close_symbol must not be empty",
        )?;

        for (name, pattern) in [
            ("block_start_pattern", &self.block_start_pattern),
            ("block_end_pattern", &self.block_end_pattern),
        ] {
            Regex::new(pattern).map_err(|e| {
                TranslateError::Configuration(format!("{name} is not a valid regex: {e}"))
            })?;
        }

        Ok(())
    }

    /// Grammar name used for verification and rewriting: the target language
    /// when it names a known grammar, else the grammar owning
    /// `output_extension`, else the lowercased target language.
    #[must_use]
    pub fn language(&self) -> String {
        LanguageConfig::resolve(&self.target_language, &self.output_extension)
            .map(|c| c.name.to_string())
            .unwrap_or_else(|| self.target_language.trim().to_ascii_lowercase())
    }
}

fn require(condition: bool, message: &str) -> Result<(), TranslateError> {
    if condition {
        Ok(())
    } else {
        Err(TranslateError::Configuration(message.to_string()))
    }
}

/// `"py"` → `".py"`; already dotted extensions are kept.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        Settings {
            target_language: "java".to_string(),
            output_extension: ".java".to_string(),
            prompt: "Translate this code".to_string(),
            ..Settings::default()
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.max_chunk_size, 2000);
        assert_eq!(settings.max_repair_depth, 3);
        assert_eq!(settings.max_fix_attempts, 5);
        assert_eq!(settings.opening_tag, "<code>");
        assert_eq!(settings.service.provider, "openai");
        assert!(!settings.include_meta);
    }

    #[test]
    fn test_defaults_require_user_options() {
        let err = Settings::default().validate().unwrap_err();
        assert!(matches!(err, TranslateError::Configuration(_)));
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = "target_language: rust\noutput_extension: .rs\nprompt: go\nmax_chunk_size: 800\nservice:\n  provider: claude\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.max_chunk_size, 800);
        assert_eq!(settings.service.provider, "claude");
        assert_eq!(settings.history_limit, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validate_ok() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_bad_chunk_size() {
        let mut settings = valid();
        settings.max_chunk_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_bad_regex() {
        let mut settings = valid();
        settings.block_start_pattern = "(".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_language_resolution() {
        let mut settings = valid();
        settings.target_language = "Java 21".to_string();
        assert_eq!(settings.language(), "java");

        settings.target_language = "Golang".to_string();
        assert_eq!(settings.language(), "go");

        settings.target_language = "Kotlin".to_string();
        settings.output_extension = ".kt".to_string();
        assert_eq!(settings.language(), "kotlin");
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("py"), ".py");
        assert_eq!(normalize_extension(".py"), ".py");
    }

    #[test]
    fn test_load_normalizes_extensions() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("settings.yaml");
        std::fs::write(
            &path,
            "target_language: java\noutput_extension: java\nprompt: x\ninput_extensions: [py, .pyi]\n",
        )
        .unwrap();

        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.input_extensions, vec![".py", ".pyi"]);
        assert_eq!(settings.output_extension, ".java");
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("absent.yaml");
        let settings = Settings::load(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.max_tokens, 4096);
        assert!(!path.exists());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let settings = valid();
        let yaml = serde_yaml::to_string(&settings).unwrap();
        let parsed: Settings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.target_language, "java");
        assert_eq!(parsed.block_start_pattern, settings.block_start_pattern);
    }
}
