use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::pipeline::SourceUnit;

/// Collects translatable sources below a root directory.
///
/// `.gitignore` rules are honored, hidden files are included, and paths
/// matching any exclusion glob are skipped.
pub struct SourceWalker {
    root: PathBuf,
    extensions: Vec<String>,
    excludes: GlobSet,
}

impl SourceWalker {
    pub fn new(root: impl Into<PathBuf>, extensions: &[String], exclude_patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in exclude_patterns {
            builder.add(Glob::new(pattern).with_context(|| format!("invalid exclude pattern: {pattern}"))?);
        }

        Ok(Self {
            root: root.into(),
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            excludes: builder.build().context("failed to build exclude patterns")?,
        })
    }

    /// Sources in sorted relative-path order.
    pub fn collect(&self) -> Result<Vec<SourceUnit>> {
        let mut units = Vec::new();
        let walker = WalkBuilder::new(&self.root).hidden(false).build();

        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }

            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if !self.accepts(relative) {
                continue;
            }

            match std::fs::read_to_string(path) {
                Ok(content) => units.push(SourceUnit::new(relative, content)),
                Err(e) => warn!("skipping unreadable {}: {e}", path.display()),
            }
        }

        units.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("found {} source file(s) under {}", units.len(), self.root.display());
        Ok(units)
    }

    fn accepts(&self, relative: &Path) -> bool {
        let ext = relative
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        self.extensions.contains(&ext) && !self.excludes.is_match(relative)
    }
}
