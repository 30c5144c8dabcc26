use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::TranslateError;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Progress of one project run, saved after every file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    pub root_directory: PathBuf,
    /// Source path -> output path.
    pub file_names: BTreeMap<PathBuf, PathBuf>,
    pub files_processed: usize,
    pub last_progress_percent: u8,
    pub meta_summary: String,
}

impl ProjectState {
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            ..Self::default()
        }
    }

    /// Marks one unit of work done. Every member source maps to `output`;
    /// failed units advance the cursor without a mapping.
    pub fn record(&mut self, members: &[PathBuf], output: Option<&Path>, total: usize) {
        if let Some(output) = output {
            for member in members {
                self.file_names.insert(member.clone(), output.to_path_buf());
            }
        }
        self.files_processed += 1;
        self.last_progress_percent = percent(self.files_processed, total);
    }
}

pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    state: &'a ProjectState,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    saved_at: DateTime<Utc>,
    state: ProjectState,
}

/// Writes the checkpoint through a temporary file so a crash never leaves a
/// truncated snapshot behind.
pub fn save(path: &Path, state: &ProjectState) -> Result<(), TranslateError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let envelope = EnvelopeRef {
        version: CHECKPOINT_VERSION,
        saved_at: Utc::now(),
        state,
    };
    let json = serde_json::to_string_pretty(&envelope)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    debug!("checkpoint saved to {}", path.display());
    Ok(())
}

pub fn load(path: &Path) -> Result<ProjectState, TranslateError> {
    from_json(&fs::read_to_string(path)?)
}

/// The version is checked before the state is deserialized.
pub fn from_json(json: &str) -> Result<ProjectState, TranslateError> {
    let value: Value = serde_json::from_str(json)?;
    let header: Header = serde_json::from_value(value.clone())?;
    if header.version != CHECKPOINT_VERSION {
        return Err(TranslateError::CheckpointVersionMismatch {
            found: header.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    let envelope: Envelope = serde_json::from_value(value)?;
    Ok(envelope.state)
}
