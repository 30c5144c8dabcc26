/// Error kinds surfaced by the translation core.
///
/// Per-chunk and per-file failures are recorded by the pipeline and do not
/// abort a project run; only `GenerationService` raised by the connectivity
/// probe and `Configuration` at startup are fatal.
use thiserror::Error;

use crate::generator::GenerationError;
use crate::verify::SyntaxError;

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("generation service error: {0}")]
    GenerationService(#[from] GenerationError),

    /// The continuation loop stopped making progress on every redo attempt.
    /// `partial` holds the longest code accumulated across attempts.
    #[error("translation incomplete after {attempts} attempt(s)")]
    IncompleteTranslation { attempts: usize, partial: String },

    #[error("{} syntax error(s) remain after {attempts} repair attempt(s)", errors.len())]
    RepairBudgetExhausted {
        attempts: usize,
        errors: Vec<SyntaxError>,
    },

    #[error("checkpoint version {found} is not supported (expected {expected})")]
    CheckpointVersionMismatch { found: u32, expected: u32 },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed checkpoint: {0}")]
    Checkpoint(#[from] serde_json::Error),
}

pub type Result<T, E = TranslateError> = std::result::Result<T, E>;
