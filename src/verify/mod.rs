/// Syntax verification and recursive repair.
///
/// The verifier is a stateless adapter over a target-language parser; its
/// only output contract is an ordered list of [`SyntaxError`]s, empty when
/// the code parses.
pub mod grammar;
pub mod languages;
pub mod repair;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use self::grammar::TreeSitterVerifier;
pub use self::repair::{RepairEngine, RepairOutcome};

/// One parser complaint. `line_number` is 1-based, `-1` when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    pub message: String,
    pub line_number: i64,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line_number: i64) -> Self {
        Self {
            message: message.into(),
            line_number,
        }
    }

    pub fn unlocated(message: impl Into<String>) -> Self {
        Self::new(message, -1)
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line_number > 0 {
            write!(f, "line {}: {}", self.line_number, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

pub trait SyntaxVerifier: Send + Sync {
    /// Empty when `code` parses as valid target-language source.
    fn verify(&self, code: &str) -> Vec<SyntaxError>;
}

/// Used when no grammar exists for the target language.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SyntaxVerifier for AcceptAllVerifier {
    fn verify(&self, _code: &str) -> Vec<SyntaxError> {
        Vec::new()
    }
}

/// Grammar-backed verifier for `language`, or [`AcceptAllVerifier`].
pub fn verifier_for(language: &str) -> Box<dyn SyntaxVerifier> {
    match TreeSitterVerifier::for_language(language) {
        Some(verifier) => Box::new(verifier),
        None => {
            tracing::warn!("no grammar for target language {language:?}, syntax checks disabled");
            Box::new(AcceptAllVerifier)
        }
    }
}
