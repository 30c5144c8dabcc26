/// Text-generation service trait and shared message types.
///
/// The core only ever talks to a `TextGenerator`; concrete providers live in
/// [`http`], and [`mock`] provides a scripted stand-in for tests.
pub mod http;
pub mod mock;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a generation-service call. These are never retried by
/// the translation session; retry policy belongs to the orchestrator.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed service response: {0}")]
    Malformed(String),

    #[error("unsupported provider: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One role-tagged entry of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Trait for generation-service implementations.
///
/// All implementations must be `Send + Sync` so a single instance can be
/// shared with the worker thread behind `Arc`.
pub trait TextGenerator: Send + Sync {
    /// Send an ordered conversation and return the raw reply text.
    fn generate(&self, conversation: &[Message], max_tokens: usize)
    -> Result<String, GenerationError>;

    /// Cheap connectivity check run once before a project starts.
    fn probe(&self) -> Result<(), GenerationError> {
        self.generate(&[Message::user("Connection test message")], 16)
            .map(|_| ())
    }
}

impl<T: TextGenerator + ?Sized> TextGenerator for std::sync::Arc<T> {
    fn generate(
        &self,
        conversation: &[Message],
        max_tokens: usize,
    ) -> Result<String, GenerationError> {
        (**self).generate(conversation, max_tokens)
    }

    fn probe(&self) -> Result<(), GenerationError> {
        (**self).probe()
    }
}
