//! Chunking, reply parsing and the translate/continue protocol.
pub mod chunker;
pub mod response;
pub mod session;

pub use chunker::{BlockSyntax, Chunk, ChunkSplitter, Skeleton};
pub use response::{ParsedResponse, ResponseParser};
pub use session::{ConversationHistory, SessionOptions, TranslationSession};
