//! # codeshift: batch source-tree translator
//!
//! Drives an external text-generation service file by file to rewrite a
//! source tree in another language, then validates and repairs the output
//! until it parses and keeps cross-file references consistent.
//!
//! ## Architecture
//!
//! - **[`translate`]**: Structure-aware chunking, reply parsing, and the translate/continue protocol
//! - **[`generator`]**: Generation-service trait, HTTP providers (OpenAI, Claude, custom) and a mock
//! - **[`verify`]**: Tree-sitter syntax verification and bounded recursive repair
//! - **[`symbols`]**: Project-wide symbol index and the fixed-point cross-file rewrite
//! - **[`pipeline`]**: Per-file orchestration, checkpoints, cancellation and progress events
//! - **[`walker`]**: Source discovery with `.gitignore` and exclusion globs
//! - **[`config`]**: YAML settings loading and validation
//! - **[`error`]**: Error kinds surfaced to callers

pub mod config;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod symbols;
pub mod translate;
pub mod verify;
pub mod walker;

pub use error::{Result, TranslateError};
