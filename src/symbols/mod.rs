/// Project-wide symbol bookkeeping.
///
/// The index is built once every file has its first-pass output, then the
/// rewriter iterates over all outputs until references are consistent.
pub mod index;
pub mod rewrite;

pub use self::index::{SymbolEntry, SymbolIndex, SymbolIndexer};
pub use self::rewrite::{CrossFileRewriter, RewriteReport, RewriteStrategy};
