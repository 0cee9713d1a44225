//! Typed errors callers may want to match on.
//!
//! Everything else is reported through `anyhow` with context attached at
//! the I/O boundary. Use `err.downcast_ref::<MemoryError>()` to inspect.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("path is required")]
    EmptyPath,

    #[error("path escapes the workspace: {0}")]
    OutsideWorkspace(String),

    #[error("not a memory file: {0} (expected MEMORY.md, memory.md or memory/**/*.md)")]
    NotMemoryFile(String),

    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    VectorCountMismatch { expected: usize, got: usize },
}
