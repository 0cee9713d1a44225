//! Core data models used throughout Memory Harness.
//!
//! These types represent the chunks, tracked files, sync metadata, and
//! search results that flow through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Source kind of an indexed file. Only workspace memory files are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySource {
    Memory,
}

impl MemorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemorySource::Memory => "memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(MemorySource::Memory),
            _ => None,
        }
    }
}

impl std::fmt::Display for MemorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contiguous line range of one source file, produced by the chunker.
///
/// Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

/// A chunk persisted in the index together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    /// Stable id, see [`crate::hash::chunk_id`].
    pub id: String,
    pub path: String,
    pub source: MemorySource,
    pub start_line: usize,
    pub end_line: usize,
    pub hash: String,
    pub model: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub updated_at: i64,
}

/// One tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Workspace-relative, forward-slash normalized path.
    pub path: String,
    pub source: MemorySource,
    pub hash: String,
    /// Modification time in milliseconds since the Unix epoch.
    pub mtime: i64,
    pub size: i64,
}

/// Description of the last successful sync.
///
/// If any of the identity fields differ from the current configuration the
/// whole index must be rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub model: String,
    pub provider: String,
    pub provider_key: String,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_dims: Option<usize>,
}

impl IndexMeta {
    /// True when `other` was produced with the same embedding space and
    /// chunk boundaries. `vector_dims` is informational and not compared.
    pub fn is_compatible_with(&self, other: &IndexMeta) -> bool {
        self.model == other.model
            && self.provider == other.provider
            && self.provider_key == other.provider_key
            && self.chunk_tokens == other.chunk_tokens
            && self.chunk_overlap == other.chunk_overlap
    }
}

/// A ranked search hit returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub score: f64,
    pub snippet: String,
    pub source: MemorySource,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> IndexMeta {
        IndexMeta {
            model: "m".into(),
            provider: "openai".into(),
            provider_key: "k".into(),
            chunk_tokens: 400,
            chunk_overlap: 80,
            vector_dims: None,
        }
    }

    #[test]
    fn test_meta_ignores_dims() {
        let a = meta();
        let mut b = meta();
        b.vector_dims = Some(1536);
        assert!(a.is_compatible_with(&b));
    }

    #[test]
    fn test_meta_detects_chunking_change() {
        let a = meta();
        let mut b = meta();
        b.chunk_overlap = 40;
        assert!(!a.is_compatible_with(&b));
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&MemorySource::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
    }
}
