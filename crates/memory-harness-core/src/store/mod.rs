//! Storage abstraction for Memory Harness.
//!
//! The [`Store`] trait defines all storage operations needed by the sync
//! pipeline and the core search algorithm, enabling pluggable backends
//! (SQLite with FTS5, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::EmbeddingCache;
use crate::models::{FileRecord, IndexMeta, IndexedChunk, MemorySource};

/// A stored chunk with its vector, as read back for vector scoring.
#[derive(Debug, Clone)]
pub struct VectorCandidate {
    pub id: String,
    pub path: String,
    pub source: MemorySource,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A full-text match with the backend's raw rank (lower is better).
#[derive(Debug, Clone)]
pub struct KeywordMatch {
    pub id: String,
    pub path: String,
    pub source: MemorySource,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub rank: f64,
}

/// Abstract storage backend for Memory Harness.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`read_meta`](Store::read_meta) / [`write_meta`](Store::write_meta) | Sync metadata |
/// | [`reset_index`](Store::reset_index) | Drop all files, chunks and full-text rows |
/// | [`get_file`](Store::get_file) / [`list_files`](Store::list_files) / [`upsert_file`](Store::upsert_file) | File records |
/// | [`delete_file`](Store::delete_file) | Remove a file and cascade to its chunks |
/// | [`replace_chunks`](Store::replace_chunks) | Swap all chunks of one file |
/// | [`vector_candidates`](Store::vector_candidates) | All chunk vectors for a model |
/// | [`keyword_search`](Store::keyword_search) | Full-text search (may be unavailable) |
#[async_trait]
pub trait Store: EmbeddingCache {
    /// Read the last sync metadata. A missing or corrupt record is `None`.
    async fn read_meta(&self) -> Result<Option<IndexMeta>>;

    async fn write_meta(&self, meta: &IndexMeta) -> Result<()>;

    /// Delete every file, chunk and full-text record. The embedding cache
    /// is kept.
    async fn reset_index(&self) -> Result<()>;

    async fn get_file(&self, path: &str, source: MemorySource) -> Result<Option<FileRecord>>;

    async fn list_files(&self, source: MemorySource) -> Result<Vec<FileRecord>>;

    async fn upsert_file(&self, file: &FileRecord) -> Result<()>;

    /// Delete a tracked file together with its chunks and full-text rows.
    async fn delete_file(&self, path: &str, source: MemorySource) -> Result<()>;

    /// Replace all chunk and full-text rows of `path` with `chunks`.
    async fn replace_chunks(
        &self,
        path: &str,
        source: MemorySource,
        chunks: &[IndexedChunk],
    ) -> Result<()>;

    async fn chunk_count(&self) -> Result<usize>;

    /// Every chunk embedded with `model` that has a usable vector.
    async fn vector_candidates(&self, model: &str) -> Result<Vec<VectorCandidate>>;

    /// Whether the full-text index initialized. When false the store runs
    /// in vector-only mode and [`keyword_search`](Store::keyword_search)
    /// returns nothing.
    fn keyword_search_available(&self) -> bool;

    /// Run a prepared full-text query (see
    /// [`build_fts_query`](crate::search::build_fts_query)) restricted to
    /// `model`, ordered by raw rank ascending.
    async fn keyword_search(
        &self,
        fts_query: &str,
        model: &str,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>>;

    /// Release backend resources.
    async fn close(&self);
}
