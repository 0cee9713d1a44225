//! Sync pipeline.
//!
//! Brings the index in line with the memory files on disk:
//!
//! 1. Compare stored [`IndexMeta`] with the current provider and chunking
//!    settings. A mismatch, missing metadata, or `force` resets the index.
//! 2. For every discovered file whose content hash changed (or every file
//!    after a reset): chunk, embed through the cache, replace the file's
//!    chunks and upsert its record.
//! 3. Delete files that are tracked but no longer on disk.
//! 4. Write the new metadata.
//!
//! Any error aborts the sync before the metadata is written, so the next
//! run starts over from a consistent state.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use memory_harness_core::cache::{CacheEntry, CacheKey};
use memory_harness_core::chunk::{chunk_markdown, ChunkingParams};
use memory_harness_core::embedding::{build_embedding_batches, EmbeddingProvider};
use memory_harness_core::hash::{chunk_id, hash_text};
use memory_harness_core::models::{Chunk, FileRecord, IndexMeta, IndexedChunk, MemorySource};
use memory_harness_core::store::Store;

use crate::discovery::{self, MemoryFile};
use crate::error::MemoryError;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

/// Counters describing one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// The index was reset before indexing.
    pub full_reindex: bool,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    /// Distinct chunk texts whose vectors came from the embedding cache.
    pub embeddings_cached: usize,
    /// Distinct chunk texts sent to the embedding provider.
    pub embeddings_computed: usize,
}

/// Everything the pipeline needs, borrowed from the owning index.
pub struct SyncContext<'a> {
    pub store: &'a dyn Store,
    pub provider: &'a dyn EmbeddingProvider,
    pub workspace: &'a Path,
    pub chunking: ChunkingParams,
    pub batch_max_tokens: usize,
}

impl SyncContext<'_> {
    fn current_meta(&self) -> IndexMeta {
        IndexMeta {
            model: self.provider.model().to_string(),
            provider: self.provider.id().to_string(),
            provider_key: self.provider.provider_key(),
            chunk_tokens: self.chunking.tokens,
            chunk_overlap: self.chunking.overlap,
            vector_dims: None,
        }
    }
}

pub async fn run_sync(
    ctx: &SyncContext<'_>,
    force: bool,
    reporter: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let mut meta = ctx.current_meta();

    let stored = ctx.store.read_meta().await?;
    let needs_reset = match &stored {
        _ if force => Some("forced"),
        None => Some("no previous index"),
        Some(prev) if !prev.is_compatible_with(&meta) => Some("provider or chunking changed"),
        Some(_) => None,
    };

    if let Some(reason) = needs_reset {
        tracing::info!(reason, provider = %meta.provider, model = %meta.model, "full reindex");
        ctx.store.reset_index().await?;
        report.full_reindex = true;
    } else {
        meta.vector_dims = stored.and_then(|m| m.vector_dims);
    }

    reporter.report(SyncProgressEvent::Discovering {
        workspace: ctx.workspace.display().to_string(),
    });
    let files = discovery::list_memory_files(ctx.workspace)?;
    let total = files.len() as u64;

    let cache_key = CacheKey::for_provider(ctx.provider);
    let mut seen: HashSet<String> = HashSet::with_capacity(files.len());

    for (i, file) in files.iter().enumerate() {
        seen.insert(file.rel_path.clone());
        reporter.report(SyncProgressEvent::Indexing {
            path: file.rel_path.clone(),
            n: i as u64 + 1,
            total,
        });

        let content = read_note(file).await?;
        let file_hash = hash_text(&content);

        if !report.full_reindex {
            let existing = ctx.store.get_file(&file.rel_path, MemorySource::Memory).await?;
            if let Some(existing) = existing {
                if existing.hash == file_hash {
                    tracing::debug!(path = %file.rel_path, "unchanged, skipping");
                    report.files_unchanged += 1;
                    continue;
                }
            }
        }

        let written =
            index_file(ctx, &cache_key, file, &content, &file_hash, &mut meta, &mut report)
                .await?;
        tracing::info!(path = %file.rel_path, chunks = written, "synced file");
        report.files_indexed += 1;
        report.chunks_written += written;
    }

    for tracked in ctx.store.list_files(MemorySource::Memory).await? {
        if seen.contains(&tracked.path) {
            continue;
        }
        tracing::info!(path = %tracked.path, "removing deleted file from index");
        ctx.store.delete_file(&tracked.path, tracked.source).await?;
        reporter.report(SyncProgressEvent::Removed {
            path: tracked.path.clone(),
        });
        report.files_removed += 1;
    }

    ctx.store.write_meta(&meta).await?;
    Ok(report)
}

/// Read a note as text. Invalid UTF-8 is replaced rather than failing the
/// whole sync.
async fn read_note(file: &MemoryFile) -> Result<String> {
    let bytes = tokio::fs::read(&file.abs_path)
        .await
        .with_context(|| format!("Failed to read memory file: {}", file.abs_path.display()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => {
            tracing::warn!(
                path = %file.rel_path,
                "memory file is not valid UTF-8, decoding lossily"
            );
            Ok(String::from_utf8_lossy(err.as_bytes()).into_owned())
        }
    }
}

/// Chunk, embed and store one file. Returns the number of chunks written.
async fn index_file(
    ctx: &SyncContext<'_>,
    cache_key: &CacheKey,
    file: &MemoryFile,
    content: &str,
    file_hash: &str,
    meta: &mut IndexMeta,
    report: &mut SyncReport,
) -> Result<usize> {
    let chunks: Vec<Chunk> = chunk_markdown(content, &ctx.chunking)
        .into_iter()
        .filter(|c| !c.text.trim().is_empty())
        .collect();

    let vectors = embed_with_cache(ctx, cache_key, &chunks, report).await?;

    let now = chrono::Utc::now().timestamp_millis();
    let model = ctx.provider.model();
    let indexed: Vec<IndexedChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let embedding = vectors.get(&chunk.hash).cloned().unwrap_or_default();
            if meta.vector_dims.is_none() && !embedding.is_empty() {
                meta.vector_dims = Some(embedding.len());
            }
            IndexedChunk {
                id: chunk_id(
                    MemorySource::Memory,
                    &file.rel_path,
                    chunk.start_line,
                    chunk.end_line,
                    &chunk.hash,
                    model,
                ),
                path: file.rel_path.clone(),
                source: MemorySource::Memory,
                start_line: chunk.start_line,
                end_line: chunk.end_line,
                hash: chunk.hash,
                model: model.to_string(),
                text: chunk.text,
                embedding,
                updated_at: now,
            }
        })
        .collect();

    ctx.store
        .replace_chunks(&file.rel_path, MemorySource::Memory, &indexed)
        .await?;
    ctx.store
        .upsert_file(&FileRecord {
            path: file.rel_path.clone(),
            source: MemorySource::Memory,
            hash: file_hash.to_string(),
            mtime: file.mtime,
            size: file.size,
        })
        .await?;

    Ok(indexed.len())
}

/// Vectors for every distinct chunk hash. Cache hits are reused; misses are
/// embedded in token-budgeted batches and written back to the cache.
async fn embed_with_cache(
    ctx: &SyncContext<'_>,
    cache_key: &CacheKey,
    chunks: &[Chunk],
    report: &mut SyncReport,
) -> Result<HashMap<String, Vec<f32>>> {
    let mut unique: Vec<&Chunk> = Vec::with_capacity(chunks.len());
    let mut seen = HashSet::with_capacity(chunks.len());
    for chunk in chunks {
        if seen.insert(chunk.hash.as_str()) {
            unique.push(chunk);
        }
    }

    let hashes: Vec<String> = unique.iter().map(|c| c.hash.clone()).collect();
    let mut vectors = ctx.store.lookup_embeddings(cache_key, &hashes).await?;
    report.embeddings_cached += vectors.len();

    let missing: Vec<&Chunk> = unique
        .into_iter()
        .filter(|c| !vectors.contains_key(&c.hash))
        .collect();
    tracing::debug!(hits = vectors.len(), misses = missing.len(), "embedding cache lookup");
    if missing.is_empty() {
        return Ok(vectors);
    }

    let texts: Vec<String> = missing.iter().map(|c| c.text.clone()).collect();
    for range in build_embedding_batches(&texts, ctx.batch_max_tokens) {
        let batch = &texts[range.clone()];
        let embedded = ctx.provider.embed_batch(batch).await?;
        if embedded.len() != batch.len() {
            return Err(MemoryError::VectorCountMismatch {
                expected: batch.len(),
                got: embedded.len(),
            }
            .into());
        }

        let entries: Vec<CacheEntry> = missing[range]
            .iter()
            .zip(embedded)
            .map(|(chunk, embedding)| CacheEntry {
                hash: chunk.hash.clone(),
                embedding,
            })
            .collect();
        ctx.store.store_embeddings(cache_key, &entries).await?;

        report.embeddings_computed += entries.len();
        for entry in entries {
            vectors.insert(entry.hash, entry.embedding);
        }
    }

    Ok(vectors)
}
