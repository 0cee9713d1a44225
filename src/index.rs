//! The [`MemoryIndex`] composition root.
//!
//! Owns the store, the resolved embedding provider and the configuration
//! for one workspace. Sync and search on the same index are serialized by
//! an internal async mutex; [`MemoryIndex::read_file`] does not touch the
//! index and runs without it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;

use memory_harness_core::embedding::EmbeddingProvider;
use memory_harness_core::models::{MemorySource, SearchResult};
use memory_harness_core::search::{self, SearchRequest};
use memory_harness_core::store::Store;

use crate::config::Config;
use crate::discovery::normalize_memory_path;
use crate::embedding::{resolve_provider, ProviderResolution};
use crate::error::MemoryError;
use crate::progress::{NoProgress, SyncProgressReporter};
use crate::sqlite_store::SqliteStore;
use crate::sync::{run_sync, SyncContext, SyncReport};
use crate::{db, migrate};

/// Per-call overrides of the configured retrieval settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    pub max_results: Option<usize>,
    pub min_score: Option<f64>,
}

/// Counts and provider details reported by [`MemoryIndex::status`].
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub files: usize,
    pub chunks: usize,
    pub cached_embeddings: usize,
    pub workspace: PathBuf,
    pub db_path: PathBuf,
    pub provider: String,
    pub model: String,
    pub requested_provider: String,
    pub fallback_from: Option<String>,
    pub fallback_reason: Option<String>,
    pub keyword_search_available: bool,
    pub chunk_tokens: usize,
    pub chunk_overlap: usize,
}

/// Contents of a memory file (or a line window of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    pub path: String,
    pub text: String,
}

pub struct MemoryIndex {
    config: Config,
    store: Box<dyn Store>,
    resolution: ProviderResolution,
    op_lock: Mutex<()>,
}

impl MemoryIndex {
    /// Resolve the configured provider, open the SQLite database and
    /// bootstrap the schema.
    pub async fn open(config: Config) -> Result<Self> {
        let resolution = resolve_provider(&config.embedding)?;
        Self::open_with_resolution(config, resolution).await
    }

    /// Open with an explicit provider instead of resolving one from config.
    pub async fn open_with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let resolution = ProviderResolution {
            requested: provider.id().to_string(),
            provider,
            fallback_from: None,
            fallback_reason: None,
        };
        Self::open_with_resolution(config, resolution).await
    }

    async fn open_with_resolution(config: Config, resolution: ProviderResolution) -> Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        let schema = migrate::run_migrations(&pool).await?;
        let store = SqliteStore::new(pool, schema.fts_available);
        Ok(Self::with_store(config, Box::new(store), resolution))
    }

    /// Build an index over any [`Store`] backend.
    pub fn with_store(
        config: Config,
        store: Box<dyn Store>,
        resolution: ProviderResolution,
    ) -> Self {
        tracing::debug!(
            provider = resolution.provider.id(),
            model = resolution.provider.model(),
            workspace = %config.workspace.root.display(),
            "memory index opened"
        );
        Self {
            config,
            store,
            resolution,
            op_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn provider(&self) -> &dyn EmbeddingProvider {
        self.resolution.provider.as_ref()
    }

    pub fn workspace(&self) -> &Path {
        &self.config.workspace.root
    }

    pub async fn sync(&self, force: bool) -> Result<SyncReport> {
        self.sync_with_progress(force, &NoProgress).await
    }

    pub async fn sync_with_progress(
        &self,
        force: bool,
        reporter: &dyn SyncProgressReporter,
    ) -> Result<SyncReport> {
        let _guard = self.op_lock.lock().await;
        let ctx = SyncContext {
            store: self.store.as_ref(),
            provider: self.provider(),
            workspace: self.workspace(),
            chunking: self.config.chunking.params(),
            batch_max_tokens: self.config.embedding.batch_max_tokens,
        };
        run_sync(&ctx, force, reporter).await
    }

    /// Hybrid search over the indexed chunks.
    ///
    /// A blank query returns an empty list without calling the provider.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.op_lock.lock().await;

        let mut params = self.config.retrieval.params();
        if let Some(max_results) = options.max_results {
            params.max_results = max_results;
        }
        if let Some(min_score) = options.min_score {
            params.min_score = min_score;
        }

        let provider = self.provider();
        let query_vec = provider
            .embed_query(query)
            .await
            .with_context(|| format!("Failed to embed query with provider '{}'", provider.id()))?;

        let request = SearchRequest {
            query,
            query_vec: Some(query_vec.as_slice()),
            model: provider.model(),
            params,
        };
        search::search(self.store.as_ref(), &request).await
    }

    pub async fn status(&self) -> Result<IndexStatus> {
        let _guard = self.op_lock.lock().await;
        let provider = self.provider();
        Ok(IndexStatus {
            files: self.store.list_files(MemorySource::Memory).await?.len(),
            chunks: self.store.chunk_count().await?,
            cached_embeddings: self.store.cached_embedding_count().await?,
            workspace: self.config.workspace.root.clone(),
            db_path: self.config.db.path.clone(),
            provider: provider.id().to_string(),
            model: provider.model().to_string(),
            requested_provider: self.resolution.requested.clone(),
            fallback_from: self.resolution.fallback_from.clone(),
            fallback_reason: self.resolution.fallback_reason.clone(),
            keyword_search_available: self.store.keyword_search_available(),
            chunk_tokens: self.config.chunking.tokens,
            chunk_overlap: self.config.chunking.overlap,
        })
    }

    /// Read a memory file, or `lines` lines of it starting at 1-based line
    /// `from`. See [`read_memory_file`].
    pub async fn read_file(
        &self,
        rel_path: &str,
        from: Option<usize>,
        lines: Option<usize>,
    ) -> Result<FileContent> {
        read_memory_file(self.workspace(), rel_path, from, lines).await
    }

    /// Close the store. Consumes the index so it cannot be closed twice.
    pub async fn close(self) {
        self.store.close().await;
    }
}

/// Read a memory file under `workspace` without opening the index.
///
/// The path is validated before the filesystem is touched; invalid paths
/// fail with [`MemoryError`].
pub async fn read_memory_file(
    workspace: &Path,
    rel_path: &str,
    from: Option<usize>,
    lines: Option<usize>,
) -> Result<FileContent> {
    let rel = normalize_memory_path(rel_path)?;

    let root = tokio::fs::canonicalize(workspace)
        .await
        .with_context(|| format!("Failed to resolve workspace: {}", workspace.display()))?;
    let resolved = tokio::fs::canonicalize(workspace.join(&rel))
        .await
        .with_context(|| format!("Failed to read memory file: {}", rel))?;
    if !resolved.starts_with(&root) {
        return Err(MemoryError::OutsideWorkspace(rel).into());
    }

    let content = tokio::fs::read_to_string(&resolved)
        .await
        .with_context(|| format!("Failed to read memory file: {}", rel))?;

    Ok(FileContent {
        path: rel,
        text: slice_lines(&content, from, lines),
    })
}

fn slice_lines(content: &str, from: Option<usize>, lines: Option<usize>) -> String {
    if from.is_none() && lines.is_none() {
        return content.to_string();
    }
    let start = from.unwrap_or(1).max(1) - 1;
    let count = lines.unwrap_or(usize::MAX);
    content
        .split('\n')
        .skip(start)
        .take(count)
        .collect::<Vec<_>>()
        .join("\n")
}
