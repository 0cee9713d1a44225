//! Embedding cache abstraction.
//!
//! The cache is conceptually a persistent map
//! `(provider, model, provider_key, content_hash) → vector`. Because the key
//! already encodes content identity, entries are never invalidated; they are
//! only inserted or overwritten by an identical-key upsert.
//!
//! The cache never calls embedding providers. The sync pipeline looks up
//! hashes, embeds the misses itself, and writes the results back with
//! [`EmbeddingCache::store_embeddings`].

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;

/// Maximum number of hashes bound into one lookup query.
pub const CACHE_LOOKUP_BATCH: usize = 400;

/// Provider identity half of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    pub model: String,
    pub provider_key: String,
}

impl CacheKey {
    pub fn for_provider(provider: &dyn EmbeddingProvider) -> Self {
        Self {
            provider: provider.id().to_string(),
            model: provider.model().to_string(),
            provider_key: provider.provider_key(),
        }
    }
}

/// A vector to be written back to the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub hash: String,
    pub embedding: Vec<f32>,
}

/// Persistent embedding cache.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Return stored vectors for the given content hashes.
    ///
    /// Hashes without a stored, non-empty vector are absent from the
    /// result; a miss is never an error.
    async fn lookup_embeddings(
        &self,
        key: &CacheKey,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>>;

    /// Upsert vectors by full key. Last write wins.
    async fn store_embeddings(&self, key: &CacheKey, entries: &[CacheEntry]) -> Result<()>;

    /// Number of cached vectors across all providers.
    async fn cached_embedding_count(&self) -> Result<usize>;
}
