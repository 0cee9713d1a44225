//! In-memory [`Store`] implementation for testing.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Keyword search emulates the conjunctive FTS query produced by
//! [`build_fts_query`](crate::search::build_fts_query): every quoted token
//! must appear (case-insensitively) in the chunk text, and the rank is the
//! negated number of token occurrences so better matches rank lower.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::cache::{CacheEntry, CacheKey, EmbeddingCache};
use crate::models::{FileRecord, IndexMeta, IndexedChunk, MemorySource};

use super::{KeywordMatch, Store, VectorCandidate};

type CacheMapKey = (CacheKey, String);

/// In-memory store for tests.
pub struct InMemoryStore {
    meta: RwLock<Option<IndexMeta>>,
    files: RwLock<HashMap<(String, MemorySource), FileRecord>>,
    chunks: RwLock<Vec<IndexedChunk>>,
    cache: RwLock<HashMap<CacheMapKey, Vec<f32>>>,
    keyword_search: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            meta: RwLock::new(None),
            files: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            cache: RwLock::new(HashMap::new()),
            keyword_search: true,
        }
    }

    /// A store that behaves like a backend whose full-text index failed to
    /// initialize.
    pub fn without_keyword_search() -> Self {
        Self {
            keyword_search: false,
            ..Self::new()
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Unquoted, lowercased tokens of an FTS query string.
fn query_tokens(fts_query: &str) -> Vec<String> {
    fts_query
        .split(" AND ")
        .map(|t| t.trim().trim_matches('"').to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

#[async_trait]
impl EmbeddingCache for InMemoryStore {
    async fn lookup_embeddings(
        &self,
        key: &CacheKey,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        Ok(hashes
            .iter()
            .filter_map(|h| {
                cache
                    .get(&(key.clone(), h.clone()))
                    .filter(|v| !v.is_empty())
                    .map(|v| (h.clone(), v.clone()))
            })
            .collect())
    }

    async fn store_embeddings(&self, key: &CacheKey, entries: &[CacheEntry]) -> Result<()> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        for e in entries {
            cache.insert((key.clone(), e.hash.clone()), e.embedding.clone());
        }
        Ok(())
    }

    async fn cached_embedding_count(&self) -> Result<usize> {
        Ok(self.cache.read().unwrap_or_else(PoisonError::into_inner).len())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn read_meta(&self) -> Result<Option<IndexMeta>> {
        Ok(self.meta.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        *self.meta.write().unwrap_or_else(PoisonError::into_inner) = Some(meta.clone());
        Ok(())
    }

    async fn reset_index(&self) -> Result<()> {
        self.files.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.chunks.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }

    async fn get_file(&self, path: &str, source: MemorySource) -> Result<Option<FileRecord>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files.get(&(path.to_string(), source)).cloned())
    }

    async fn list_files(&self, source: MemorySource) -> Result<Vec<FileRecord>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<FileRecord> = files
            .values()
            .filter(|f| f.source == source)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    async fn upsert_file(&self, file: &FileRecord) -> Result<()> {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        files.insert((file.path.clone(), file.source), file.clone());
        Ok(())
    }

    async fn delete_file(&self, path: &str, source: MemorySource) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(path.to_string(), source));
        self.chunks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|c| !(c.path == path && c.source == source));
        Ok(())
    }

    async fn replace_chunks(
        &self,
        path: &str,
        source: MemorySource,
        chunks: &[IndexedChunk],
    ) -> Result<()> {
        let mut stored = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        stored.retain(|c| !(c.path == path && c.source == source));
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.chunks.read().unwrap_or_else(PoisonError::into_inner).len())
    }

    async fn vector_candidates(&self, model: &str) -> Result<Vec<VectorCandidate>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks
            .iter()
            .filter(|c| c.model == model && !c.embedding.is_empty())
            .map(|c| VectorCandidate {
                id: c.id.clone(),
                path: c.path.clone(),
                source: c.source,
                start_line: c.start_line,
                end_line: c.end_line,
                text: c.text.clone(),
                embedding: c.embedding.clone(),
            })
            .collect())
    }

    fn keyword_search_available(&self) -> bool {
        self.keyword_search
    }

    async fn keyword_search(
        &self,
        fts_query: &str,
        model: &str,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>> {
        if !self.keyword_search {
            return Ok(Vec::new());
        }
        let tokens = query_tokens(fts_query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        let mut matches: Vec<KeywordMatch> = chunks
            .iter()
            .filter(|c| c.model == model)
            .filter_map(|c| {
                let text_lower = c.text.to_lowercase();
                if !tokens.iter().all(|t| text_lower.contains(t.as_str())) {
                    return None;
                }
                let occurrences: usize = tokens
                    .iter()
                    .map(|t| text_lower.matches(t.as_str()).count())
                    .sum();
                Some(KeywordMatch {
                    id: c.id.clone(),
                    path: c.path.clone(),
                    source: c.source,
                    start_line: c.start_line,
                    end_line: c.end_line,
                    text: c.text.clone(),
                    rank: -(occurrences as f64),
                })
            })
            .collect();
        matches.sort_by(|a, b| a.rank.total_cmp(&b.rank));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey {
            provider: "mock".into(),
            model: "m".into(),
            provider_key: "pk".into(),
        }
    }

    fn file(path: &str) -> FileRecord {
        FileRecord {
            path: path.into(),
            source: MemorySource::Memory,
            hash: "h".into(),
            mtime: 0,
            size: 1,
        }
    }

    #[tokio::test]
    async fn test_cache_miss_is_absent() {
        let store = InMemoryStore::new();
        store
            .store_embeddings(
                &key(),
                &[
                    CacheEntry { hash: "a".into(), embedding: vec![1.0] },
                    CacheEntry { hash: "empty".into(), embedding: vec![] },
                ],
            )
            .await
            .unwrap();
        let found = store
            .lookup_embeddings(&key(), &["a".into(), "b".into(), "empty".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"], vec![1.0]);
    }

    #[tokio::test]
    async fn test_cache_keyed_by_provider_identity() {
        let store = InMemoryStore::new();
        store
            .store_embeddings(&key(), &[CacheEntry { hash: "a".into(), embedding: vec![1.0] }])
            .await
            .unwrap();
        let mut other = key();
        other.provider_key = "different".into();
        assert!(store.lookup_embeddings(&other, &["a".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_file_cascades_and_reset_keeps_cache() {
        let store = InMemoryStore::new();
        store.upsert_file(&file("MEMORY.md")).await.unwrap();
        store.upsert_file(&file("memory/a.md")).await.unwrap();
        store.delete_file("MEMORY.md", MemorySource::Memory).await.unwrap();
        assert_eq!(store.list_files(MemorySource::Memory).await.unwrap().len(), 1);

        store
            .store_embeddings(&key(), &[CacheEntry { hash: "a".into(), embedding: vec![1.0] }])
            .await
            .unwrap();
        store.reset_index().await.unwrap();
        assert!(store.list_files(MemorySource::Memory).await.unwrap().is_empty());
        assert_eq!(store.cached_embedding_count().await.unwrap(), 1);
    }

    #[test]
    fn test_query_tokens() {
        assert_eq!(query_tokens("\"Docker\" AND \"k8s\""), vec!["docker", "k8s"]);
    }
}
