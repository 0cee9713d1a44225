//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] and [`EmbeddingCache`] operation onto the schema
//! created by [`crate::migrate`]: `meta`, `files`, `chunks`,
//! `embedding_cache` and the optional `chunks_fts` FTS5 table. Vectors are
//! stored as JSON arrays.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use memory_harness_core::cache::{CacheEntry, CacheKey, EmbeddingCache, CACHE_LOOKUP_BATCH};
use memory_harness_core::embedding::{parse_vector_json, vector_to_json};
use memory_harness_core::models::{FileRecord, IndexMeta, IndexedChunk, MemorySource};
use memory_harness_core::store::{KeywordMatch, Store, VectorCandidate};

const META_KEY: &str = "memory_index_meta_v1";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
    fts_available: bool,
}

impl SqliteStore {
    /// Wrap a migrated pool. `fts_available` comes from
    /// [`SchemaStatus`](crate::migrate::SchemaStatus).
    pub fn new(pool: SqlitePool, fts_available: bool) -> Self {
        Self {
            pool,
            fts_available,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_source(row: &SqliteRow) -> MemorySource {
    let raw: String = row.get("source");
    MemorySource::parse(&raw).unwrap_or(MemorySource::Memory)
}

fn row_line(row: &SqliteRow, col: &str) -> usize {
    let v: i64 = row.get(col);
    v.max(0) as usize
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl EmbeddingCache for SqliteStore {
    async fn lookup_embeddings(
        &self,
        key: &CacheKey,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();

        for batch in hashes.chunks(CACHE_LOOKUP_BATCH) {
            let placeholders = vec!["?"; batch.len()].join(", ");
            let sql = format!(
                "SELECT hash, embedding FROM embedding_cache \
                 WHERE provider = ? AND model = ? AND provider_key = ? AND hash IN ({})",
                placeholders
            );

            let mut query = sqlx::query(&sql)
                .bind(&key.provider)
                .bind(&key.model)
                .bind(&key.provider_key);
            for hash in batch {
                query = query.bind(hash);
            }

            for row in query.fetch_all(&self.pool).await? {
                let hash: String = row.get("hash");
                let raw: String = row.get("embedding");
                let vector = parse_vector_json(&raw);
                if vector.is_empty() {
                    tracing::warn!(hash = %hash, "ignoring malformed cached embedding");
                    continue;
                }
                found.insert(hash, vector);
            }
        }

        Ok(found)
    }

    async fn store_embeddings(&self, key: &CacheKey, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = now_millis();
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO embedding_cache (provider, model, provider_key, hash, embedding, dims, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(provider, model, provider_key, hash) DO UPDATE SET
                    embedding = excluded.embedding,
                    dims = excluded.dims,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&key.provider)
            .bind(&key.model)
            .bind(&key.provider_key)
            .bind(&entry.hash)
            .bind(vector_to_json(&entry.embedding))
            .bind(entry.embedding.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn cached_embedding_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn read_meta(&self) -> Result<Option<IndexMeta>> {
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(META_KEY)
            .fetch_optional(&self.pool)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<IndexMeta>(&raw) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(error = %e, "corrupt index metadata, treating as absent");
                Ok(None)
            }
        }
    }

    async fn write_meta(&self, meta: &IndexMeta) -> Result<()> {
        let value = serde_json::to_string(meta)?;
        sqlx::query(
            r#"
            INSERT INTO meta (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(META_KEY)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_index(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        if self.fts_available {
            sqlx::query("DELETE FROM chunks_fts").execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_file(&self, path: &str, source: MemorySource) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT path, source, hash, mtime, size FROM files WHERE path = ? AND source = ?",
        )
        .bind(path)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| FileRecord {
            path: row.get("path"),
            source: row_source(&row),
            hash: row.get("hash"),
            mtime: row.get("mtime"),
            size: row.get("size"),
        }))
    }

    async fn list_files(&self, source: MemorySource) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query(
            "SELECT path, source, hash, mtime, size FROM files WHERE source = ? ORDER BY path ASC",
        )
        .bind(source.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| FileRecord {
                path: row.get("path"),
                source: row_source(row),
                hash: row.get("hash"),
                mtime: row.get("mtime"),
                size: row.get("size"),
            })
            .collect())
    }

    async fn upsert_file(&self, file: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (path, source, hash, mtime, size)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(path, source) DO UPDATE SET
                hash = excluded.hash,
                mtime = excluded.mtime,
                size = excluded.size
            "#,
        )
        .bind(&file.path)
        .bind(file.source.as_str())
        .bind(&file.hash)
        .bind(file.mtime)
        .bind(file.size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str, source: MemorySource) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if self.fts_available {
            sqlx::query("DELETE FROM chunks_fts WHERE path = ? AND source = ?")
                .bind(path)
                .bind(source.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE path = ? AND source = ?")
            .bind(path)
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM files WHERE path = ? AND source = ?")
            .bind(path)
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn replace_chunks(
        &self,
        path: &str,
        source: MemorySource,
        chunks: &[IndexedChunk],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        if self.fts_available {
            sqlx::query("DELETE FROM chunks_fts WHERE path = ? AND source = ?")
                .bind(path)
                .bind(source.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query("DELETE FROM chunks WHERE path = ? AND source = ?")
            .bind(path)
            .bind(source.as_str())
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, path, source, start_line, end_line, hash, model, text, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.path)
            .bind(chunk.source.as_str())
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.hash)
            .bind(&chunk.model)
            .bind(&chunk.text)
            .bind(vector_to_json(&chunk.embedding))
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;

            if self.fts_available {
                sqlx::query(
                    r#"
                    INSERT INTO chunks_fts (text, id, path, source, model, start_line, end_line)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.text)
                .bind(&chunk.id)
                .bind(&chunk.path)
                .bind(chunk.source.as_str())
                .bind(&chunk.model)
                .bind(chunk.start_line as i64)
                .bind(chunk.end_line as i64)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn chunk_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn vector_candidates(&self, model: &str) -> Result<Vec<VectorCandidate>> {
        let rows = sqlx::query(
            "SELECT id, path, source, start_line, end_line, text, embedding FROM chunks WHERE model = ?",
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let raw: String = row.get("embedding");
            let embedding = parse_vector_json(&raw);
            if embedding.is_empty() {
                let id: String = row.get("id");
                tracing::warn!(chunk_id = %id, "skipping chunk with malformed embedding");
                continue;
            }
            candidates.push(VectorCandidate {
                id: row.get("id"),
                path: row.get("path"),
                source: row_source(row),
                start_line: row_line(row, "start_line"),
                end_line: row_line(row, "end_line"),
                text: row.get("text"),
                embedding,
            });
        }

        Ok(candidates)
    }

    fn keyword_search_available(&self) -> bool {
        self.fts_available
    }

    async fn keyword_search(
        &self,
        fts_query: &str,
        model: &str,
        limit: usize,
    ) -> Result<Vec<KeywordMatch>> {
        if !self.fts_available {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id, path, source,
                   CAST(start_line AS INTEGER) AS start_line,
                   CAST(end_line AS INTEGER) AS end_line,
                   text,
                   bm25(chunks_fts) AS rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ? AND model = ?
            ORDER BY rank ASC
            LIMIT ?
            "#,
        )
        .bind(fts_query)
        .bind(model)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| KeywordMatch {
                id: row.get("id"),
                path: row.get("path"),
                source: row_source(row),
                start_line: row_line(row, "start_line"),
                end_line: row_line(row, "end_line"),
                text: row.get("text"),
                rank: row.get("rank"),
            })
            .collect())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
