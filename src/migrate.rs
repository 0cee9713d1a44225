//! Schema bootstrap.
//!
//! All statements are idempotent. The FTS5 table is optional: when the
//! SQLite build lacks FTS5 the error is logged and the index runs in
//! vector-only mode.

use anyhow::Result;
use sqlx::SqlitePool;

/// Outcome of [`run_migrations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaStatus {
    pub fts_available: bool,
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<SchemaStatus> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'memory',
            hash TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            size INTEGER NOT NULL,
            PRIMARY KEY (path, source)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT 'memory',
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            provider_key TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding TEXT NOT NULL,
            dims INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (provider, model, provider_key, hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path, source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_model ON chunks(model)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedding_cache_updated_at ON embedding_cache(updated_at)",
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if fts_exists {
        return Ok(SchemaStatus { fts_available: true });
    }

    let created = sqlx::query(
        r#"
        CREATE VIRTUAL TABLE chunks_fts USING fts5(
            text,
            id UNINDEXED,
            path UNINDEXED,
            source UNINDEXED,
            model UNINDEXED,
            start_line UNINDEXED,
            end_line UNINDEXED
        )
        "#,
    )
    .execute(pool)
    .await;

    match created {
        Ok(_) => Ok(SchemaStatus { fts_available: true }),
        Err(e) => {
            tracing::warn!(error = %e, "FTS5 unavailable, keyword search disabled");
            Ok(SchemaStatus {
                fts_available: false,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect(&tmp.path().join("m.sqlite")).await.unwrap();
        let first = run_migrations(&pool).await.unwrap();
        let second = run_migrations(&pool).await.unwrap();
        assert_eq!(first, second);

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('meta','files','chunks','embedding_cache') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(tables, vec!["chunks", "embedding_cache", "files", "meta"]);
        pool.close().await;
    }
}
