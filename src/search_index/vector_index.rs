use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::{Arc, Once};
use std::time::Duration;
use zerocopy::IntoBytes;

use super::{IndexError, IndexMetadata, SearchIndex, TextEmbedder};

static REGISTER_VEC_EXTENSION: Once = Once::new();

/// Makes sqlite-vec available on every connection opened afterwards.
fn register_vec_extension() {
    REGISTER_VEC_EXTENSION.call_once(|| unsafe {
        libsqlite3_sys::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// Vector index stored in its own SQLite file, separate from the catalog.
pub struct VectorIndex {
    pool: SqlitePool,
    embedder: Arc<dyn TextEmbedder>,
}

impl VectorIndex {
    pub async fn open(path: &Path, embedder: Arc<dyn TextEmbedder>) -> Result<Self, IndexError> {
        register_vec_extension();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS indexed_documents (
                entry_id INTEGER PRIMARY KEY,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        // vec0 tables only hold vectors, the rowid is the entry id
        sqlx::query(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS document_vectors USING vec0(embedding float[{}])",
            embedder.dimensions()
        ))
        .execute(&pool)
        .await?;

        info!("Search index ready at {}", path.display());
        Ok(Self { pool, embedder })
    }

    async fn embed(&self, text: &str) -> Result<Vec<u8>, IndexError> {
        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&text)).await??;

        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(IndexError::Dimensions {
                expected,
                actual: vector.len(),
            });
        }
        Ok(vector.as_slice().as_bytes().to_vec())
    }

    pub async fn len(&self) -> Result<i64, IndexError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM indexed_documents")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }

    /// Stored text and metadata for `id`.
    pub async fn document(&self, id: i64) -> Result<Option<(String, IndexMetadata)>, IndexError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT text, metadata FROM indexed_documents WHERE entry_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((text, metadata)) => Ok(Some((text, serde_json::from_str(&metadata)?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SearchIndex for VectorIndex {
    async fn upsert(&self, id: i64, text: &str, metadata: &IndexMetadata) -> Result<(), IndexError> {
        let embedding = self.embed(text).await?;
        let metadata = serde_json::to_string(metadata)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM document_vectors WHERE rowid = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO document_vectors (rowid, embedding) VALUES (?, ?)")
            .bind(id)
            .bind(embedding)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO indexed_documents (entry_id, text, metadata, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(entry_id) DO UPDATE SET text = excluded.text,
                                                 metadata = excluded.metadata,
                                                 updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(text)
        .bind(metadata)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Indexed entry {}", id);
        Ok(())
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<i64>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed(text).await?;

        // vec_distance_cosine: 0 = identical, 2 = opposite
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT rowid FROM document_vectors
             ORDER BY vec_distance_cosine(embedding, ?)
             LIMIT ?",
        )
        .bind(embedding)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        debug!("Search for '{}' returned {} ids", text, ids.len());
        Ok(ids)
    }
}
