//! SQLite-backed [`Store`] implementation.
//!
//! Chunks live in a single `rag_chunks` table keyed by `(collection, id)`.
//! Embeddings are stored as little-endian `f32` BLOBs and compared with
//! brute-force cosine similarity in process, which is plenty for a support
//! corpus of a few thousand chunks.

use std::path::Path;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::ChunkRecord;
use crate::store::{top_k, ScoredChunk, Store};

/// SQLite's default bound-parameter limit is 999; stay well below it.
const DELETE_BATCH: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to `db_path` and make sure the schema exists.
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = db::connect(db_path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        for batch in ids.chunks(DELETE_BATCH) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM rag_chunks WHERE collection = ");
            qb.push_bind(collection);
            qb.push(" AND id IN (");
            let mut separated = qb.separated(", ");
            for id in batch {
                separated.push_bind(id.as_str());
            }
            separated.push_unseparated(")");
            qb.build().execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()> {
        if records.len() != vectors.len() {
            bail!(
                "insert: {} records but {} vectors",
                records.len(),
                vectors.len()
            );
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for (record, vector) in records.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO rag_chunks (collection, id, text, source, metadata_json,
                                        embedding, model, dims, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.text)
            .bind(record.source())
            .bind(record.metadata.to_string())
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(vector.len() as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn nearest(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM rag_chunks WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<ScoredChunk> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let metadata =
                    serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({}));
                ScoredChunk {
                    record: ChunkRecord {
                        id: row.get("id"),
                        text: row.get("text"),
                        metadata,
                    },
                    similarity: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(top_k(candidates, k))
    }

    async fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM rag_chunks WHERE collection = ? ORDER BY id")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
