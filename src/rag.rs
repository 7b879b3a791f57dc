//! Vector store wrapper used by ingestion and the chat handler.
//!
//! [`RagStore`] binds a [`Store`] backend, an [`EmbeddingProvider`], and a
//! collection name. It turns raw texts into embedded chunks on the way in
//! and query strings into ranked [`RetrievedDoc`]s on the way out.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Settings;
use crate::embedding::{embed_query, EmbeddingProvider, OpenAiEmbeddings};
use crate::models::{ChunkRecord, RetrievedDoc};
use crate::sqlite_store::SqliteStore;
use crate::store::Store;

/// Number of texts sent per embeddings request.
pub const EMBED_BATCH_SIZE: usize = 64;

/// Retrieval front-end over a single collection.
#[derive(Clone)]
pub struct RagStore {
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    collection: String,
}

impl RagStore {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            embedder,
            collection: collection.into(),
        }
    }

    /// SQLite-backed store with OpenAI embeddings, as configured.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let store = SqliteStore::open(&settings.db_file()).await?;
        let embedder = OpenAiEmbeddings::new(
            &settings.openai_api_key,
            &settings.openai_base_url,
            &settings.openai_embedding_model,
        )?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(embedder),
            settings.rag_collection.clone(),
        ))
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Insert or replace chunks by ID.
    ///
    /// Existing entries with the same IDs are deleted first, so running the
    /// same upsert twice leaves exactly one copy of each chunk. A failing
    /// delete is logged and otherwise ignored; embedding and insert errors
    /// propagate.
    pub async fn upsert(
        &self,
        ids: &[String],
        texts: &[String],
        metadatas: &[serde_json::Value],
    ) -> Result<()> {
        if ids.len() != texts.len() || ids.len() != metadatas.len() {
            bail!(
                "upsert: mismatched lengths (ids={}, texts={}, metadatas={})",
                ids.len(),
                texts.len(),
                metadatas.len()
            );
        }
        if ids.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.store.delete(&self.collection, ids).await {
            tracing::warn!(error = %e, collection = %self.collection, "pre-insert delete failed");
        }

        let records: Vec<ChunkRecord> = ids
            .iter()
            .zip(texts)
            .zip(metadatas)
            .map(|((id, text), metadata)| ChunkRecord {
                id: id.clone(),
                text: text.clone(),
                metadata: metadata.clone(),
            })
            .collect();

        for batch in records.chunks(EMBED_BATCH_SIZE) {
            let batch_texts: Vec<String> = batch.iter().map(|r| r.text.clone()).collect();
            let vectors = self.embedder.embed(&batch_texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }
            self.store
                .insert(
                    &self.collection,
                    batch,
                    &vectors,
                    self.embedder.model_name(),
                )
                .await?;
        }

        tracing::debug!(count = ids.len(), collection = %self.collection, "upserted chunks");
        Ok(())
    }

    /// Return up to `k` chunks most similar to `text`.
    ///
    /// A blank query returns nothing without calling the embedding provider.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedDoc>> {
        if text.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), text).await?;
        let hits = self.store.nearest(&self.collection, &query_vec, k).await?;

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedDoc {
                source: hit.record.source().map(str::to_string),
                id: hit.record.id,
                text: hit.record.text,
                score: hit.similarity,
            })
            .collect())
    }
}
