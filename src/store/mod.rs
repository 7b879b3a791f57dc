//! Storage abstraction for embedded chunks.
//!
//! The [`Store`] trait is the narrow surface the vector store wrapper
//! ([`RagStore`](crate::rag::RagStore)) needs: delete by ID, insert with
//! vectors, and nearest-neighbour lookup. Every operation is scoped to a
//! named collection so several corpora can share one database file.
//!
//! Implementations must be `Send + Sync`; the bot queries the store from
//! many event tasks at once.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ChunkRecord;

/// A stored chunk scored against a query vector.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    /// Cosine similarity to the query vector.
    pub similarity: f32,
}

/// Abstract vector storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`delete`](Store::delete) | Remove chunks by ID |
/// | [`insert`](Store::insert) | Add chunks with their vectors |
/// | [`nearest`](Store::nearest) | Top-k cosine similarity search |
/// | [`ids`](Store::ids) | List stored chunk IDs |
/// | [`count`](Store::count) | Number of stored chunks |
#[async_trait]
pub trait Store: Send + Sync {
    /// Remove the given IDs from a collection. Unknown IDs are ignored.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Insert chunks with their embedding vectors.
    ///
    /// `records` and `vectors` are parallel slices. Inserting an ID that
    /// already exists in the collection is an error; callers delete first.
    async fn insert(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
        model: &str,
    ) -> Result<()>;

    /// Return up to `k` chunks ordered by descending cosine similarity.
    async fn nearest(&self, collection: &str, query_vec: &[f32], k: usize)
        -> Result<Vec<ScoredChunk>>;

    /// All chunk IDs in a collection, sorted.
    async fn ids(&self, collection: &str) -> Result<Vec<String>>;

    /// Number of chunks in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Sort candidates by descending similarity and keep the top `k`.
pub(crate) fn top_k(mut candidates: Vec<ScoredChunk>, k: usize) -> Vec<ScoredChunk> {
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(k);
    candidates
}
