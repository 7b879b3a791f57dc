//! In-memory [`Store`] implementation for tests.
//!
//! Uses a `HashMap` per collection behind `std::sync::RwLock`. Vector
//! search is brute-force cosine similarity over all stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::ChunkRecord;

use super::{top_k, ScoredChunk, Store};

struct StoredChunk {
    record: ChunkRecord,
    vector: Vec<f32>,
}

/// In-memory store, one map of chunks per collection.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, StoredChunk>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut guard = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        if let Some(chunks) = guard.get_mut(collection) {
            for id in ids {
                chunks.remove(id);
            }
        }
        Ok(())
    }

    async fn insert(
        &self,
        collection: &str,
        records: &[ChunkRecord],
        vectors: &[Vec<f32>],
        _model: &str,
    ) -> Result<()> {
        if records.len() != vectors.len() {
            bail!(
                "insert: {} records but {} vectors",
                records.len(),
                vectors.len()
            );
        }
        let mut guard = self
            .collections
            .write()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let chunks = guard.entry(collection.to_string()).or_default();
        let mut seen = HashSet::new();
        for record in records {
            if chunks.contains_key(&record.id) || !seen.insert(record.id.as_str()) {
                bail!("insert: id {} already exists in {}", record.id, collection);
            }
        }
        for (record, vector) in records.iter().zip(vectors) {
            chunks.insert(
                record.id.clone(),
                StoredChunk {
                    record: record.clone(),
                    vector: vector.clone(),
                },
            );
        }
        Ok(())
    }

    async fn nearest(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let candidates = guard
            .get(collection)
            .map(|chunks| {
                chunks
                    .values()
                    .map(|sc| ScoredChunk {
                        record: sc.record.clone(),
                        similarity: cosine_similarity(query_vec, &sc.vector),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(top_k(candidates, k))
    }

    async fn ids(&self, collection: &str) -> Result<Vec<String>> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        let mut ids: Vec<String> = guard
            .get(collection)
            .map(|chunks| chunks.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        Ok(ids)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let guard = self
            .collections
            .read()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        Ok(guard.get(collection).map(|c| c.len()).unwrap_or(0))
    }
}
