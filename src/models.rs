//! Core data models shared by ingestion, retrieval, and the chat handler.

use serde::{Deserialize, Serialize};

/// A chunk of a source document, ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic ID, see [`chunk_id`](crate::chunk::chunk_id).
    pub id: String,
    pub text: String,
    /// Free-form metadata; the `"source"` key labels where the text came from.
    pub metadata: serde_json::Value,
}

impl ChunkRecord {
    /// The `"source"` metadata entry, if present and a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }
}

/// A chunk returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDoc {
    pub id: String,
    pub text: String,
    pub source: Option<String>,
    /// Cosine similarity to the query, higher is closer.
    pub score: f32,
}

impl RetrievedDoc {
    /// Label used when citing this chunk: its source, or its ID.
    pub fn label(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.id)
    }
}
