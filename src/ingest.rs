//! Offline ingestion: folder → text extraction → chunking → vector store.
//!
//! Walks a folder recursively, extracts text from every supported file
//! (see [`extract`](crate::extract)), splits it with the sliding-window
//! chunker, and upserts all chunks in one call. Chunk IDs depend only on the
//! file path and chunk index, so re-running ingestion over the same folder
//! replaces earlier chunks instead of duplicating them.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use walkdir::WalkDir;

use crate::chunk::{chunk_id, chunk_text};
use crate::extract::{read_document, DocumentKind};
use crate::rag::RagStore;

/// Counters reported at the end of an ingestion run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    pub files_found: usize,
    pub files_ingested: usize,
    pub files_blank: usize,
    pub chunks_written: usize,
}

/// Supported files under `folder`, sorted for deterministic ordering.
pub fn collect_files(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if DocumentKind::from_path(entry.path()).is_some() {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

/// Ingest every supported file under `folder` into `rag`.
pub async fn ingest_folder(
    folder: &Path,
    rag: &RagStore,
    chunk_size: usize,
    overlap: usize,
) -> Result<IngestStats> {
    if !folder.exists() {
        bail!("Folder does not exist: {}", folder.display());
    }

    let paths = collect_files(folder)?;
    let mut stats = IngestStats {
        files_found: paths.len(),
        ..IngestStats::default()
    };

    let mut ids = Vec::new();
    let mut texts = Vec::new();
    let mut metadatas = Vec::new();

    for path in &paths {
        let text = read_document(path)?.unwrap_or_default();
        if text.trim().is_empty() {
            tracing::debug!(path = %path.display(), "skipping blank document");
            stats.files_blank += 1;
            continue;
        }

        let source = path.display().to_string();
        let chunks = chunk_text(&text, chunk_size, overlap);
        tracing::debug!(path = %source, chunks = chunks.len(), "chunked document");

        for (idx, chunk) in chunks.into_iter().enumerate() {
            ids.push(chunk_id(&source, idx));
            texts.push(chunk);
            metadatas.push(serde_json::json!({ "source": source }));
        }
        stats.files_ingested += 1;
    }

    stats.chunks_written = ids.len();
    if !ids.is_empty() {
        rag.upsert(&ids, &texts, &metadatas)
            .await
            .with_context(|| format!("Failed to store chunks from {}", folder.display()))?;
    }

    tracing::info!(
        folder = %folder.display(),
        collection = rag.collection(),
        files = stats.files_ingested,
        chunks = stats.chunks_written,
        "ingestion finished"
    );

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("b.md"), "b").unwrap();
        fs::write(root.join("a.TXT"), "a").unwrap();
        fs::write(root.join("nested/deeper/c.htm"), "<p>c</p>").unwrap();
        fs::write(root.join("nested/skip.png"), [0u8]).unwrap();

        let files = collect_files(root).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["a.TXT", "b.md", "nested/deeper/c.htm"]);
    }
}
