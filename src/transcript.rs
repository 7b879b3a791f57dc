//! Saved thread transcripts.
//!
//! `/add_rag` serializes a thread to a Markdown file under
//! `{RAG_DOCUMENTS_PATH}/threads/`, where the next ingestion run picks it up.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Longest file stem written for a transcript.
const MAX_FILENAME_CHARS: usize = 80;

/// A conversation thread on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRef {
    pub id: u64,
    pub name: String,
    pub parent_name: Option<String>,
}

/// Make a thread title safe to use as a file stem.
///
/// Runs of characters outside `[A-Za-z0-9._-]` become `_`, leading and
/// trailing `.`, `_` and `-` are trimmed, an empty result becomes
/// `"thread"`, and the stem is capped at 80 characters.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            cleaned.push(c);
            in_run = false;
        } else if !in_run {
            cleaned.push('_');
            in_run = true;
        }
    }

    let trimmed = cleaned.trim_matches(|c| matches!(c, '.' | '_' | '-'));
    if trimmed.is_empty() {
        return "thread".to_string();
    }
    trimmed.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Transcript path for `thread` under `documents_root`.
pub fn transcript_path(documents_root: &Path, thread: &ThreadRef) -> PathBuf {
    let stem = if thread.name.is_empty() {
        format!("thread-{}", thread.id)
    } else {
        thread.name.clone()
    };
    documents_root
        .join("threads")
        .join(format!("{}.md", sanitize_filename(&stem)))
}

/// Markdown body: a small header followed by the conversation.
pub fn render_transcript(thread: &ThreadRef, content: &str) -> String {
    let title = if thread.name.is_empty() {
        "Thread"
    } else {
        thread.name.as_str()
    };
    let mut header = vec![format!("# {}", title), format!("Thread ID: {}", thread.id)];
    if let Some(parent) = &thread.parent_name {
        header.push(format!("Parent channel: {}", parent));
    }
    header.push(String::new());
    format!("{}\n{}", header.join("\n"), content)
}

/// Write the transcript, creating directories as needed. Overwrites any
/// previous transcript of the same thread.
pub async fn write_thread_document(
    documents_root: &Path,
    thread: &ThreadRef,
    content: &str,
) -> Result<PathBuf> {
    let path = transcript_path(documents_root, thread);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    tokio::fs::write(&path, render_transcript(thread, content))
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
