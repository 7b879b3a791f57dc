//! Fixed-size sliding-window text chunker.
//!
//! Splits document text into overlapping windows of `size` characters.
//! Consecutive windows share `overlap` characters so that sentences cut at
//! a window edge still appear whole in one of the neighbours. Windows are
//! counted in Unicode scalar values, never bytes, so multi-byte text is
//! never split inside a character.
//!
//! Each chunk is identified by a deterministic ID derived from its source
//! path and index, so re-ingesting a file replaces its previous chunks.

use sha2::{Digest, Sha256};

/// Default window size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1500;
/// Default number of characters shared between neighbouring windows.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Split text into overlapping windows.
///
/// Line endings are normalized to `\n` first. The window advances by
/// `size - overlap` characters, but always by at least one, so an overlap
/// greater than or equal to the size still terminates. The final window may
/// be shorter than `size` and always ends at the end of the text.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let chars: Vec<char> = normalized.chars().collect();
    let n = chars.len();
    let size = size.max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < n {
        let end = (start + size).min(n);
        chunks.push(chars[start..end].iter().collect());
        if end == n {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }

    chunks
}

/// Deterministic chunk identifier for `(source, index)`.
///
/// Hex-encoded SHA-256 of `"{source}::{index}"`.
pub fn chunk_id(source: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}::{}", source, index).as_bytes());
    format!("{:x}", hasher.finalize())
}
