//! Retrieval from the command line.
//!
//! `reachy-bot query "<text>"` runs the same similarity lookup the bot uses
//! when answering a question and prints the ranked chunks, which makes it
//! easy to check what context a question would pull in.

use anyhow::Result;

use crate::config::Settings;
use crate::models::RetrievedDoc;
use crate::rag::RagStore;

/// Longest excerpt printed per result.
const EXCERPT_CHARS: usize = 240;

/// Run the query command: retrieve the top `k` chunks and print them.
pub async fn run_query(settings: &Settings, text: &str, k: usize) -> Result<()> {
    let rag = RagStore::from_settings(settings).await?;
    let docs = rag.query(text, k).await?;
    print!("{}", render_results(&docs));
    Ok(())
}

/// Numbered, human-readable listing of retrieved chunks.
pub fn render_results(docs: &[RetrievedDoc]) -> String {
    if docs.is_empty() {
        return "No results.\n".to_string();
    }

    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        out.push_str(&format!("{}. [{:.2}] {}\n", i + 1, doc.score, doc.label()));
        out.push_str(&format!("    excerpt: \"{}\"\n", excerpt(&doc.text)));
        out.push_str(&format!("    id: {}\n\n", doc.id));
    }
    out
}

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_empty() {
        assert_eq!(render_results(&[]), "No results.\n");
    }

    #[test]
    fn test_render_results() {
        let docs = vec![RetrievedDoc {
            id: "abc".into(),
            text: "Hold the\npower button.".into(),
            source: Some("docs/reset.md".into()),
            score: 0.876,
        }];
        assert_eq!(
            render_results(&docs),
            "1. [0.88] docs/reset.md\n    excerpt: \"Hold the power button.\"\n    id: abc\n\n"
        );
    }

    #[test]
    fn test_excerpt_truncates() {
        let long = "word ".repeat(100);
        let e = excerpt(&long);
        assert!(e.ends_with("..."));
        assert_eq!(e.chars().count(), EXCERPT_CHARS + 3);
    }
}
