//! Collection statistics.
//!
//! A quick summary of what is indexed: chunk count, embedding model and
//! dimensions, and a per-source breakdown with the time each source was last
//! ingested. Used by `reachy-bot stats` to confirm an ingestion run landed.

use std::path::Path;

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Settings;
use crate::sqlite_store::SqliteStore;

/// Per-source breakdown of chunk counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub chunk_count: i64,
    pub last_ingested: i64,
}

/// Totals for one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub collection: String,
    pub total_chunks: i64,
    /// Distinct `(model, dims)` pairs seen in the collection.
    pub models: Vec<(String, i64)>,
    pub sources: Vec<SourceStats>,
}

/// Gather statistics for `collection`.
pub async fn collect_stats(pool: &SqlitePool, collection: &str) -> Result<CollectionStats> {
    let total_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks WHERE collection = ?")
            .bind(collection)
            .fetch_one(pool)
            .await?;

    let model_rows = sqlx::query(
        "SELECT DISTINCT model, dims FROM rag_chunks WHERE collection = ? ORDER BY model, dims",
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;
    let models = model_rows
        .iter()
        .map(|row| (row.get::<String, _>("model"), row.get::<i64, _>("dims")))
        .collect();

    let source_rows = sqlx::query(
        r#"
        SELECT
            COALESCE(source, '(unknown)') AS source,
            COUNT(*) AS chunk_count,
            MAX(created_at) AS last_ingested
        FROM rag_chunks
        WHERE collection = ?
        GROUP BY source
        ORDER BY chunk_count DESC, source ASC
        "#,
    )
    .bind(collection)
    .fetch_all(pool)
    .await?;
    let sources = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            chunk_count: row.get("chunk_count"),
            last_ingested: row.get("last_ingested"),
        })
        .collect();

    Ok(CollectionStats {
        collection: collection.to_string(),
        total_chunks,
        models,
        sources,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(settings: &Settings) -> Result<()> {
    let db_file = settings.db_file();
    let store = SqliteStore::open(&db_file).await?;
    let stats = collect_stats(store.pool(), &settings.rag_collection).await?;
    print_stats(&db_file, &stats);
    store.close().await;
    Ok(())
}

fn print_stats(db_file: &Path, stats: &CollectionStats) {
    let db_size = std::fs::metadata(db_file).map(|m| m.len()).unwrap_or(0);

    println!("Reachy Mini RAG: Collection Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", db_file.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Collection:  {}", stats.collection);
    println!("  Chunks:      {}", stats.total_chunks);
    for (model, dims) in &stats.models {
        println!("  Model:       {} ({} dims)", model, dims);
    }

    if !stats.sources.is_empty() {
        println!();
        println!("  By source:");
        println!("  {:<48} {:>8}   {}", "SOURCE", "CHUNKS", "INGESTED");
        println!("  {}", "-".repeat(76));
        for s in &stats.sources {
            println!(
                "  {:<48} {:>8}   {}",
                s.source,
                s.chunk_count,
                format_ts_relative(s.last_ingested)
            );
        }
    }

    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, plural(mins))
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkRecord;
    use crate::store::Store;
    use tempfile::TempDir;

    fn rec(id: &str, source: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.to_string(),
            text: format!("text of {id}"),
            metadata: serde_json::json!({ "source": source }),
        }
    }

    #[tokio::test]
    async fn test_collect_stats_groups_by_source() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("rag.sqlite")).await.unwrap();
        store
            .insert(
                "reachy",
                &[rec("1", "docs/a.md"), rec("2", "docs/a.md"), rec("3", "docs/b.md")],
                &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                "embed-small",
            )
            .await
            .unwrap();
        store
            .insert("other", &[rec("4", "x.md")], &[vec![1.0, 0.0]], "embed-small")
            .await
            .unwrap();

        let stats = collect_stats(store.pool(), "reachy").await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.models, vec![("embed-small".to_string(), 2)]);
        assert_eq!(stats.sources.len(), 2);
        assert_eq!(stats.sources[0].source, "docs/a.md");
        assert_eq!(stats.sources[0].chunk_count, 2);
        assert_eq!(stats.sources[1].source, "docs/b.md");
    }

    #[tokio::test]
    async fn test_collect_stats_empty_collection() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&tmp.path().join("rag.sqlite")).await.unwrap();
        let stats = collect_stats(store.pool(), "reachy").await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert!(stats.models.is_empty());
        assert!(stats.sources.is_empty());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
