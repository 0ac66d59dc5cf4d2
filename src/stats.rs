//! Index statistics.
//!
//! Summarizes what the SQLite index holds per collection: documents,
//! chunks, and chunks stored without a vector because embedding failed.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::migrate::run_migrations;
use crate::sqlite_index::SqliteIndex;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    let index = SqliteIndex::new(pool);
    let stats = index.collection_stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("llm-index: index stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();

    if stats.is_empty() {
        println!("  No chunks indexed yet.");
        return Ok(());
    }

    let total_chunks: i64 = stats.iter().map(|s| s.chunks).sum();
    let total_missing: i64 = stats.iter().map(|s| s.without_vector).sum();
    println!("  Chunks:      {}", total_chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        total_chunks - total_missing,
        total_chunks,
        percent(total_chunks - total_missing, total_chunks)
    );
    println!();
    println!(
        "  {:<12} {:<20} {:>9} {:>8} {:>10}",
        "TENANT", "COLLECTION", "DOCUMENTS", "CHUNKS", "NO VECTOR"
    );
    for s in &stats {
        println!(
            "  {:<12} {:<20} {:>9} {:>8} {:>10}",
            s.tenant, s.collection_id, s.documents, s.chunks, s.without_vector
        );
    }
    Ok(())
}

fn percent(part: i64, total: i64) -> i64 {
    if total <= 0 {
        0
    } else {
        part * 100 / total
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;
    match bytes {
        b if b >= GB => format!("{:.1} GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
        b => format!("{} B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 0);
        assert_eq!(percent(3, 4), 75);
    }
}
