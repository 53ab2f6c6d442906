//! Library status overview.
//!
//! Provides a quick summary of library health: book counts by status,
//! chunk totals, whether an index is built, and a cached consistency check.
//! Used by `shelf status` to give confidence that ingests and repairs are
//! working as expected.

use anyhow::Result;
use std::time::Duration;

use crate::config::Config;
use crate::index::INDEX_DIR;
use crate::library::{load_manifest, ManifestState, VerifyCache};
use crate::models::BookStatus;

/// Run the status command: read the manifest and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let root = &config.library.root;
    let library = match load_manifest(root) {
        ManifestState::Present(lib) => lib,
        ManifestState::Absent => {
            println!("No library found at {} (run `shelf ingest` first)", root.display());
            return Ok(());
        }
        ManifestState::Corrupt => {
            println!(
                "Library manifest at {} is corrupt (run `shelf repair` to rebuild it)",
                root.display()
            );
            return Ok(());
        }
    };

    let ready = library
        .books
        .iter()
        .filter(|b| b.status == BookStatus::Ready)
        .count();
    let processing = library
        .books
        .iter()
        .filter(|b| b.status == BookStatus::Processing)
        .count();
    let errored = library
        .books
        .iter()
        .filter(|b| b.status == BookStatus::Error)
        .count();
    let total_chunks: usize = library.books.iter().map(|b| b.chunk_count).sum();
    let index_exists = root.join(INDEX_DIR).exists();

    println!("Bookshelf — Library Status");
    println!("==========================");
    println!();
    println!("  Library:     {}", root.display());
    println!("  Version:     {}", library.version);
    println!("  Updated:     {}", library.updated_at);
    println!();
    println!("  Books:       {} ({} ready, {} processing, {} error)",
        library.books.len(), ready, processing, errored);
    println!("  Chunks:      {}", total_chunks);
    if let Some(avg) = library.avg_ingest_ms {
        println!("  Avg ingest:  {} ms", avg);
    }
    println!("  Index:       {}", if index_exists { "built" } else { "not built" });

    if !library.books.is_empty() {
        println!();
        println!("  {:<12} {:<28} {:>8} {:<10}  {}", "BOOK", "FILE", "CHUNKS", "STATUS", "UPDATED");
        println!("  {}", "-".repeat(76));
        for book in &library.books {
            let short_id: String = book.book_id.chars().take(12).collect();
            let status = if book.superseded_by.is_empty() {
                book.status.to_string()
            } else {
                format!("{} (superseded)", book.status)
            };
            println!(
                "  {:<12} {:<28} {:>8} {:<10}  {}",
                short_id, book.filename, book.chunk_count, status, book.updated_at
            );
            if let Some(msg) = &book.error_message {
                println!("    error: {}", msg);
            }
        }
    }

    let mut cache = VerifyCache::new(Duration::from_secs(config.verify.cache_ttl_secs));
    let outcome = cache.verify(root, &library);
    println!();
    if outcome.ok {
        println!("  Consistency: ok");
    } else {
        println!("  Consistency: {} issue(s)", outcome.issues.len());
        for issue in &outcome.issues {
            println!("    {}", issue);
        }
    }
    println!();
    Ok(())
}
