//! Incremental ingest orchestration.
//!
//! Scans a source directory, skips already-completed sources by content
//! hash, and drives per-source ingest: extract chunks, write the book folder
//! through the atomic writer, and record every state transition in the
//! manifest as it happens. A failure of one source never aborts the batch,
//! and re-running over an unchanged source set is a no-op beyond skip
//! bookkeeping.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use walkdir::WalkDir;

use crate::atomic::{atomic_copy, atomic_write, hash_file};
use crate::config::Config;
use crate::extract::{ChunkExtractor, TextExtractor};
use crate::index;
use crate::library::{
    book_dir, infer_supersession, load_manifest, save_manifest, BOOK_META_FILE, CHUNKS_FILE,
    SOURCE_FILE,
};
use crate::models::{now_utc, BookStatus, ConsistencySummary, Library};

/// Per-book outcome detail for the batch report.
#[derive(Debug, Clone)]
pub struct IngestedBook {
    pub book_id: String,
    pub filename: String,
    pub chunk_count: usize,
    pub ingest_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SkippedBook {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct FailedBook {
    pub filename: String,
    pub error: String,
}

/// Structured result of an ingest batch.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub elapsed_ms: u64,
    pub ingested: Vec<IngestedBook>,
    pub skipped: Vec<SkippedBook>,
    pub failed: Vec<FailedBook>,
    pub avg_ingest_ms: u64,
    pub cancelled: bool,
    /// True only when at least one book newly reached `ready`; gates the
    /// downstream index rebuild.
    pub rebuild_needed: bool,
}

/// Enumerate source files in a stable lexicographic order.
///
/// Failing to read the source directory is a hard failure (non-zero exit at
/// the CLI), unlike per-source problems which are captured in the report.
pub fn scan_sources(dir: &Path, include: &[String], exclude: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        bail!("source directory does not exist: {}", dir.display());
    }
    let include_set = build_globset(include)?;
    let exclude_set = build_globset(exclude)?;

    let mut paths: Vec<(String, PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("failed to scan {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();
        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !include_set.is_match(&rel_str) {
            continue;
        }
        paths.push((rel_str, path.to_path_buf()));
    }
    paths.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(paths.into_iter().map(|(_, p)| p).collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("bad glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

/// Ingest `sources` into the library at `root`.
///
/// The manifest is persisted after every individual state transition, so an
/// interruption loses at most the in-flight book. `cancel` is checked
/// between sources, never mid-source; a cancelled in-flight book is left in
/// `processing` and is retried on the next run.
pub fn ingest_sources(
    root: &Path,
    sources: &[PathBuf],
    extractor: &dyn ChunkExtractor,
    cancel: &AtomicBool,
) -> Result<IngestReport> {
    let t0 = Instant::now();
    let mut report = IngestReport::default();

    let mut lib = load_manifest(root).into_library().unwrap_or_default();

    for path in sources {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            break;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let book_id = match hash_file(path) {
            Ok(id) => id,
            Err(e) => {
                report.failed.push(FailedBook {
                    filename,
                    error: format!("content read error: {:#}", e),
                });
                continue;
            }
        };

        if let Some(existing) = lib.find(&book_id) {
            if existing.status == BookStatus::Ready {
                report.skipped.push(SkippedBook {
                    filename,
                    reason: "duplicate_hash".to_string(),
                });
                continue;
            }
        }

        lib.mark_processing(&book_id, &filename);
        save_manifest(root, &lib)?;

        let book_t0 = Instant::now();
        match ingest_one(root, path, &book_id, &filename, extractor) {
            Ok(chunk_count) => {
                let ingest_ms = book_t0.elapsed().as_millis() as u64;
                lib.mark_ready(&book_id, chunk_count, ingest_ms);
                if let Some(rec) = lib.find_mut(&book_id) {
                    rec.title = Some(title_from_filename(&filename));
                }
                infer_supersession(&mut lib.books);
                // Book metadata mirrors the manifest record exactly so a
                // later repair over an untouched library is a no-op.
                if let Some(rec) = lib.find(&book_id) {
                    let mut body = serde_json::to_string_pretty(rec)?;
                    body.push('\n');
                    atomic_write(&book_dir(root, &book_id).join(BOOK_META_FILE), body.as_bytes())?;
                }
                save_manifest(root, &lib)?;

                report.ingested.push(IngestedBook {
                    book_id: book_id.clone(),
                    filename,
                    chunk_count,
                    ingest_ms,
                });
            }
            Err(e) => {
                let message = format!("{:#}", e);
                lib.mark_error(&book_id, &message);
                save_manifest(root, &lib)?;
                report.failed.push(FailedBook {
                    filename,
                    error: message,
                });
            }
        }
    }

    if !report.ingested.is_empty() {
        let total: u64 = report.ingested.iter().map(|b| b.ingest_ms).sum();
        report.avg_ingest_ms = total / report.ingested.len() as u64;
        lib.avg_ingest_ms = Some(report.avg_ingest_ms);
    }
    if lib.consistency.is_none() {
        lib.consistency = Some(ConsistencySummary::default());
    }
    lib.updated_at = now_utc();
    save_manifest(root, &lib)?;

    report.elapsed_ms = t0.elapsed().as_millis() as u64;
    report.rebuild_needed = !report.ingested.is_empty();
    Ok(report)
}

/// Extract and write one book's folder. Any error here marks the book
/// `error` and the batch continues.
fn ingest_one(
    root: &Path,
    path: &Path,
    book_id: &str,
    filename: &str,
    extractor: &dyn ChunkExtractor,
) -> Result<usize> {
    let book_name = title_from_filename(filename);
    let mut chunks = extractor
        .extract(path, &book_name)
        .with_context(|| format!("extraction failed for {}", filename))?;
    if chunks.is_empty() {
        bail!("extraction produced no chunks for {}", filename);
    }

    let mut lines = String::new();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.book_id = book_id.to_string();
        chunk.chunk_index = i;
        lines.push_str(&serde_json::to_string(chunk)?);
        lines.push('\n');
    }

    let dir = book_dir(root, book_id);
    atomic_write(&dir.join(CHUNKS_FILE), lines.as_bytes())?;
    atomic_copy(path, &dir.join(SOURCE_FILE))?;

    Ok(chunks.len())
}

fn title_from_filename(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
        .to_string()
}

/// CLI entry point: scan, ingest, report, and conditionally rebuild indices.
pub fn run_ingest(
    config: &Config,
    source_dir: Option<PathBuf>,
    dry_run: bool,
    skip_index: bool,
) -> Result<()> {
    let dir = source_dir.unwrap_or_else(|| config.sources.dir.clone());
    let sources = scan_sources(
        &dir,
        &config.sources.include_globs,
        &config.sources.exclude_globs,
    )?;

    if dry_run {
        let lib = load_manifest(&config.library.root)
            .into_library()
            .unwrap_or_default();
        let mut would_ingest = 0usize;
        let mut would_skip = 0usize;
        for path in &sources {
            match hash_file(path) {
                Ok(id) if lib.find(&id).map(|r| r.status) == Some(BookStatus::Ready) => {
                    would_skip += 1
                }
                _ => would_ingest += 1,
            }
        }
        println!("ingest {} (dry-run)", dir.display());
        println!("  sources found: {}", sources.len());
        println!("  would ingest:  {}", would_ingest);
        println!("  would skip:    {}", would_skip);
        return Ok(());
    }

    let extractor = TextExtractor::new(config.chunking.max_tokens);
    let cancel = AtomicBool::new(false);
    let report = ingest_sources(&config.library.root, &sources, &extractor, &cancel)?;

    println!("ingest {}", dir.display());
    println!("  ingested: {}", report.ingested.len());
    for book in &report.ingested {
        println!(
            "    {} ({} chunks, {} ms)",
            book.filename, book.chunk_count, book.ingest_ms
        );
    }
    println!("  skipped:  {}", report.skipped.len());
    println!("  failed:   {}", report.failed.len());
    for book in &report.failed {
        println!("    {}: {}", book.filename, book.error);
    }
    if !report.ingested.is_empty() {
        println!("  avg ingest: {} ms", report.avg_ingest_ms);
    }
    println!("  elapsed: {} ms", report.elapsed_ms);

    if report.rebuild_needed && !skip_index {
        let stats = index::build_index(&config.library.root)?;
        println!(
            "  index rebuilt: {} chunks ({} embedded)",
            stats.chunks_indexed, stats.embedded
        );
    } else if report.rebuild_needed {
        println!("  index rebuild needed (skipped)");
    }
    println!("ok");
    Ok(())
}
