//! Crash-recoverable library repair.
//!
//! Rebuilds the manifest purely from on-disk truth: every book folder with a
//! non-empty chunk file gets its metadata reconstructed or patched, stale
//! error states are cleared, folders with metadata but no chunks are marked
//! `error`, orphaned temporary files are pruned, and family supersession is
//! re-inferred. Running repair twice over unchanged disk state writes a
//! byte-identical manifest the second time and reports no state change.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;
use walkdir::WalkDir;

use crate::atomic::{atomic_write, TMP_SUFFIX};
use crate::config::Config;
use crate::index;
use crate::library::{
    books_dir, infer_supersession, load_manifest, save_manifest, verify_library, ManifestState,
    BOOK_META_FILE, CHUNKS_FILE,
};
use crate::models::{now_utc, BookRecord, BookStatus, ConsistencySummary, Library, LIBRARY_VERSION};

/// What repair is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Scan and report only; nothing is written.
    Verify,
    /// Scan, patch book metadata, rebuild the manifest, prune temporaries.
    Repair,
}

#[derive(Debug, Clone)]
pub struct RepairedBook {
    pub book_id: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ErrorBook {
    pub book_id: String,
    pub issues: Vec<String>,
}

/// Structured result of a repair run.
#[derive(Debug)]
pub struct RepairReport {
    pub elapsed_ms: u64,
    pub scanned_books: usize,
    pub repaired_books: Vec<RepairedBook>,
    pub error_books: Vec<ErrorBook>,
    pub pruned_tmp_count: usize,
    pub rebuilt_manifest: bool,
    /// True when any book's state actually changed; gates index rebuild.
    pub repairs_changed_state: bool,
    pub consistency: ConsistencySummary,
}

/// Delete leftover temporary write artifacts under `root`.
pub fn prune_tmp_files(root: &Path) -> Result<usize> {
    let mut count = 0usize;
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.ends_with(TMP_SUFFIX) && std::fs::remove_file(entry.path()).is_ok() {
            count += 1;
        }
    }
    Ok(count)
}

fn count_chunk_lines(path: &Path) -> usize {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw.lines().filter(|l| !l.trim().is_empty()).count(),
        Err(_) => 0,
    }
}

/// Scan the library at `root` and reconcile the manifest with disk truth.
pub fn repair_library(root: &Path, mode: RepairMode, prune: bool) -> Result<RepairReport> {
    let t0 = Instant::now();
    let books = books_dir(root);

    let old_lib: Option<Library> = match load_manifest(root) {
        ManifestState::Present(lib) => Some(lib),
        ManifestState::Absent | ManifestState::Corrupt => None,
    };

    if !books.exists() {
        let consistency = old_lib
            .as_ref()
            .map(|lib| {
                let v = verify_library(root, lib);
                ConsistencySummary {
                    ok: v.ok,
                    issues: v.issues,
                }
            })
            .unwrap_or_default();
        return Ok(RepairReport {
            elapsed_ms: t0.elapsed().as_millis() as u64,
            scanned_books: 0,
            repaired_books: Vec::new(),
            error_books: Vec::new(),
            pruned_tmp_count: 0,
            rebuilt_manifest: false,
            repairs_changed_state: false,
            consistency,
        });
    }

    let old_by_id: HashMap<String, BookRecord> = old_lib
        .as_ref()
        .map(|lib| {
            lib.books
                .iter()
                .map(|b| (b.book_id.clone(), b.clone()))
                .collect()
        })
        .unwrap_or_default();

    let mut book_dirs: Vec<std::path::PathBuf> = std::fs::read_dir(&books)
        .with_context(|| format!("failed to scan {}", books.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    book_dirs.sort();

    let now = now_utc();
    let mut new_books: Vec<BookRecord> = Vec::new();
    let mut repaired_books: Vec<RepairedBook> = Vec::new();
    let mut error_books: Vec<ErrorBook> = Vec::new();
    let mut actions_changed = false;

    for dir in &book_dirs {
        let book_id = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let chunks_path = dir.join(CHUNKS_FILE);
        let meta_path = dir.join(BOOK_META_FILE);

        let chunk_count = count_chunk_lines(&chunks_path);
        let chunks_ok = chunk_count > 0;

        let meta_exists = meta_path.exists();
        let disk_rec: Option<BookRecord> = if meta_exists {
            std::fs::read_to_string(&meta_path)
                .ok()
                .and_then(|raw| serde_json::from_str(&raw).ok())
        } else {
            None
        };
        let meta_corrupt = meta_exists && disk_rec.is_none();
        let old_rec = old_by_id.get(&book_id);

        if !chunks_ok && !meta_exists && old_rec.is_none() {
            // Nothing usable in this folder; leave it out of the manifest.
            continue;
        }

        if !chunks_ok {
            // Metadata (or a prior record) without chunks: the book is broken.
            let base = old_rec
                .cloned()
                .or(disk_rec)
                .unwrap_or_else(|| BookRecord::new_processing(&book_id, &book_id));
            let mut rec = base.clone();
            rec.book_id = book_id.clone();
            rec.content_hash = book_id.clone();
            rec.status = BookStatus::Error;
            rec.error_message = Some(format!("{} missing or empty", CHUNKS_FILE));
            rec.chunk_count = 0;
            if rec != base {
                rec.updated_at = now.clone();
                if mode == RepairMode::Repair {
                    actions_changed = true;
                }
            }
            let mut issues = vec![format!("{} missing or empty", CHUNKS_FILE)];
            if meta_corrupt {
                issues.push(format!("{} corrupt", BOOK_META_FILE));
            }
            error_books.push(ErrorBook {
                book_id: book_id.clone(),
                issues,
            });
            new_books.push(rec);
            continue;
        }

        match disk_rec {
            None => {
                // Valid chunks but missing/corrupt metadata: reconstruct it,
                // preserving whatever the old manifest still knows.
                let mut rec = old_rec
                    .cloned()
                    .unwrap_or_else(|| BookRecord::new_processing(&book_id, &book_id));
                rec.book_id = book_id.clone();
                rec.content_hash = book_id.clone();
                rec.status = BookStatus::Ready;
                rec.error_message = None;
                rec.chunk_count = chunk_count;
                rec.updated_at = now.clone();
                if rec.title.is_none() {
                    rec.title = Some(
                        Path::new(&rec.filename)
                            .file_stem()
                            .and_then(|s| s.to_str())
                            .unwrap_or(&rec.filename)
                            .to_string(),
                    );
                }

                let mut actions = vec![format!("reconstructed {}", BOOK_META_FILE)];
                if meta_corrupt {
                    actions.push(format!("replaced corrupt {}", BOOK_META_FILE));
                }
                if mode == RepairMode::Repair {
                    let mut body = serde_json::to_string_pretty(&rec)?;
                    body.push('\n');
                    atomic_write(&meta_path, body.as_bytes())?;
                    actions_changed = true;
                }
                repaired_books.push(RepairedBook {
                    book_id: book_id.clone(),
                    actions,
                });
                new_books.push(rec);
            }
            Some(base) => {
                // Metadata present: patch it back to a healthy ready state.
                let mut rec = base.clone();
                rec.book_id = book_id.clone();
                rec.content_hash = book_id.clone();
                let mut actions = Vec::new();
                if rec.chunk_count != chunk_count {
                    rec.chunk_count = chunk_count;
                    actions.push("updated chunk_count".to_string());
                }
                if rec.status != BookStatus::Ready {
                    rec.status = BookStatus::Ready;
                    rec.error_message = None;
                    actions.push("cleared error status".to_string());
                } else if rec.error_message.take().is_some() {
                    actions.push("cleared stale error message".to_string());
                }
                if rec != base {
                    rec.updated_at = now.clone();
                    if mode == RepairMode::Repair {
                        let mut body = serde_json::to_string_pretty(&rec)?;
                        body.push('\n');
                        atomic_write(&meta_path, body.as_bytes())?;
                        actions_changed = true;
                    }
                    repaired_books.push(RepairedBook {
                        book_id: book_id.clone(),
                        actions,
                    });
                }
                new_books.push(rec);
            }
        }
    }

    // Keep the old manifest's insertion order for known books so a repair
    // over an untouched library does not reorder records; newly discovered
    // folders follow in scan order.
    if let Some(old) = &old_lib {
        let mut ordered: Vec<BookRecord> = Vec::with_capacity(new_books.len());
        for known in &old.books {
            if let Some(pos) = new_books.iter().position(|r| r.book_id == known.book_id) {
                ordered.push(new_books.remove(pos));
            }
        }
        ordered.append(&mut new_books);
        new_books = ordered;
    }

    infer_supersession(&mut new_books);

    if mode == RepairMode::Verify {
        let candidate = Library {
            version: LIBRARY_VERSION.to_string(),
            created_at: now.clone(),
            updated_at: now,
            avg_ingest_ms: None,
            books: new_books,
            consistency: None,
            extra: serde_json::Map::new(),
        };
        let v = verify_library(root, &candidate);
        return Ok(RepairReport {
            elapsed_ms: t0.elapsed().as_millis() as u64,
            scanned_books: book_dirs.len(),
            repaired_books,
            error_books,
            pruned_tmp_count: 0,
            rebuilt_manifest: false,
            repairs_changed_state: false,
            consistency: ConsistencySummary {
                ok: v.ok,
                issues: v.issues,
            },
        });
    }

    let pruned_tmp_count = if prune { prune_tmp_files(root)? } else { 0 };

    let manifest_matches_disk = old_lib
        .as_ref()
        .map(|old| old.books == new_books)
        .unwrap_or(false);
    let repairs_changed_state = actions_changed || pruned_tmp_count > 0 || !manifest_matches_disk;

    let library = match &old_lib {
        // No churn: rewrite the manifest byte-for-byte identical.
        Some(old) if !repairs_changed_state => old.clone(),
        _ => {
            let mut lib = Library {
                version: LIBRARY_VERSION.to_string(),
                created_at: old_lib
                    .as_ref()
                    .map(|o| o.created_at.clone())
                    .unwrap_or_else(|| now.clone()),
                updated_at: now,
                avg_ingest_ms: old_lib.as_ref().and_then(|o| o.avg_ingest_ms),
                books: new_books,
                consistency: None,
                extra: old_lib
                    .as_ref()
                    .map(|o| o.extra.clone())
                    .unwrap_or_default(),
            };
            let v = verify_library(root, &lib);
            lib.consistency = Some(ConsistencySummary {
                ok: v.ok,
                issues: v.issues,
            });
            lib
        }
    };

    save_manifest(root, &library)?;

    let v = verify_library(root, &library);
    Ok(RepairReport {
        elapsed_ms: t0.elapsed().as_millis() as u64,
        scanned_books: book_dirs.len(),
        repaired_books,
        error_books,
        pruned_tmp_count,
        rebuilt_manifest: true,
        repairs_changed_state,
        consistency: ConsistencySummary {
            ok: v.ok,
            issues: v.issues,
        },
    })
}

/// CLI entry point: run repair in the chosen mode and print the report.
pub fn run_repair(config: &Config, mode: RepairMode, prune: bool, skip_index: bool) -> Result<()> {
    let report = repair_library(&config.library.root, mode, prune)?;

    let label = match mode {
        RepairMode::Verify => "verify",
        RepairMode::Repair => "repair",
    };
    println!("repair {} ({})", config.library.root.display(), label);
    println!("  scanned books: {}", report.scanned_books);
    for book in &report.repaired_books {
        println!("    {}: {}", book.book_id, book.actions.join(", "));
    }
    for book in &report.error_books {
        println!("    {}: {}", book.book_id, book.issues.join(", "));
    }
    println!("  pruned tmp files: {}", report.pruned_tmp_count);
    println!("  manifest rebuilt: {}", report.rebuilt_manifest);
    println!("  state changed: {}", report.repairs_changed_state);
    if !report.consistency.ok {
        println!("  consistency issues:");
        for issue in &report.consistency.issues {
            println!("    {}", issue);
        }
    }
    println!("  elapsed: {} ms", report.elapsed_ms);

    if report.repairs_changed_state && mode == RepairMode::Repair && !skip_index {
        let stats = index::build_index(&config.library.root)?;
        println!(
            "  index rebuilt: {} chunks ({} embedded)",
            stats.chunks_indexed, stats.embedded
        );
    }
    println!("ok");
    Ok(())
}
