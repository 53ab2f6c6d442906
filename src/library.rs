//! Manifest persistence, consistency verification, and family supersession.
//!
//! The manifest file is the single source of truth for the collection. It is
//! only ever written through [`crate::atomic::atomic_write`], so a reader can
//! never observe a torn manifest: the file is either absent, a previous valid
//! version, or the new valid version.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::atomic::atomic_write;
use crate::models::{BookRecord, BookStatus, Library};

/// Manifest file name under the library root.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Per-book chunk file name.
pub const CHUNKS_FILE: &str = "chunks.jsonl";
/// Per-book metadata file name.
pub const BOOK_META_FILE: &str = "book.json";
/// Per-book copy of the original source.
pub const SOURCE_FILE: &str = "source";

/// Books directory under the library root.
pub fn books_dir(root: &Path) -> PathBuf {
    root.join("books")
}

/// A single book's folder.
pub fn book_dir(root: &Path, book_id: &str) -> PathBuf {
    books_dir(root).join(book_id)
}

fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

/// Outcome of loading the manifest.
///
/// `Absent` and `Corrupt` are distinct so callers can log corruption, but both
/// recover the same way: run repair, which rebuilds the manifest from disk.
#[derive(Debug)]
pub enum ManifestState {
    Present(Library),
    Absent,
    Corrupt,
}

impl ManifestState {
    /// The loaded library, if any. Corrupt input is treated as absent rather
    /// than raised; this is what keeps the query path self-healing.
    pub fn into_library(self) -> Option<Library> {
        match self {
            ManifestState::Present(lib) => Some(lib),
            ManifestState::Absent | ManifestState::Corrupt => None,
        }
    }
}

/// Load the manifest. Never panics on corrupt input.
pub fn load_manifest(root: &Path) -> ManifestState {
    let path = manifest_path(root);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ManifestState::Absent,
        Err(_) => return ManifestState::Corrupt,
    };
    match serde_json::from_str::<Library>(&raw) {
        Ok(lib) => ManifestState::Present(lib),
        Err(_) => ManifestState::Corrupt,
    }
}

/// Persist the manifest atomically.
pub fn save_manifest(root: &Path, library: &Library) -> Result<()> {
    let mut body =
        serde_json::to_string_pretty(library).context("failed to serialize manifest")?;
    body.push('\n');
    atomic_write(&manifest_path(root), body.as_bytes())
}

/// Grouping key relating different content hashes of "the same" logical
/// source across re-uploads: case-folded, whitespace-collapsed, final
/// extension stripped. Carries no uniqueness guarantee.
pub fn family_key(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    stem.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Infer version-supersession links across `ready` records sharing a family
/// key. The most recently updated record per family becomes the active
/// version; every sibling points `superseded_by` at it, and it lists the
/// siblings in `supersedes`. Links are added, never removed, so the function
/// is idempotent and preserves prior history.
///
/// Called from both ingest and repair so the two paths cannot drift.
/// Returns true if any link was added.
pub fn infer_supersession(records: &mut [BookRecord]) -> bool {
    let mut families: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, rec) in records.iter().enumerate() {
        if rec.status == BookStatus::Ready {
            families.entry(family_key(&rec.filename)).or_default().push(i);
        }
    }

    let mut changed = false;
    for indices in families.values() {
        if indices.len() < 2 {
            continue;
        }
        // Latest by (updated_at, book_id); timestamps sort lexicographically.
        let Some(&latest) = indices
            .iter()
            .max_by_key(|&&i| (records[i].updated_at.clone(), records[i].book_id.clone()))
        else {
            continue;
        };
        let latest_id = records[latest].book_id.clone();

        let mut sibling_ids: Vec<String> = indices
            .iter()
            .filter(|&&i| i != latest)
            .map(|&i| records[i].book_id.clone())
            .collect();
        sibling_ids.sort();

        for sid in &sibling_ids {
            if !records[latest].supersedes.contains(sid) {
                records[latest].supersedes.push(sid.clone());
                changed = true;
            }
        }
        records[latest].supersedes.sort();

        for &i in indices {
            if i == latest {
                continue;
            }
            if !records[i].superseded_by.contains(&latest_id) {
                records[i].superseded_by.push(latest_id.clone());
                changed = true;
            }
        }
    }
    changed
}

/// Result of a consistency scan.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyOutcome {
    pub ok: bool,
    pub issues: Vec<String>,
    pub valid_book_ids: Vec<String>,
}

/// Scan on-disk book folders against the manifest.
///
/// For every `ready` record the book folder must exist, its chunk file must
/// exist and be non-empty, and its metadata file must exist. Pure and
/// side-effect-free; records in other states are skipped.
pub fn verify_library(root: &Path, library: &Library) -> VerifyOutcome {
    let mut issues = Vec::new();
    let mut valid_book_ids = Vec::new();

    for rec in library.ready_books() {
        let dir = book_dir(root, &rec.book_id);
        if !dir.exists() {
            issues.push(format!("Book {}: folder missing", rec.book_id));
            continue;
        }
        let chunks = dir.join(CHUNKS_FILE);
        if !chunks.exists() {
            issues.push(format!("Book {}: {} missing", rec.book_id, CHUNKS_FILE));
            continue;
        }
        if chunks.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
            issues.push(format!("Book {}: {} empty", rec.book_id, CHUNKS_FILE));
            continue;
        }
        if !dir.join(BOOK_META_FILE).exists() {
            issues.push(format!("Book {}: {} missing", rec.book_id, BOOK_META_FILE));
            continue;
        }
        valid_book_ids.push(rec.book_id.clone());
    }

    VerifyOutcome {
        ok: issues.is_empty(),
        issues,
        valid_book_ids,
    }
}

/// Cached wrapper around [`verify_library`].
///
/// Keyed on `(library root, manifest mtime)`, so any manifest write
/// invalidates implicitly via the new mtime. Within the TTL window the prior
/// result is served unchanged without touching the filesystem. No process
/// globals: pass the cache instance through the call chain.
pub struct VerifyCache {
    ttl: Duration,
    entries: HashMap<(PathBuf, SystemTime), (VerifyOutcome, Instant)>,
    scans: u64,
}

impl VerifyCache {
    pub fn new(ttl: Duration) -> Self {
        VerifyCache {
            ttl,
            entries: HashMap::new(),
            scans: 0,
        }
    }

    /// Verify, serving a cached result when the key matches and is fresh.
    pub fn verify(&mut self, root: &Path, library: &Library) -> VerifyOutcome {
        let mtime = match std::fs::metadata(manifest_path(root)).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            // No manifest on disk: nothing stable to key on.
            Err(_) => return self.scan(root, library),
        };
        let key = (root.to_path_buf(), mtime);
        if let Some((outcome, at)) = self.entries.get(&key) {
            if at.elapsed() < self.ttl {
                return outcome.clone();
            }
        }
        let outcome = self.scan(root, library);
        // A new mtime makes older keys for this root unreachable; drop them
        // so a long-lived cache does not grow without bound.
        self.entries.retain(|(r, _), _| r != root);
        self.entries.insert(key, (outcome.clone(), Instant::now()));
        outcome
    }

    /// Drop cached results for `root`, or everything when `None`.
    pub fn invalidate(&mut self, root: Option<&Path>) {
        match root {
            Some(root) => self.entries.retain(|(r, _), _| r != root),
            None => self.entries.clear(),
        }
    }

    /// Number of real filesystem scans performed. Used by tests to observe
    /// cache hits.
    pub fn scan_count(&self) -> u64 {
        self.scans
    }

    /// Number of cached entries currently held.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn scan(&mut self, root: &Path, library: &Library) -> VerifyOutcome {
        self.scans += 1;
        verify_library(root, library)
    }
}
