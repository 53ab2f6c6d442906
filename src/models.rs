//! Core data models for the library and its contents.
//!
//! These types represent the manifest, book records, and chunks that flow
//! through the ingest and retrieval pipeline. Manifest-backed types carry a
//! flattened `extra` map so fields written by newer versions survive a
//! load/save round-trip unchanged.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Manifest schema version.
pub const LIBRARY_VERSION: &str = "0.3";

/// Current UTC time formatted the way all manifest timestamps are stored.
///
/// The fixed `%Y-%m-%dT%H:%M:%SZ` form round-trips byte-for-byte and sorts
/// lexicographically, which family supersession relies on.
pub fn now_utc() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Lifecycle state of a book record.
///
/// `Processing` moves to `Ready` or `Error`; both are terminal. A retry
/// re-enters `Processing` for the same book id only from `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Processing,
    Ready,
    Error,
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookStatus::Processing => write!(f, "processing"),
            BookStatus::Ready => write!(f, "ready"),
            BookStatus::Error => write!(f, "error"),
        }
    }
}

/// Per-book metadata and status entry.
///
/// `book_id` equals `content_hash` (SHA-256 of the raw source bytes), so
/// byte-identical content always maps to the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub book_id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub content_hash: String,
    pub added_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub chunk_count: usize,
    pub status: BookStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supersedes: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_by: Vec<String>,
    #[serde(default)]
    pub ingest_ms: u64,
    /// Unknown fields preserved across load/save cycles.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl BookRecord {
    /// Fresh record in `processing` state.
    pub fn new_processing(book_id: &str, filename: &str) -> Self {
        let now = now_utc();
        BookRecord {
            book_id: book_id.to_string(),
            filename: filename.to_string(),
            title: None,
            content_hash: book_id.to_string(),
            added_at: now.clone(),
            updated_at: now,
            chunk_count: 0,
            status: BookStatus::Processing,
            error_message: None,
            supersedes: Vec::new(),
            superseded_by: Vec::new(),
            ingest_ms: 0,
            extra: serde_json::Map::new(),
        }
    }
}

/// Result of a consistency scan, denormalized into the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySummary {
    pub ok: bool,
    #[serde(default)]
    pub issues: Vec<String>,
}

impl Default for ConsistencySummary {
    fn default() -> Self {
        ConsistencySummary {
            ok: true,
            issues: Vec::new(),
        }
    }
}

/// The library manifest: ordered book records plus collection metadata.
///
/// Owned exclusively by the manifest file and mutated only through
/// [`crate::library::save_manifest`] (which writes atomically).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub version: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_ingest_ms: Option<u64>,
    #[serde(default)]
    pub books: Vec<BookRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<ConsistencySummary>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Library {
    /// Empty library created now.
    pub fn new() -> Self {
        let now = now_utc();
        Library {
            version: LIBRARY_VERSION.to_string(),
            created_at: now.clone(),
            updated_at: now,
            avg_ingest_ms: None,
            books: Vec::new(),
            consistency: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn find(&self, book_id: &str) -> Option<&BookRecord> {
        self.books.iter().find(|b| b.book_id == book_id)
    }

    pub fn find_mut(&mut self, book_id: &str) -> Option<&mut BookRecord> {
        self.books.iter_mut().find(|b| b.book_id == book_id)
    }

    /// Replace the record with the same `book_id`, or append (insertion order
    /// is preserved for all other records).
    pub fn add_or_update(&mut self, record: BookRecord) {
        match self.find_mut(&record.book_id) {
            Some(existing) => *existing = record,
            None => self.books.push(record),
        }
        self.updated_at = now_utc();
    }

    /// Move a record (back) into `processing`. Appends a fresh record if the
    /// book id is unknown.
    pub fn mark_processing(&mut self, book_id: &str, filename: &str) {
        match self.find_mut(book_id) {
            Some(rec) => {
                rec.status = BookStatus::Processing;
                rec.error_message = None;
                rec.updated_at = now_utc();
            }
            None => self
                .books
                .push(BookRecord::new_processing(book_id, filename)),
        }
        self.updated_at = now_utc();
    }

    /// Terminal transition to `ready`.
    pub fn mark_ready(&mut self, book_id: &str, chunk_count: usize, ingest_ms: u64) {
        if let Some(rec) = self.find_mut(book_id) {
            rec.status = BookStatus::Ready;
            rec.chunk_count = chunk_count;
            rec.ingest_ms = ingest_ms;
            rec.error_message = None;
            rec.updated_at = now_utc();
        }
        self.updated_at = now_utc();
    }

    /// Terminal transition to `error`.
    pub fn mark_error(&mut self, book_id: &str, message: &str) {
        if let Some(rec) = self.find_mut(book_id) {
            rec.status = BookStatus::Error;
            rec.error_message = Some(message.to_string());
            rec.updated_at = now_utc();
        }
        self.updated_at = now_utc();
    }

    /// Records visible to search.
    pub fn ready_books(&self) -> impl Iterator<Item = &BookRecord> {
        self.books.iter().filter(|b| b.status == BookStatus::Ready)
    }
}

impl Default for Library {
    fn default() -> Self {
        Library::new()
    }
}

/// One unit of retrievable content, stored one-per-line in a book's chunk
/// file. Immutable once written.
///
/// The optional `embedding` field is filled in by an external embedding
/// pipeline; chunks without one are still indexed for lexical search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    #[serde(default)]
    pub book_id: String,
    #[serde(default)]
    pub book_name: String,
    #[serde(default = "default_chapter")]
    pub chapter: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub section_title: String,
    #[serde(default)]
    pub page_start: u32,
    #[serde(default)]
    pub page_end: u32,
    #[serde(default)]
    pub chunk_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_chapter() -> String {
    "unknown".to_string()
}

impl Chunk {
    /// Stable identifier: the owning book's content hash plus the chunk's
    /// ordinal within that book.
    pub fn chunk_id(&self) -> String {
        format!("{}:{}", self.book_id, self.chunk_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        let mut lib = Library::new();
        lib.mark_processing("abc", "intro.md");
        assert_eq!(lib.find("abc").unwrap().status, BookStatus::Processing);

        lib.mark_ready("abc", 12, 340);
        let rec = lib.find("abc").unwrap();
        assert_eq!(rec.status, BookStatus::Ready);
        assert_eq!(rec.chunk_count, 12);
        assert_eq!(rec.ingest_ms, 340);

        lib.mark_error("abc", "boom");
        let rec = lib.find("abc").unwrap();
        assert_eq!(rec.status, BookStatus::Error);
        assert_eq!(rec.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let raw = r#"{
            "version": "0.3",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
            "books": [],
            "future_field": {"nested": true}
        }"#;
        let lib: Library = serde_json::from_str(raw).unwrap();
        assert!(lib.extra.contains_key("future_field"));

        let out = serde_json::to_string(&lib).unwrap();
        let reparsed: Library = serde_json::from_str(&out).unwrap();
        assert_eq!(lib, reparsed);
    }

    #[test]
    fn test_chunk_defaults() {
        let chunk: Chunk = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert_eq!(chunk.chapter, "unknown");
        assert_eq!(chunk.chunk_index, 0);
        assert!(chunk.embedding.is_none());
    }

    #[test]
    fn test_add_or_update_preserves_order() {
        let mut lib = Library::new();
        lib.mark_processing("a", "a.md");
        lib.mark_processing("b", "b.md");
        let mut rec = lib.find("a").unwrap().clone();
        rec.chunk_count = 5;
        lib.add_or_update(rec);
        let ids: Vec<&str> = lib.books.iter().map(|b| b.book_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(lib.find("a").unwrap().chunk_count, 5);
    }
}
