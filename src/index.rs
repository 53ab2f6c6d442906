//! Index build and artifact loading.
//!
//! Reads every ready book's chunk file in manifest order, tokenizes the
//! chunk text, and writes four artifacts under `index/`: the sparse scorer,
//! the dense index with its parallel id list, the corpus id list, and a
//! metadata sidecar. Artifacts are written into a staging directory first
//! and swapped in whole, so readers never observe a half-built index.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

use crate::config::Config;
use crate::dense::DenseIndex;
use crate::library::{book_dir, load_manifest, ManifestState, CHUNKS_FILE};
use crate::models::Chunk;
use crate::sparse::{Bm25Index, SparseArtifact, SparseBackend};
use crate::tokenize::tokenize;

pub const INDEX_DIR: &str = "index";
pub const SPARSE_FILE: &str = "sparse.idx";
pub const DENSE_FILE: &str = "dense.idx";
pub const CHUNK_IDS_FILE: &str = "chunk_ids.json";
pub const META_FILE: &str = "meta.jsonl";

const STAGING_DIR: &str = "index.staging";
const OLD_DIR: &str = "index.old";

/// Failure to load index artifacts at query time.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No index has been built yet; callers surface this distinctly so the
    /// user is told to run the build instead of seeing a generic failure.
    #[error("no index found at {0} (run `shelf build-index` first)")]
    Unavailable(PathBuf),
    #[error("failed to read index artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse index artifact {0}: {1}")]
    Parse(String, String),
}

/// Per-chunk metadata carried into search results.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMeta {
    pub chunk_id: String,
    pub book_id: String,
    pub book_name: String,
    pub chapter: String,
    pub section: String,
    pub section_title: String,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

impl ChunkMeta {
    fn from_chunk(chunk: &Chunk) -> Self {
        ChunkMeta {
            chunk_id: chunk.chunk_id(),
            book_id: chunk.book_id.clone(),
            book_name: chunk.book_name.clone(),
            chapter: chunk.chapter.clone(),
            section: chunk.section.clone(),
            section_title: chunk.section_title.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            text: chunk.text.clone(),
        }
    }
}

/// Dense artifact: the index plus the parallel chunk-id list for the
/// embedded subset. `index` is absent when no chunk carried an embedding.
#[derive(Debug, Serialize, Deserialize)]
pub struct DenseArtifact {
    pub ids: Vec<String>,
    pub index: Option<DenseIndex>,
}

#[derive(Debug)]
pub struct IndexBuildStats {
    pub elapsed_ms: u64,
    pub books_indexed: usize,
    /// Ready books whose chunk file could not be read.
    pub skipped_books: usize,
    pub chunks_indexed: usize,
    pub embedded: usize,
    pub skipped_malformed: usize,
    /// Embedded chunks dropped because their dimension disagreed with the
    /// first-seen embedding dimension.
    pub skipped_dim_mismatch: usize,
    pub embedding_dim: Option<usize>,
}

/// Build all index artifacts for the library at `root`.
pub fn build_index(root: &Path) -> Result<IndexBuildStats> {
    let t0 = Instant::now();
    let library = match load_manifest(root) {
        ManifestState::Present(lib) => lib,
        ManifestState::Absent => anyhow::bail!("no library manifest at {}", root.display()),
        ManifestState::Corrupt => {
            anyhow::bail!(
                "library manifest at {} is corrupt (run `shelf repair` first)",
                root.display()
            )
        }
    };

    let mut chunks: Vec<Chunk> = Vec::new();
    let mut skipped_malformed = 0usize;
    let mut books_indexed = 0usize;
    let mut skipped_books = 0usize;

    for record in library.ready_books() {
        let path = book_dir(root, &record.book_id).join(CHUNKS_FILE);
        // A book whose chunk file cannot be read is skipped and counted; one
        // broken folder never aborts the rebuild.
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => {
                skipped_books += 1;
                continue;
            }
        };
        books_indexed += 1;
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Chunk>(line) {
                Ok(chunk) => chunks.push(chunk),
                Err(_) => skipped_malformed += 1,
            }
        }
    }

    // Sparse side covers every parseable chunk.
    let corpus: Vec<Vec<String>> = chunks.iter().map(|c| tokenize(&c.text)).collect();
    let sparse = SparseArtifact::Native {
        index: Bm25Index::build(&corpus),
    };
    let chunk_ids: Vec<String> = chunks.iter().map(|c| c.chunk_id()).collect();
    let metas: Vec<ChunkMeta> = chunks.iter().map(ChunkMeta::from_chunk).collect();

    // Dense side covers only the embedded subset; the first embedding fixes
    // the dimension and mismatched vectors are skipped.
    let mut dense: Option<DenseIndex> = None;
    let mut dense_ids: Vec<String> = Vec::new();
    let mut skipped_dim_mismatch = 0usize;
    for chunk in &chunks {
        let Some(embedding) = &chunk.embedding else {
            continue;
        };
        let index = dense.get_or_insert_with(|| DenseIndex::new(embedding.len()));
        if index.push(embedding.clone()).is_ok() {
            dense_ids.push(chunk.chunk_id());
        } else {
            skipped_dim_mismatch += 1;
        }
    }
    let embedded = dense_ids.len();
    let embedding_dim = dense.as_ref().map(|d| d.dim);

    // Stage everything, then swap the whole directory in.
    let staging = root.join(STAGING_DIR);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    std::fs::write(staging.join(SPARSE_FILE), serde_json::to_vec(&sparse)?)?;
    std::fs::write(
        staging.join(DENSE_FILE),
        serde_json::to_vec(&DenseArtifact {
            ids: dense_ids,
            index: dense,
        })?,
    )?;
    std::fs::write(
        staging.join(CHUNK_IDS_FILE),
        serde_json::to_vec(&chunk_ids)?,
    )?;
    let mut meta_body = String::new();
    for meta in &metas {
        meta_body.push_str(&serde_json::to_string(meta)?);
        meta_body.push('\n');
    }
    std::fs::write(staging.join(META_FILE), meta_body)?;

    let live = root.join(INDEX_DIR);
    let old = root.join(OLD_DIR);
    if old.exists() {
        std::fs::remove_dir_all(&old)?;
    }
    if live.exists() {
        std::fs::rename(&live, &old)?;
    }
    std::fs::rename(&staging, &live)
        .with_context(|| format!("failed to activate index at {}", live.display()))?;
    if old.exists() {
        std::fs::remove_dir_all(&old)?;
    }

    Ok(IndexBuildStats {
        elapsed_ms: t0.elapsed().as_millis() as u64,
        books_indexed,
        skipped_books,
        chunks_indexed: chunks.len(),
        embedded,
        skipped_malformed,
        skipped_dim_mismatch,
        embedding_dim,
    })
}

/// The loaded artifact set a retriever works over.
pub struct IndexArtifacts {
    pub sparse: Box<dyn SparseBackend>,
    pub dense: Option<DenseIndex>,
    pub dense_ids: Vec<String>,
    pub chunk_ids: Vec<String>,
    pub meta: Vec<ChunkMeta>,
}

fn parse_err(file: &str, err: impl std::fmt::Display) -> IndexError {
    IndexError::Parse(file.to_string(), err.to_string())
}

/// Load the live index artifacts at `root`.
pub fn load_index(root: &Path) -> Result<IndexArtifacts, IndexError> {
    let dir = root.join(INDEX_DIR);
    if !dir.exists() {
        return Err(IndexError::Unavailable(dir));
    }

    let raw = std::fs::read_to_string(dir.join(SPARSE_FILE))?;
    let sparse: SparseArtifact =
        serde_json::from_str(&raw).map_err(|e| parse_err(SPARSE_FILE, e))?;

    let raw = std::fs::read_to_string(dir.join(DENSE_FILE))?;
    let dense_artifact: DenseArtifact =
        serde_json::from_str(&raw).map_err(|e| parse_err(DENSE_FILE, e))?;

    let raw = std::fs::read_to_string(dir.join(CHUNK_IDS_FILE))?;
    let chunk_ids: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| parse_err(CHUNK_IDS_FILE, e))?;

    let raw = std::fs::read_to_string(dir.join(META_FILE))?;
    let mut meta = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        meta.push(serde_json::from_str::<ChunkMeta>(line).map_err(|e| parse_err(META_FILE, e))?);
    }

    Ok(IndexArtifacts {
        sparse: sparse.into_backend(),
        dense: dense_artifact.index,
        dense_ids: dense_artifact.ids,
        chunk_ids,
        meta,
    })
}

/// CLI entry point: build the index and print a summary.
pub fn run_build_index(config: &Config) -> Result<()> {
    let stats = build_index(&config.library.root)?;
    println!("build-index {}", config.library.root.display());
    println!("  books indexed: {}", stats.books_indexed);
    println!("  chunks indexed: {}", stats.chunks_indexed);
    match stats.embedding_dim {
        Some(dim) => println!("  embedded chunks: {} (dim {})", stats.embedded, dim),
        None => println!("  embedded chunks: 0"),
    }
    if stats.skipped_books > 0 {
        println!("  books skipped (unreadable chunks): {}", stats.skipped_books);
    }
    if stats.skipped_malformed > 0 {
        println!("  malformed chunk lines skipped: {}", stats.skipped_malformed);
    }
    if stats.skipped_dim_mismatch > 0 {
        println!(
            "  embeddings skipped (dimension mismatch): {}",
            stats.skipped_dim_mismatch
        );
    }
    println!("  elapsed: {} ms", stats.elapsed_ms);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::save_manifest;
    use crate::models::{BookRecord, BookStatus, Library};
    use std::fs;
    use tempfile::TempDir;

    fn seed_book(root: &Path, book_id: &str, lines: &[&str]) -> BookRecord {
        let dir = book_dir(root, book_id);
        fs::create_dir_all(&dir).unwrap();
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        fs::write(dir.join(CHUNKS_FILE), body).unwrap();
        let mut rec = BookRecord::new_processing(book_id, &format!("{}.md", book_id));
        rec.status = BookStatus::Ready;
        rec.chunk_count = lines.len();
        rec
    }

    fn chunk_line(book_id: &str, index: usize, text: &str, embedding: Option<Vec<f32>>) -> String {
        let mut chunk = Chunk {
            text: text.to_string(),
            book_id: book_id.to_string(),
            book_name: book_id.to_string(),
            chapter: "1".to_string(),
            section: "1.1".to_string(),
            section_title: "Intro".to_string(),
            page_start: 0,
            page_end: 0,
            chunk_index: index,
            embedding: None,
            extra: serde_json::Map::new(),
        };
        chunk.embedding = embedding;
        serde_json::to_string(&chunk).unwrap()
    }

    fn seed_library(root: &Path, books: Vec<BookRecord>) {
        let mut lib = Library::new();
        lib.books = books;
        save_manifest(root, &lib).unwrap();
    }

    #[test]
    fn test_build_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let lines = vec![
            chunk_line("abc", 0, "the quick brown fox", Some(vec![1.0, 0.0])),
            chunk_line("abc", 1, "plain prose paragraph", None),
        ];
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let rec = seed_book(tmp.path(), "abc", &refs);
        seed_library(tmp.path(), vec![rec]);

        let stats = build_index(tmp.path()).unwrap();
        assert_eq!(stats.chunks_indexed, 2);
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.embedding_dim, Some(2));

        let artifacts = load_index(tmp.path()).unwrap();
        assert_eq!(artifacts.chunk_ids, vec!["abc:0", "abc:1"]);
        assert_eq!(artifacts.dense_ids, vec!["abc:0"]);
        assert_eq!(artifacts.sparse.len(), 2);
        assert_eq!(artifacts.meta[0].section_title, "Intro");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let tmp = TempDir::new().unwrap();
        let good = chunk_line("abc", 0, "valid text", None);
        let rec = seed_book(tmp.path(), "abc", &[good.as_str(), "{not json"]);
        seed_library(tmp.path(), vec![rec]);

        let stats = build_index(tmp.path()).unwrap();
        assert_eq!(stats.chunks_indexed, 1);
        assert_eq!(stats.skipped_malformed, 1);
    }

    #[test]
    fn test_non_ready_books_excluded() {
        let tmp = TempDir::new().unwrap();
        let good = chunk_line("abc", 0, "indexed text", None);
        let rec = seed_book(tmp.path(), "abc", &[good.as_str()]);
        let bad = chunk_line("err", 0, "never indexed", None);
        let mut err_rec = seed_book(tmp.path(), "err", &[bad.as_str()]);
        err_rec.status = BookStatus::Error;
        seed_library(tmp.path(), vec![rec, err_rec]);

        let stats = build_index(tmp.path()).unwrap();
        assert_eq!(stats.books_indexed, 1);
        assert_eq!(stats.chunks_indexed, 1);
    }

    #[test]
    fn test_rebuild_replaces_old_index() {
        let tmp = TempDir::new().unwrap();
        let one = chunk_line("abc", 0, "first corpus", None);
        let rec = seed_book(tmp.path(), "abc", &[one.as_str()]);
        seed_library(tmp.path(), vec![rec.clone()]);
        build_index(tmp.path()).unwrap();

        let two = vec![
            chunk_line("abc", 0, "second corpus", None),
            chunk_line("abc", 1, "grew a chunk", None),
        ];
        let refs: Vec<&str> = two.iter().map(|s| s.as_str()).collect();
        let rec = seed_book(tmp.path(), "abc", &refs);
        seed_library(tmp.path(), vec![rec]);
        build_index(tmp.path()).unwrap();

        let artifacts = load_index(tmp.path()).unwrap();
        assert_eq!(artifacts.chunk_ids.len(), 2);
        assert!(!tmp.path().join(STAGING_DIR).exists());
        assert!(!tmp.path().join(OLD_DIR).exists());
    }

    #[test]
    fn test_load_missing_index_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let err = load_index(tmp.path()).err().unwrap();
        assert!(matches!(err, IndexError::Unavailable(_)));
    }

    #[test]
    fn test_unreadable_book_skipped_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let good = chunk_line("abc", 0, "healthy text", None);
        let rec = seed_book(tmp.path(), "abc", &[good.as_str()]);
        // Ready record whose folder never made it to disk.
        let mut gone = BookRecord::new_processing("gone", "gone.md");
        gone.status = BookStatus::Ready;
        gone.chunk_count = 1;
        seed_library(tmp.path(), vec![rec, gone]);

        let stats = build_index(tmp.path()).unwrap();
        assert_eq!(stats.skipped_books, 1);
        assert_eq!(stats.books_indexed, 1);
        assert_eq!(stats.chunks_indexed, 1);

        let artifacts = load_index(tmp.path()).unwrap();
        assert_eq!(artifacts.chunk_ids, vec!["abc:0"]);
    }

    #[test]
    fn test_mismatched_embedding_dim_counted() {
        let tmp = TempDir::new().unwrap();
        let lines = vec![
            chunk_line("abc", 0, "first", Some(vec![1.0, 0.0])),
            chunk_line("abc", 1, "second", Some(vec![1.0, 0.0, 0.0])),
        ];
        let refs: Vec<&str> = lines.iter().map(|s| s.as_str()).collect();
        let rec = seed_book(tmp.path(), "abc", &refs);
        seed_library(tmp.path(), vec![rec]);

        let stats = build_index(tmp.path()).unwrap();
        assert_eq!(stats.embedded, 1);
        assert_eq!(stats.skipped_dim_mismatch, 1);
        assert_eq!(stats.embedding_dim, Some(2));

        let artifacts = load_index(tmp.path()).unwrap();
        assert_eq!(artifacts.dense_ids, vec!["abc:0"]);
    }
}
