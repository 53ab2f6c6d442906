//! Chunk extraction boundary.
//!
//! Ingest treats extraction as an opaque collaborator behind
//! [`ChunkExtractor`]: given a source file it must return a finite sequence
//! of chunks or fail with a typed error — never silently truncate. The
//! shipped [`TextExtractor`] handles plain text and markdown; richer
//! pipelines (PDF, OOXML) plug in behind the same trait.

use std::path::Path;
use thiserror::Error;

use crate::models::Chunk;

/// Typed extraction failure. Captured into the book record as an error
/// message; never aborts a batch.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to read source: {0}")]
    Read(String),
    #[error("unsupported source type: {0}")]
    Unsupported(String),
    #[error("extraction produced no chunks")]
    NoChunks,
}

/// The upstream collaborator contract: one source file in, chunks out.
///
/// Implementations fill `text`, structural metadata, and `chunk_index`;
/// ingest assigns `book_id` afterwards.
pub trait ChunkExtractor {
    fn extract(&self, path: &Path, book_name: &str) -> Result<Vec<Chunk>, ExtractError>;
}

/// Approximate chars-per-token ratio for the size budget.
const CHARS_PER_TOKEN: usize = 4;

/// Paragraph-boundary chunker for plain text and markdown.
///
/// Splits on blank lines, packs paragraphs up to `max_tokens`, and tracks
/// `#`/`##` headings as chapter/section structure so the retriever's
/// diversity filter has meaningful keys.
pub struct TextExtractor {
    pub max_tokens: usize,
}

impl TextExtractor {
    pub fn new(max_tokens: usize) -> Self {
        TextExtractor { max_tokens }
    }
}

const TEXT_EXTENSIONS: [&str; 3] = ["md", "markdown", "txt"];

impl ChunkExtractor for TextExtractor {
    fn extract(&self, path: &Path, book_name: &str) -> Result<Vec<Chunk>, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ExtractError::Unsupported(if ext.is_empty() {
                "(no extension)".to_string()
            } else {
                ext
            }));
        }

        let body = std::fs::read_to_string(path).map_err(|e| ExtractError::Read(e.to_string()))?;

        let chunks = chunk_document(book_name, &body, self.max_tokens);
        if chunks.is_empty() {
            return Err(ExtractError::NoChunks);
        }
        Ok(chunks)
    }
}

struct Structure {
    chapter: u32,
    section: u32,
    section_title: String,
}

impl Structure {
    fn chapter_label(&self) -> String {
        if self.chapter == 0 {
            "unknown".to_string()
        } else {
            self.chapter.to_string()
        }
    }

    fn section_label(&self) -> String {
        if self.chapter == 0 && self.section == 0 {
            String::new()
        } else {
            format!("{}.{}", self.chapter, self.section)
        }
    }
}

/// Split `body` into structurally tagged chunks on paragraph boundaries.
pub fn chunk_document(book_name: &str, body: &str, max_tokens: usize) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut buf = String::new();
    let mut structure = Structure {
        chapter: 0,
        section: 0,
        section_title: String::new(),
    };
    // The structure a buffered chunk was opened under; flushed chunks keep it
    // even if a heading arrives before the flush.
    let mut buf_structure = (
        structure.chapter_label(),
        structure.section_label(),
        structure.section_title.clone(),
    );

    let flush = |chunks: &mut Vec<Chunk>,
                 buf: &mut String,
                 tag: &(String, String, String),
                 book_name: &str| {
        if buf.is_empty() {
            return;
        }
        let index = chunks.len();
        chunks.push(make_chunk(book_name, index, buf, tag));
        buf.clear();
    };

    for paragraph in body.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(title) = heading_title(trimmed, "# ") {
            flush(&mut chunks, &mut buf, &buf_structure, book_name);
            structure.chapter += 1;
            structure.section = 0;
            structure.section_title = title;
            buf_structure = (
                structure.chapter_label(),
                structure.section_label(),
                structure.section_title.clone(),
            );
            continue;
        }
        if let Some(title) = heading_title(trimmed, "## ") {
            flush(&mut chunks, &mut buf, &buf_structure, book_name);
            structure.section += 1;
            structure.section_title = title;
            buf_structure = (
                structure.chapter_label(),
                structure.section_label(),
                structure.section_title.clone(),
            );
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            flush(&mut chunks, &mut buf, &buf_structure, book_name);
        }

        if trimmed.len() > max_chars {
            flush(&mut chunks, &mut buf, &buf_structure, book_name);
            // Hard split oversized paragraphs at word boundaries.
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, max_chars.min(remaining.len()));
                let actual = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual].trim();
                if !piece.is_empty() {
                    let index = chunks.len();
                    chunks.push(make_chunk(book_name, index, piece, &buf_structure));
                }
                remaining = &remaining[actual..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    flush(&mut chunks, &mut buf, &buf_structure, book_name);
    chunks
}

fn heading_title(paragraph: &str, prefix: &str) -> Option<String> {
    let first_line = paragraph.lines().next().unwrap_or("");
    first_line
        .strip_prefix(prefix)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn floor_char_boundary(s: &str, mut at: usize) -> usize {
    while at > 0 && !s.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn make_chunk(book_name: &str, index: usize, text: &str, tag: &(String, String, String)) -> Chunk {
    Chunk {
        text: text.to_string(),
        book_id: String::new(),
        book_name: book_name.to_string(),
        chapter: tag.0.clone(),
        section: tag.1.clone(),
        section_title: tag.2.clone(),
        page_start: 0,
        page_end: 0,
        chunk_index: index,
        embedding: None,
        extra: serde_json::Map::new(),
    }
}
