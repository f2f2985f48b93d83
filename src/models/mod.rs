use serde::{Deserialize, Serialize};

pub mod rules;

pub use rules::{ChapterRule, CompiledRule, RuleFlags, RuleSet};

/// A plaintext chapter as produced by segmentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawChapter {
    pub title: String,
    pub content: String,
}

impl RawChapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// A chapter whose title and content are both CipherBlob text.
///
/// This is the shape the upload wire message carries, so the server only ever
/// sees opaque strings here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChapter {
    pub title: String,
    #[serde(default)]
    pub content: String,
}

/// One unit of the resumable upload protocol, as planned on the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    pub chunk_index: usize,
    pub total_chunks: usize,
    /// Index of the first chapter this chunk covers.
    pub start_index: usize,
    pub chapters: Vec<EncryptedChapter>,
    pub is_last: bool,
}

/// Request body of `POST /api/books/:book_id/upload-content`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadMessage {
    pub chapters: Vec<EncryptedChapter>,
    pub chapter_count: usize,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub is_last_chunk: bool,
    /// Sent by older clients; the server does not use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
}

/// Response body for a committed chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkReceipt {
    pub success: bool,
    pub message: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub is_complete: bool,
}

/// Book aggregate. `chapter_count` and `file_size` are only authoritative once
/// the final chunk of an import has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub chapter_count: usize,
    pub file_size: u64,
    pub created_at: String,
}

/// Progress of the import currently being written for a book.
///
/// Recorded when chunk 0 commits and advanced by every later chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCursor {
    pub total_chunks: usize,
    pub chapter_count: usize,
    /// Highest committed chunk index plus one.
    pub next_chunk: usize,
}

/// Server-side chapter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChapter {
    pub id: String,
    pub book_id: String,
    pub chapter_index: usize,
    pub title: String,
    pub has_content: bool,
    /// Inline content written by old servers before block storage existed.
    pub legacy_content: Option<String>,
}

/// One ordered fragment of a chapter's CipherBlob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredContentBlock {
    pub id: String,
    pub chapter_id: String,
    pub content_index: usize,
    pub payload: String,
}

/// A reassembled chapter, as returned by the read endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub id: String,
    pub title: String,
    pub content: String,
    pub chapter_index: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChapterResponse {
    pub chapter: ChapterRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookResponse {
    pub success: bool,
    pub message: String,
    pub book_id: String,
}

/// Number of chapters each chunk carries for a given import shape.
///
/// Both the planner and the store derive chunk ranges from this, so it must not
/// change without breaking resumed imports.
pub fn chapters_per_chunk(chapter_count: usize, total_chunks: usize) -> usize {
    if total_chunks == 0 {
        return chapter_count;
    }
    chapter_count.div_ceil(total_chunks)
}

/// Chapter index range `[start, end)` covered by `chunk_index`.
pub fn chunk_range(
    chapter_count: usize,
    total_chunks: usize,
    chunk_index: usize,
) -> (usize, usize) {
    let per_chunk = chapters_per_chunk(chapter_count, total_chunks);
    let start = chunk_index.saturating_mul(per_chunk).min(chapter_count);
    let end = (start + per_chunk).min(chapter_count);
    (start, end)
}

pub fn chapter_id(book_id: &str, chapter_index: usize) -> String {
    format!("chapter_{}_{}", book_id, chapter_index)
}

pub fn content_block_id(chapter_id: &str, content_index: usize) -> String {
    format!("content_{}_{}", chapter_id, content_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_ranges_cover_every_chapter_once() {
        let ranges: Vec<_> = (0..3).map(|i| chunk_range(13, 3, i)).collect();
        assert_eq!(ranges, vec![(0, 5), (5, 10), (10, 13)]);
    }

    #[test]
    fn test_chunk_range_past_end_is_empty() {
        assert_eq!(chunk_range(9, 4, 3), (9, 9));
    }

    #[test]
    fn test_upload_message_accepts_legacy_fields() {
        let json = r#"{
            "chapters": [{"title": "t", "content": "c"}],
            "chapter_count": 1,
            "upload_id": "u1",
            "chunk_index": 0,
            "total_chunks": 1,
            "file_size": 12,
            "is_last_chunk": true
        }"#;
        let msg: UploadMessage = serde_json::from_str(json).unwrap();
        assert!(msg.is_last_chunk);
        assert_eq!(msg.upload_id.as_deref(), Some("u1"));
        assert_eq!(msg.chapters[0].content, "c");
    }
}
