//! Server-side chapter storage.
//!
//! [`ContentStore`] owns the chunked-import protocol and chapter
//! reconstruction. Persistence goes through a [`StorageBackend`], so the same
//! protocol logic runs over SQLite or process memory.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::models::{
    Book, ChapterRecord, ChunkReceipt, ImportCursor, StoredChapter, StoredContentBlock,
    UploadMessage, chapter_id, chunk_range, content_block_id,
};
use crate::utils::split_on_char_boundaries;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Default maximum size of one stored content block, in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
/// Default maximum number of statements committed in one atomic batch.
pub const DEFAULT_MAX_BATCH: usize = 20;

/// The import sequence is inconsistent; nothing from the offending chunk is
/// written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("chunk index {chunk_index} is out of range for {total_chunks} chunks")]
    ChunkOutOfRange {
        chunk_index: usize,
        total_chunks: usize,
    },

    #[error("chunk {chunk_index} received but no import was started with chunk 0")]
    NoImportInProgress { chunk_index: usize },

    #[error("chunk {got} skips ahead, next expected chunk is {expected}")]
    SkippedChunk { expected: usize, got: usize },

    #[error(
        "import shape changed mid-sequence: started as {expected_chunks} chunks / {expected_chapters} chapters, got {got_chunks} / {got_chapters}"
    )]
    ShapeMismatch {
        expected_chunks: usize,
        expected_chapters: usize,
        got_chunks: usize,
        got_chapters: usize,
    },

    #[error("chunk {chunk_index} carries {got} chapters, expected {expected}")]
    ChapterCountMismatch {
        chunk_index: usize,
        expected: usize,
        got: usize,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One write statement. A backend applies a slice of these atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Remove every chapter and content block of a book.
    DeleteBookContent { book_id: String },
    /// Remove one chapter and its content blocks. Missing rows are not an error.
    DeleteChapter { chapter_id: String },
    InsertChapter(StoredChapter),
    InsertContentBlock(StoredContentBlock),
    UpdateBookTotals {
        book_id: String,
        chapter_count: usize,
        file_size: u64,
    },
    SetImportCursor {
        book_id: String,
        cursor: ImportCursor,
    },
    DeleteBook { book_id: String },
}

/// Persistence primitives behind [`ContentStore`].
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn insert_book(&self, book: &Book) -> Result<()>;

    async fn book(&self, book_id: &str) -> Result<Option<Book>>;

    async fn import_cursor(&self, book_id: &str) -> Result<Option<ImportCursor>>;

    async fn chapter(&self, book_id: &str, chapter_index: usize) -> Result<Option<StoredChapter>>;

    /// Content blocks of a chapter, in no particular order.
    async fn content_blocks(&self, chapter_id: &str) -> Result<Vec<StoredContentBlock>>;

    /// Number of stored chapter rows for a book.
    async fn chapter_rows(&self, book_id: &str) -> Result<usize>;

    /// Apply all operations or none of them.
    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub block_size: usize,
    pub max_batch_statements: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            max_batch_statements: DEFAULT_MAX_BATCH,
        }
    }
}

impl From<&StorageConfig> for StoreConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            block_size: config.block_size,
            max_batch_statements: config.max_batch_statements,
        }
    }
}

#[derive(Clone)]
pub struct ContentStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
}

impl ContentStore {
    pub fn new(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Self {
        Self {
            backend,
            config: StoreConfig {
                block_size: config.block_size.max(16),
                max_batch_statements: config.max_batch_statements.max(1),
            },
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), StoreConfig::default())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub async fn create_book(&self, title: &str, author: &str) -> Result<Book> {
        if title.trim().is_empty() {
            return Err(StoreError::Validation("book title must not be empty".into()));
        }

        let book = Book {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            author: author.to_string(),
            chapter_count: 0,
            file_size: 0,
            created_at: Utc::now().to_rfc3339(),
        };
        self.backend.insert_book(&book).await?;
        tracing::info!(book_id = %book.id, "Created book");
        Ok(book)
    }

    pub async fn book(&self, book_id: &str) -> Result<Book> {
        self.backend
            .book(book_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("book {}", book_id)))
    }

    pub async fn delete_book(&self, book_id: &str) -> Result<()> {
        self.book(book_id).await?;
        self.backend
            .apply_batch(&[
                WriteOp::DeleteBookContent {
                    book_id: book_id.to_string(),
                },
                WriteOp::DeleteBook {
                    book_id: book_id.to_string(),
                },
            ])
            .await?;
        tracing::info!(book_id, "Deleted book");
        Ok(())
    }

    /// Commit one chunk of a chunked import.
    ///
    /// Chunk 0 wipes every stored chapter of the book first. Any later chunk
    /// only replaces the chapter range it covers, so chapters beyond the new
    /// import's range survive unless the import restarted at chunk 0.
    pub async fn commit_chunk(
        &self,
        book_id: &str,
        message: &UploadMessage,
    ) -> Result<ChunkReceipt> {
        if message.chapters.is_empty() {
            return Err(StoreError::Validation("chunk carries no chapters".into()));
        }
        if message.chapter_count == 0 {
            return Err(StoreError::Validation("chapter_count must be positive".into()));
        }
        if message.total_chunks == 0 || message.chunk_index >= message.total_chunks {
            return Err(ProtocolError::ChunkOutOfRange {
                chunk_index: message.chunk_index,
                total_chunks: message.total_chunks,
            }
            .into());
        }

        self.book(book_id).await?;
        let cursor = self.check_sequence(book_id, message).await?;

        let (start, end) =
            chunk_range(message.chapter_count, message.total_chunks, message.chunk_index);
        if message.chapters.len() != end - start {
            return Err(ProtocolError::ChapterCountMismatch {
                chunk_index: message.chunk_index,
                expected: end - start,
                got: message.chapters.len(),
            }
            .into());
        }

        let ops = self.chunk_ops(book_id, message, start, end, cursor);
        self.apply_in_batches(book_id, message.chunk_index, &ops).await?;

        let is_complete = message.chunk_index + 1 == message.total_chunks;
        tracing::info!(
            book_id,
            chunk = message.chunk_index + 1,
            total_chunks = message.total_chunks,
            chapters = %format!("{}..{}", start, end),
            "Committed upload chunk"
        );

        Ok(ChunkReceipt {
            success: true,
            message: format!(
                "chunk {}/{} uploaded",
                message.chunk_index + 1,
                message.total_chunks
            ),
            chunk_index: message.chunk_index,
            total_chunks: message.total_chunks,
            is_complete,
        })
    }

    /// Validate the chunk against the import in progress and return the
    /// cursor to store once it commits.
    async fn check_sequence(&self, book_id: &str, message: &UploadMessage) -> Result<ImportCursor> {
        if message.chunk_index == 0 {
            return Ok(ImportCursor {
                total_chunks: message.total_chunks,
                chapter_count: message.chapter_count,
                next_chunk: 1,
            });
        }

        let cursor = self
            .backend
            .import_cursor(book_id)
            .await?
            .ok_or(ProtocolError::NoImportInProgress {
                chunk_index: message.chunk_index,
            })?;

        if cursor.total_chunks != message.total_chunks
            || cursor.chapter_count != message.chapter_count
        {
            return Err(ProtocolError::ShapeMismatch {
                expected_chunks: cursor.total_chunks,
                expected_chapters: cursor.chapter_count,
                got_chunks: message.total_chunks,
                got_chapters: message.chapter_count,
            }
            .into());
        }
        if message.chunk_index > cursor.next_chunk {
            return Err(ProtocolError::SkippedChunk {
                expected: cursor.next_chunk,
                got: message.chunk_index,
            }
            .into());
        }

        Ok(ImportCursor {
            next_chunk: cursor.next_chunk.max(message.chunk_index + 1),
            ..cursor
        })
    }

    fn chunk_ops(
        &self,
        book_id: &str,
        message: &UploadMessage,
        start: usize,
        end: usize,
        cursor: ImportCursor,
    ) -> Vec<WriteOp> {
        let mut ops = Vec::new();

        if message.chunk_index == 0 {
            ops.push(WriteOp::DeleteBookContent {
                book_id: book_id.to_string(),
            });
        } else {
            ops.extend((start..end).map(|index| WriteOp::DeleteChapter {
                chapter_id: chapter_id(book_id, index),
            }));
        }

        for (offset, chapter) in message.chapters.iter().enumerate() {
            let chapter_index = start + offset;
            let id = chapter_id(book_id, chapter_index);
            let has_content = !chapter.content.is_empty();

            ops.push(WriteOp::InsertChapter(StoredChapter {
                id: id.clone(),
                book_id: book_id.to_string(),
                chapter_index,
                title: chapter.title.clone(),
                has_content,
                legacy_content: None,
            }));

            if has_content {
                let blocks = split_on_char_boundaries(&chapter.content, self.config.block_size);
                ops.extend(blocks.into_iter().enumerate().map(|(content_index, payload)| {
                    WriteOp::InsertContentBlock(StoredContentBlock {
                        id: content_block_id(&id, content_index),
                        chapter_id: id.clone(),
                        content_index,
                        payload: payload.to_string(),
                    })
                }));
            }
        }

        if message.is_last_chunk || message.chunk_index + 1 == message.total_chunks {
            ops.push(WriteOp::UpdateBookTotals {
                book_id: book_id.to_string(),
                chapter_count: message.chapter_count,
                file_size: message.file_size,
            });
        }

        ops.push(WriteOp::SetImportCursor {
            book_id: book_id.to_string(),
            cursor,
        });

        ops
    }

    async fn apply_in_batches(
        &self,
        book_id: &str,
        chunk_index: usize,
        ops: &[WriteOp],
    ) -> Result<()> {
        for (batch_no, batch) in ops.chunks(self.config.max_batch_statements).enumerate() {
            if let Err(e) = self.backend.apply_batch(batch).await {
                tracing::error!(
                    book_id,
                    chunk_index,
                    batch = batch_no,
                    backend = self.backend.name(),
                    "Batch failed, chunk not fully committed: {}",
                    e
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reassemble a chapter's title and content CipherBlobs.
    pub async fn get_chapter(&self, book_id: &str, chapter_index: usize) -> Result<ChapterRecord> {
        self.book(book_id).await?;
        let chapter = self
            .backend
            .chapter(book_id, chapter_index)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("chapter {} of book {}", chapter_index, book_id))
            })?;

        let content = if chapter.has_content {
            self.reconstruct_content(&chapter).await?
        } else {
            String::new()
        };

        Ok(ChapterRecord {
            id: chapter.id,
            title: chapter.title,
            content,
            chapter_index: chapter.chapter_index,
        })
    }

    async fn reconstruct_content(&self, chapter: &StoredChapter) -> Result<String> {
        let mut blocks = self.backend.content_blocks(&chapter.id).await?;
        if blocks.is_empty() {
            // Rows written before block storage keep content on the chapter.
            return Ok(chapter.legacy_content.clone().unwrap_or_default());
        }

        blocks.sort_by_key(|block| block.content_index);
        let total = blocks.iter().map(|block| block.payload.len()).sum();
        let mut content = String::with_capacity(total);
        for block in &blocks {
            content.push_str(&block.payload);
        }
        Ok(content)
    }

    pub async fn chapter_rows(&self, book_id: &str) -> Result<usize> {
        self.backend.chapter_rows(book_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EncryptedChapter;

    fn chapters(range: std::ops::Range<usize>, version: &str) -> Vec<EncryptedChapter> {
        range
            .map(|i| EncryptedChapter {
                title: format!("title-{}-{}", i, version),
                content: format!("content-{}-{}", i, version),
            })
            .collect()
    }

    fn message(
        chunk_index: usize,
        total_chunks: usize,
        chapter_count: usize,
        chapters: Vec<EncryptedChapter>,
    ) -> UploadMessage {
        UploadMessage {
            chapters,
            chapter_count,
            chunk_index,
            total_chunks,
            file_size: 1234,
            is_last_chunk: chunk_index + 1 == total_chunks,
            upload_id: None,
        }
    }

    async fn book(store: &ContentStore) -> String {
        store.create_book("cipher-title", "").await.unwrap().id
    }

    async fn upload_thirteen(store: &ContentStore, book_id: &str, version: &str) {
        store.commit_chunk(book_id, &message(0, 3, 13, chapters(0..5, version))).await.unwrap();
        store.commit_chunk(book_id, &message(1, 3, 13, chapters(5..10, version))).await.unwrap();
        store.commit_chunk(book_id, &message(2, 3, 13, chapters(10..13, version))).await.unwrap();
    }

    #[tokio::test]
    async fn test_resent_chunk_replaces_its_range_only() {
        let store = ContentStore::in_memory();
        let id = book(&store).await;
        upload_thirteen(&store, &id, "v1").await;

        let receipt = store
            .commit_chunk(&id, &message(1, 3, 13, chapters(5..10, "v2")))
            .await
            .unwrap();
        assert_eq!(receipt.chunk_index, 1);

        assert_eq!(store.book(&id).await.unwrap().chapter_count, 13);
        assert_eq!(store.chapter_rows(&id).await.unwrap(), 13);
        for i in 0..13 {
            let chapter = store.get_chapter(&id, i).await.unwrap();
            let version = if (5..10).contains(&i) { "v2" } else { "v1" };
            assert_eq!(chapter.title, format!("title-{}-{}", i, version));
            assert_eq!(chapter.content, format!("content-{}-{}", i, version));
        }
    }

    #[tokio::test]
    async fn test_chunk_zero_resets_book() {
        let store = ContentStore::in_memory();
        let id = book(&store).await;
        upload_thirteen(&store, &id, "v1").await;

        store.commit_chunk(&id, &message(0, 1, 2, chapters(0..2, "v2"))).await.unwrap();

        assert_eq!(store.chapter_rows(&id).await.unwrap(), 2);
        assert_eq!(store.book(&id).await.unwrap().chapter_count, 2);
        assert!(matches!(store.get_chapter(&id, 5).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_totals_only_set_by_last_chunk() {
        let store = ContentStore::in_memory();
        let id = book(&store).await;
        store.commit_chunk(&id, &message(0, 3, 13, chapters(0..5, "v1"))).await.unwrap();
        let book = store.book(&id).await.unwrap();
        assert_eq!((book.chapter_count, book.file_size), (0, 0));
    }

    #[tokio::test]
    async fn test_large_content_is_split_and_reassembled() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ContentStore::new(
            backend.clone(),
            StoreConfig {
                block_size: 16,
                max_batch_statements: 3,
            },
        );
        let id = book(&store).await;
        let content = "0123456789abcdef".repeat(5) + "tail";
        let chapter = EncryptedChapter {
            title: "t".into(),
            content: content.clone(),
        };
        store.commit_chunk(&id, &message(0, 1, 1, vec![chapter])).await.unwrap();

        let blocks = backend.content_blocks(&chapter_id(&id, 0)).await.unwrap();
        assert_eq!(blocks.len(), 6);
        assert_eq!(store.get_chapter(&id, 0).await.unwrap().content, content);
    }

    #[tokio::test]
    async fn test_reconstruction_orders_by_content_index() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ContentStore::new(backend.clone(), StoreConfig::default());
        let id = book(&store).await;
        let cid = chapter_id(&id, 0);

        let mut ops = vec![WriteOp::InsertChapter(StoredChapter {
            id: cid.clone(),
            book_id: id.clone(),
            chapter_index: 0,
            title: "t".into(),
            has_content: true,
            legacy_content: None,
        })];
        for index in [3usize, 0, 2, 1] {
            ops.push(WriteOp::InsertContentBlock(StoredContentBlock {
                id: content_block_id(&cid, index),
                chapter_id: cid.clone(),
                content_index: index,
                payload: format!("[{}]", index),
            }));
        }
        backend.apply_batch(&ops).await.unwrap();

        assert_eq!(store.get_chapter(&id, 0).await.unwrap().content, "[0][1][2][3]");
    }

    #[tokio::test]
    async fn test_legacy_inline_content_is_read() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ContentStore::new(backend.clone(), StoreConfig::default());
        let id = book(&store).await;
        backend
            .apply_batch(&[WriteOp::InsertChapter(StoredChapter {
                id: chapter_id(&id, 0),
                book_id: id.clone(),
                chapter_index: 0,
                title: "t".into(),
                has_content: true,
                legacy_content: Some("inline-blob".into()),
            })])
            .await
            .unwrap();

        assert_eq!(store.get_chapter(&id, 0).await.unwrap().content, "inline-blob");
    }

    #[tokio::test]
    async fn test_protocol_errors_write_nothing() {
        let store = ContentStore::in_memory();
        let id = book(&store).await;

        let err = store
            .commit_chunk(&id, &message(1, 3, 13, chapters(5..10, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Protocol(ProtocolError::NoImportInProgress { .. })));

        store.commit_chunk(&id, &message(0, 3, 13, chapters(0..5, "v1"))).await.unwrap();

        let err = store
            .commit_chunk(&id, &message(2, 3, 13, chapters(10..13, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Protocol(ProtocolError::SkippedChunk { expected: 1, got: 2 })
        ));

        let err = store
            .commit_chunk(&id, &message(1, 4, 13, chapters(4..8, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Protocol(ProtocolError::ShapeMismatch { .. })));

        let err = store
            .commit_chunk(&id, &message(1, 3, 13, chapters(5..8, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Protocol(ProtocolError::ChapterCountMismatch { expected: 5, got: 3, .. })
        ));

        let err = store
            .commit_chunk(&id, &message(3, 3, 13, chapters(0..1, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Protocol(ProtocolError::ChunkOutOfRange { .. })));

        assert_eq!(store.chapter_rows(&id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failed_batch_keeps_earlier_chunks() {
        let backend = Arc::new(MemoryBackend::new());
        let store = ContentStore::new(backend.clone(), StoreConfig::default());
        let id = book(&store).await;
        store.commit_chunk(&id, &message(0, 3, 13, chapters(0..5, "v1"))).await.unwrap();

        backend.fail_next_batches(1);
        let err = store
            .commit_chunk(&id, &message(1, 3, 13, chapters(5..10, "v1")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert_eq!(store.chapter_rows(&id).await.unwrap(), 5);
        assert!(store.get_chapter(&id, 4).await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_inputs_are_rejected() {
        let store = ContentStore::in_memory();
        assert!(matches!(store.create_book("  ", "").await, Err(StoreError::Validation(_))));

        let id = book(&store).await;
        let err = store.commit_chunk(&id, &message(0, 1, 1, Vec::new())).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_delete_book_removes_everything() {
        let store = ContentStore::in_memory();
        let id = book(&store).await;
        upload_thirteen(&store, &id, "v1").await;

        store.delete_book(&id).await.unwrap();
        assert!(matches!(store.book(&id).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.chapter_rows(&id).await.unwrap(), 0);
    }
}
