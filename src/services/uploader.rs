//! Client side of the chunked import: partitioning, sequential upload with
//! retries, and the end-to-end `import_text` pipeline.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    ChunkReceipt, ContentChunk, EncryptedChapter, RuleSet, UploadMessage, chapters_per_chunk,
    chunk_range,
};
use crate::services::chapterizer::segment_with;
use crate::services::codec::{self, CodecContext, EncodeError};
use crate::services::store::{ContentStore, StoreError};
use crate::utils::RetryPolicy;

/// Default encrypted-payload budget for one chunk.
pub const DEFAULT_CHUNK_BUDGET: usize = 4 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("store rejected chunk: {0}")]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("nothing to upload")]
    Empty,

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("chunk {chunk}/{total_chunks} failed, restart the import from the first chunk: {source}")]
    ChunkFailed {
        chunk: usize,
        total_chunks: usize,
        #[source]
        source: TransportError,
    },

    #[error("chunk {chunk} covers chapters {start}..{end}, expected {expected_start}..{expected_end}")]
    InvalidPlan {
        chunk: usize,
        start: usize,
        end: usize,
        expected_start: usize,
        expected_end: usize,
    },

    #[error("server acknowledged chunk {got} while chunk {expected} was sent")]
    UnexpectedReceipt { expected: usize, got: usize },
}

/// Destination of upload messages.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn send_chunk(
        &self,
        book_id: &str,
        message: &UploadMessage,
    ) -> Result<ChunkReceipt, TransportError>;
}

/// Commits chunks straight into a [`ContentStore`] in this process.
#[derive(Clone)]
pub struct StoreSink {
    store: ContentStore,
}

impl StoreSink {
    pub fn new(store: ContentStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ChunkSink for StoreSink {
    async fn send_chunk(
        &self,
        book_id: &str,
        message: &UploadMessage,
    ) -> Result<ChunkReceipt, TransportError> {
        Ok(self.store.commit_chunk(book_id, message).await?)
    }
}

/// Partition encrypted chapters into chunks of roughly `budget_bytes` each.
///
/// The budget only picks how many chunks to aim for. Chapters are then
/// assigned with the same fixed quota the server uses, so chunk `i` always
/// covers `chunk_range(chapter_count, total_chunks, i)`.
pub fn plan(chapters: Vec<EncryptedChapter>, budget_bytes: usize) -> Vec<ContentChunk> {
    let payload: usize = chapters.iter().map(|c| c.title.len() + c.content.len()).sum();
    let target = payload.div_ceil(budget_bytes.max(1)).max(1);
    plan_chunks(chapters, target)
}

/// Partition into at most `target_chunks` chunks, none of them empty.
pub fn plan_chunks(chapters: Vec<EncryptedChapter>, target_chunks: usize) -> Vec<ContentChunk> {
    let chapter_count = chapters.len();
    if chapter_count == 0 {
        return Vec::new();
    }

    // Shrink the chunk count until the quota leaves no trailing empty chunk.
    let mut total_chunks = target_chunks.clamp(1, chapter_count);
    loop {
        let settled = chapter_count.div_ceil(chapters_per_chunk(chapter_count, total_chunks));
        if settled == total_chunks {
            break;
        }
        total_chunks = settled;
    }

    let mut remaining = chapters.into_iter();
    (0..total_chunks)
        .map(|chunk_index| {
            let (start, end) = chunk_range(chapter_count, total_chunks, chunk_index);
            ContentChunk {
                chunk_index,
                total_chunks,
                start_index: start,
                chapters: remaining.by_ref().take(end - start).collect(),
                is_last: chunk_index + 1 == total_chunks,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub book_id: String,
    pub chapter_count: usize,
    pub total_chunks: usize,
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Uploader {
    retry: RetryPolicy,
}

impl Uploader {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Send every chunk in order, each with the retry policy. Stops at the
    /// first chunk that still fails; the import must then be restarted from
    /// chunk 0.
    pub async fn upload(
        &self,
        book_id: &str,
        chunks: &[ContentChunk],
        file_size: u64,
        sink: &dyn ChunkSink,
    ) -> Result<UploadReport, ImportError> {
        let chapter_count: usize = chunks.iter().map(|chunk| chunk.chapters.len()).sum();
        if chapter_count == 0 {
            return Err(ImportError::Empty);
        }

        // The server places chapters by quota, so a chunk must cover exactly
        // its quota range.
        for chunk in chunks {
            let (expected_start, expected_end) =
                chunk_range(chapter_count, chunk.total_chunks, chunk.chunk_index);
            let end = chunk.start_index + chunk.chapters.len();
            if chunk.start_index != expected_start || end != expected_end {
                return Err(ImportError::InvalidPlan {
                    chunk: chunk.chunk_index,
                    start: chunk.start_index,
                    end,
                    expected_start,
                    expected_end,
                });
            }
        }

        for chunk in chunks {
            let message = UploadMessage {
                chapters: chunk.chapters.clone(),
                chapter_count,
                chunk_index: chunk.chunk_index,
                total_chunks: chunk.total_chunks,
                file_size,
                is_last_chunk: chunk.is_last,
                upload_id: None,
            };
            let what = format!(
                "upload of chunk {}/{}",
                chunk.chunk_index + 1,
                chunk.total_chunks
            );

            let message = &message;
            let receipt = self
                .retry
                .run(&what, move || sink.send_chunk(book_id, message))
                .await
                .map_err(|source| ImportError::ChunkFailed {
                    chunk: chunk.chunk_index + 1,
                    total_chunks: chunk.total_chunks,
                    source,
                })?;

            if receipt.chunk_index != chunk.chunk_index {
                return Err(ImportError::UnexpectedReceipt {
                    expected: chunk.chunk_index,
                    got: receipt.chunk_index,
                });
            }
            tracing::info!(
                book_id,
                chunk = chunk.chunk_index + 1,
                total_chunks = chunk.total_chunks,
                "{}",
                receipt.message
            );
        }

        Ok(UploadReport {
            book_id: book_id.to_string(),
            chapter_count,
            total_chunks: chunks.len(),
            file_size,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub budget_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_CHUNK_BUDGET,
            retry: RetryPolicy::default(),
        }
    }
}

/// Segment, encrypt, partition and upload a book's text.
///
/// The book record must already exist on the receiving side.
pub async fn import_text(
    book_id: &str,
    text: &str,
    rules: &RuleSet,
    ctx: &CodecContext,
    sink: &dyn ChunkSink,
    options: &ImportOptions,
) -> Result<UploadReport, ImportError> {
    let chapters = segment_with(text, rules);
    tracing::info!(book_id, chapters = chapters.len(), "Segmented text");

    let encrypted = codec::encrypt_chapters(chapters, ctx.clone()).await?;
    let file_size = encrypted.iter().map(|chapter| chapter.content.len() as u64).sum();

    let chunks = plan(encrypted, options.budget_bytes);
    tracing::info!(book_id, chunks = chunks.len(), file_size, "Uploading encrypted chapters");

    Uploader::new(options.retry).upload(book_id, &chunks, file_size, sink).await
}
