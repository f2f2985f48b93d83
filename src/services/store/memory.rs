//! Process-local storage backend. Used for tests and `MIZHANG_STORAGE=memory`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Result, StorageBackend, StoreError, WriteOp};
use crate::models::{Book, ImportCursor, StoredChapter, StoredContentBlock};

#[derive(Debug, Clone)]
struct BookRow {
    book: Book,
    cursor: Option<ImportCursor>,
}

#[derive(Debug, Default)]
struct MemoryState {
    books: HashMap<String, BookRow>,
    chapters: HashMap<String, StoredChapter>,
    /// Chapter ids per book, keyed by chapter index.
    slots: HashMap<String, BTreeMap<usize, String>>,
    /// Blocks per chapter id, in insertion order.
    blocks: HashMap<String, Vec<StoredContentBlock>>,
}

/// Previous value of a key touched by a batch, restored on failure.
enum Undo {
    Book(String, Option<BookRow>),
    Chapter(String, Option<StoredChapter>),
    Blocks(String, Option<Vec<StoredContentBlock>>),
}

impl MemoryState {
    fn rollback(&mut self, undo: Vec<Undo>) {
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Book(id, Some(row)) => {
                    self.books.insert(id, row);
                }
                Undo::Book(id, None) => {
                    self.books.remove(&id);
                }
                Undo::Chapter(_, Some(chapter)) => self.put_chapter(chapter),
                Undo::Chapter(id, None) => {
                    self.take_chapter(&id);
                }
                Undo::Blocks(id, Some(blocks)) => {
                    self.blocks.insert(id, blocks);
                }
                Undo::Blocks(id, None) => {
                    self.blocks.remove(&id);
                }
            }
        }
    }

    fn put_chapter(&mut self, chapter: StoredChapter) {
        self.slots
            .entry(chapter.book_id.clone())
            .or_default()
            .insert(chapter.chapter_index, chapter.id.clone());
        self.chapters.insert(chapter.id.clone(), chapter);
    }

    fn take_chapter(&mut self, id: &str) -> Option<StoredChapter> {
        let chapter = self.chapters.remove(id)?;
        if let Some(slots) = self.slots.get_mut(&chapter.book_id) {
            if slots.get(&chapter.chapter_index).map(String::as_str) == Some(id) {
                slots.remove(&chapter.chapter_index);
            }
            if slots.is_empty() {
                self.slots.remove(&chapter.book_id);
            }
        }
        Some(chapter)
    }

    fn slot(&self, book_id: &str, chapter_index: usize) -> Option<&StoredChapter> {
        let id = self.slots.get(book_id)?.get(&chapter_index)?;
        self.chapters.get(id)
    }

    fn remove_chapter(&mut self, id: &str, undo: &mut Vec<Undo>) {
        if let Some(chapter) = self.take_chapter(id) {
            undo.push(Undo::Chapter(id.to_string(), Some(chapter)));
        }
        if let Some(blocks) = self.blocks.remove(id) {
            undo.push(Undo::Blocks(id.to_string(), Some(blocks)));
        }
    }

    fn book_mut(&mut self, book_id: &str, undo: &mut Vec<Undo>) -> Result<&mut BookRow> {
        let row = self
            .books
            .get_mut(book_id)
            .ok_or_else(|| StoreError::Backend(format!("book {} does not exist", book_id)))?;
        undo.push(Undo::Book(book_id.to_string(), Some(row.clone())));
        Ok(row)
    }

    fn apply(&mut self, op: &WriteOp, undo: &mut Vec<Undo>) -> Result<()> {
        match op {
            WriteOp::DeleteBookContent { book_id } => {
                let ids: Vec<String> = self
                    .slots
                    .get(book_id)
                    .map(|slots| slots.values().cloned().collect())
                    .unwrap_or_default();
                for id in ids {
                    self.remove_chapter(&id, undo);
                }
            }
            WriteOp::DeleteChapter { chapter_id } => self.remove_chapter(chapter_id, undo),
            WriteOp::InsertChapter(chapter) => {
                if !self.books.contains_key(&chapter.book_id) {
                    return Err(StoreError::Backend(format!(
                        "book {} does not exist",
                        chapter.book_id
                    )));
                }
                if self.chapters.contains_key(&chapter.id)
                    || self.slot(&chapter.book_id, chapter.chapter_index).is_some()
                {
                    return Err(StoreError::Backend(format!(
                        "chapter {} already exists",
                        chapter.id
                    )));
                }
                undo.push(Undo::Chapter(chapter.id.clone(), None));
                self.put_chapter(chapter.clone());
            }
            WriteOp::InsertContentBlock(block) => {
                if !self.chapters.contains_key(&block.chapter_id) {
                    return Err(StoreError::Backend(format!(
                        "chapter {} does not exist",
                        block.chapter_id
                    )));
                }
                let previous = self.blocks.get(&block.chapter_id).cloned();
                let blocks = self.blocks.entry(block.chapter_id.clone()).or_default();
                if blocks
                    .iter()
                    .any(|existing| existing.content_index == block.content_index)
                {
                    return Err(StoreError::Backend(format!(
                        "content block {} already exists",
                        block.id
                    )));
                }
                undo.push(Undo::Blocks(block.chapter_id.clone(), previous));
                blocks.push(block.clone());
            }
            WriteOp::UpdateBookTotals {
                book_id,
                chapter_count,
                file_size,
            } => {
                let row = self.book_mut(book_id, undo)?;
                row.book.chapter_count = *chapter_count;
                row.book.file_size = *file_size;
            }
            WriteOp::SetImportCursor { book_id, cursor } => {
                self.book_mut(book_id, undo)?.cursor = Some(*cursor);
            }
            WriteOp::DeleteBook { book_id } => {
                if let Some(row) = self.books.remove(book_id) {
                    undo.push(Undo::Book(book_id.clone(), Some(row)));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
    /// Number of upcoming batches to reject, for exercising failure paths.
    failing_batches: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `apply_batch` fail without writing.
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_book(&self, book: &Book) -> Result<()> {
        let mut state = self.state.write().await;
        if state.books.contains_key(&book.id) {
            return Err(StoreError::Backend(format!("book {} already exists", book.id)));
        }
        state.books.insert(
            book.id.clone(),
            BookRow {
                book: book.clone(),
                cursor: None,
            },
        );
        Ok(())
    }

    async fn book(&self, book_id: &str) -> Result<Option<Book>> {
        Ok(self.state.read().await.books.get(book_id).map(|row| row.book.clone()))
    }

    async fn import_cursor(&self, book_id: &str) -> Result<Option<ImportCursor>> {
        Ok(self.state.read().await.books.get(book_id).and_then(|row| row.cursor))
    }

    async fn chapter(&self, book_id: &str, chapter_index: usize) -> Result<Option<StoredChapter>> {
        Ok(self.state.read().await.slot(book_id, chapter_index).cloned())
    }

    async fn content_blocks(&self, chapter_id: &str) -> Result<Vec<StoredContentBlock>> {
        Ok(self
            .state
            .read()
            .await
            .blocks
            .get(chapter_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn chapter_rows(&self, book_id: &str) -> Result<usize> {
        Ok(self
            .state
            .read()
            .await
            .slots
            .get(book_id)
            .map_or(0, BTreeMap::len))
    }

    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<()> {
        if self.take_injected_failure() {
            return Err(StoreError::Backend("injected batch failure".into()));
        }

        let mut state = self.state.write().await;
        let mut undo = Vec::new();
        for op in ops {
            if let Err(e) = state.apply(op, &mut undo) {
                state.rollback(undo);
                return Err(e);
            }
        }
        Ok(())
    }
}
