//! SQLite storage backend.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{FromRow, Sqlite, Transaction};

use super::{Result, StorageBackend, WriteOp};
use crate::models::{Book, ImportCursor, StoredChapter, StoredContentBlock};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS books (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT NOT NULL DEFAULT '',
    chapter_count INTEGER NOT NULL DEFAULT 0,
    file_size INTEGER NOT NULL DEFAULT 0,
    import_total_chunks INTEGER,
    import_chapter_count INTEGER,
    import_next_chunk INTEGER,
    created_at TEXT NOT NULL
);

-- `content` holds inline CipherBlobs written before block storage.
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY,
    book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
    chapter_index INTEGER NOT NULL,
    title TEXT NOT NULL,
    content TEXT,
    has_content INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE (book_id, chapter_index)
);

CREATE INDEX IF NOT EXISTS idx_chapters_book ON chapters(book_id);

CREATE TABLE IF NOT EXISTS chapter_contents (
    id TEXT PRIMARY KEY,
    chapter_id TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    content_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (chapter_id, content_index)
);

CREATE INDEX IF NOT EXISTS idx_chapter_contents_chapter ON chapter_contents(chapter_id);
"#;

#[derive(FromRow)]
struct BookRow {
    id: String,
    title: String,
    author: String,
    chapter_count: i64,
    file_size: i64,
    created_at: String,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            title: row.title,
            author: row.author,
            chapter_count: row.chapter_count.max(0) as usize,
            file_size: row.file_size.max(0) as u64,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct CursorRow {
    import_total_chunks: Option<i64>,
    import_chapter_count: Option<i64>,
    import_next_chunk: Option<i64>,
}

#[derive(FromRow)]
struct ChapterRow {
    id: String,
    book_id: String,
    chapter_index: i64,
    title: String,
    content: Option<String>,
    has_content: bool,
}

impl From<ChapterRow> for StoredChapter {
    fn from(row: ChapterRow) -> Self {
        StoredChapter {
            id: row.id,
            book_id: row.book_id,
            chapter_index: row.chapter_index.max(0) as usize,
            title: row.title,
            has_content: row.has_content,
            legacy_content: row.content,
        }
    }
}

#[derive(FromRow)]
struct BlockRow {
    id: String,
    chapter_id: String,
    content_index: i64,
    content: String,
}

impl From<BlockRow> for StoredContentBlock {
    fn from(row: BlockRow) -> Self {
        StoredContentBlock {
            id: row.id,
            chapter_id: row.chapter_id,
            content_index: row.content_index.max(0) as usize,
            payload: row.content,
        }
    }
}

/// Open a pool, creating the database file and schema if needed.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal);

    // Every connection to `:memory:` is its own database, so keep exactly one.
    let pool = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    initialize_schema(&pool).await?;
    Ok(pool)
}

pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(create_pool(database_url).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn apply_op(tx: &mut Transaction<'_, Sqlite>, op: &WriteOp) -> Result<()> {
        match op {
            WriteOp::DeleteBookContent { book_id } => {
                sqlx::query(
                    "DELETE FROM chapter_contents WHERE chapter_id IN (SELECT id FROM chapters WHERE book_id = ?)",
                )
                .bind(book_id)
                .execute(&mut **tx)
                .await?;
                sqlx::query("DELETE FROM chapters WHERE book_id = ?")
                    .bind(book_id)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteOp::DeleteChapter { chapter_id } => {
                sqlx::query("DELETE FROM chapter_contents WHERE chapter_id = ?")
                    .bind(chapter_id)
                    .execute(&mut **tx)
                    .await?;
                sqlx::query("DELETE FROM chapters WHERE id = ?")
                    .bind(chapter_id)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteOp::InsertChapter(chapter) => {
                sqlx::query(
                    r#"
                    INSERT INTO chapters (id, book_id, chapter_index, title, content, has_content, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chapter.id)
                .bind(&chapter.book_id)
                .bind(chapter.chapter_index as i64)
                .bind(&chapter.title)
                .bind(&chapter.legacy_content)
                .bind(chapter.has_content)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut **tx)
                .await?;
            }
            WriteOp::InsertContentBlock(block) => {
                sqlx::query(
                    r#"
                    INSERT INTO chapter_contents (id, chapter_id, content_index, content, created_at)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&block.id)
                .bind(&block.chapter_id)
                .bind(block.content_index as i64)
                .bind(&block.payload)
                .bind(Utc::now().to_rfc3339())
                .execute(&mut **tx)
                .await?;
            }
            WriteOp::UpdateBookTotals {
                book_id,
                chapter_count,
                file_size,
            } => {
                sqlx::query("UPDATE books SET chapter_count = ?, file_size = ? WHERE id = ?")
                    .bind(*chapter_count as i64)
                    .bind(*file_size as i64)
                    .bind(book_id)
                    .execute(&mut **tx)
                    .await?;
            }
            WriteOp::SetImportCursor { book_id, cursor } => {
                sqlx::query(
                    r#"
                    UPDATE books
                    SET import_total_chunks = ?, import_chapter_count = ?, import_next_chunk = ?
                    WHERE id = ?
                    "#,
                )
                .bind(cursor.total_chunks as i64)
                .bind(cursor.chapter_count as i64)
                .bind(cursor.next_chunk as i64)
                .bind(book_id)
                .execute(&mut **tx)
                .await?;
            }
            WriteOp::DeleteBook { book_id } => {
                sqlx::query("DELETE FROM books WHERE id = ?")
                    .bind(book_id)
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert_book(&self, book: &Book) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO books (id, title, author, chapter_count, file_size, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.chapter_count as i64)
        .bind(book.file_size as i64)
        .bind(&book.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn book(&self, book_id: &str) -> Result<Option<Book>> {
        let row = sqlx::query_as::<_, BookRow>(
            "SELECT id, title, author, chapter_count, file_size, created_at FROM books WHERE id = ?",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Book::from))
    }

    async fn import_cursor(&self, book_id: &str) -> Result<Option<ImportCursor>> {
        let row = sqlx::query_as::<_, CursorRow>(
            "SELECT import_total_chunks, import_chapter_count, import_next_chunk FROM books WHERE id = ?",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            match (row.import_total_chunks, row.import_chapter_count, row.import_next_chunk) {
                (Some(total_chunks), Some(chapter_count), Some(next_chunk)) => Some(ImportCursor {
                    total_chunks: total_chunks.max(0) as usize,
                    chapter_count: chapter_count.max(0) as usize,
                    next_chunk: next_chunk.max(0) as usize,
                }),
                _ => None,
            }
        }))
    }

    async fn chapter(&self, book_id: &str, chapter_index: usize) -> Result<Option<StoredChapter>> {
        let row = sqlx::query_as::<_, ChapterRow>(
            r#"
            SELECT id, book_id, chapter_index, title, content, has_content
            FROM chapters
            WHERE book_id = ? AND chapter_index = ?
            "#,
        )
        .bind(book_id)
        .bind(chapter_index as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredChapter::from))
    }

    async fn content_blocks(&self, chapter_id: &str) -> Result<Vec<StoredContentBlock>> {
        let rows = sqlx::query_as::<_, BlockRow>(
            "SELECT id, chapter_id, content_index, content FROM chapter_contents WHERE chapter_id = ?",
        )
        .bind(chapter_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredContentBlock::from).collect())
    }

    async fn chapter_rows(&self, book_id: &str) -> Result<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chapters WHERE book_id = ?")
            .bind(book_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn apply_batch(&self, ops: &[WriteOp]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for op in ops {
            Self::apply_op(&mut tx, op).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
