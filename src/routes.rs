//! HTTP surface of the content store.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::DEFAULT_MAX_BODY;
use crate::error::Result;
use crate::models::{
    Book, ChapterResponse, ChunkReceipt, CreateBookRequest, CreateBookResponse, UploadMessage,
};
use crate::services::store::ContentStore;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: ContentStore,
    max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: ContentStore) -> Self {
        Self::with_max_body(store, DEFAULT_MAX_BODY)
    }

    pub fn with_max_body(store: ContentStore, max_body_bytes: usize) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                max_body_bytes,
            }),
        }
    }

    pub fn store(&self) -> &ContentStore {
        &self.inner.store
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.inner.max_body_bytes);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/books", post(create_book))
        .route("/api/books/:book_id", get(get_book).delete(delete_book))
        .route("/api/books/:book_id/upload-content", post(upload_content))
        .route("/api/books/:book_id/chapters/:chapter_index", get(get_chapter))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        storage: state.store().backend_name(),
    })
}

async fn create_book(
    State(state): State<AppState>,
    Json(request): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<CreateBookResponse>)> {
    let book = state.store().create_book(&request.title, &request.author).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateBookResponse {
            success: true,
            message: "book created".to_string(),
            book_id: book.id,
        }),
    ))
}

async fn get_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<Json<Book>> {
    Ok(Json(state.store().book(&book_id).await?))
}

async fn delete_book(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
) -> Result<StatusCode> {
    state.store().delete_book(&book_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/books/:book_id/upload-content
///
/// Commit one chunk of a chunked import. The body is opaque CipherBlob text;
/// the server never decrypts it.
async fn upload_content(
    State(state): State<AppState>,
    Path(book_id): Path<String>,
    Json(message): Json<UploadMessage>,
) -> Result<Json<ChunkReceipt>> {
    tracing::debug!(
        book_id,
        chunk_index = message.chunk_index,
        total_chunks = message.total_chunks,
        chapters = message.chapters.len(),
        "Received upload chunk"
    );
    let receipt = state.store().commit_chunk(&book_id, &message).await?;
    Ok(Json(receipt))
}

async fn get_chapter(
    State(state): State<AppState>,
    Path((book_id, chapter_index)): Path<(String, usize)>,
) -> Result<Json<ChapterResponse>> {
    let chapter = state.store().get_chapter(&book_id, chapter_index).await?;
    Ok(Json(ChapterResponse { chapter }))
}
