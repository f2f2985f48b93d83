use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;

use mizhang::models::{EncryptedChapter, UploadMessage};
use mizhang::services::client::LibraryClient;
use mizhang::services::uploader::{ChunkSink, TransportError};
use mizhang::utils::RetryPolicy;

/// Answers 503 to the first `failures` requests, then succeeds.
#[derive(Clone)]
struct Flaky {
    failures: usize,
    calls: Arc<AtomicUsize>,
}

impl Flaky {
    fn unavailable(&self) -> Option<Response> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        (n < self.failures).then(|| {
            let body = json!({"success": false, "error": "UNAVAILABLE", "message": "try later"});
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        })
    }
}

async fn create_book(State(flaky): State<Flaky>) -> Response {
    flaky.unavailable().unwrap_or_else(|| {
        let body = json!({"success": true, "message": "book created", "book_id": "b1"});
        (StatusCode::CREATED, Json(body)).into_response()
    })
}

async fn chapter(State(flaky): State<Flaky>) -> Response {
    flaky.unavailable().unwrap_or_else(|| {
        Json(json!({
            "chapter": {"id": "c4", "chapter_index": 4, "title": "T4", "content": "C4"}
        }))
        .into_response()
    })
}

async fn upload(State(flaky): State<Flaky>) -> Response {
    flaky.unavailable().unwrap_or_else(|| {
        Json(json!({
            "success": true,
            "message": "ok",
            "chunk_index": 0,
            "total_chunks": 1,
            "is_complete": true,
        }))
        .into_response()
    })
}

/// Serve a flaky library on a random local port.
async fn serve(failures: usize) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = Flaky {
        failures,
        calls: calls.clone(),
    };
    let app = Router::new()
        .route("/api/books", post(create_book))
        .route("/api/books/:book_id/chapters/:chapter_index", get(chapter))
        .route("/api/books/:book_id/upload-content", post(upload))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), calls)
}

fn client(url: &str, attempts: u32) -> LibraryClient {
    LibraryClient::new(url, Some("secret".into()))
        .with_retry(RetryPolicy::new(attempts, Duration::from_millis(1)))
}

#[tokio::test]
async fn test_create_book_retries_unavailable_server() {
    let (url, calls) = serve(2).await;
    let book_id = client(&url, 3).create_book("t", "a").await.unwrap();
    assert_eq!(book_id, "b1");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_chapter_read_retries_unavailable_server() {
    let (url, calls) = serve(1).await;
    let chapter = client(&url, 3).chapter("b1", 4).await.unwrap();
    assert_eq!(chapter.title, "T4");
    assert_eq!(chapter.content, "C4");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_client_gives_up_after_attempts() {
    let (url, calls) = serve(5).await;
    let err = client(&url, 2).create_book("t", "a").await.unwrap_err();
    match err {
        TransportError::Rejected { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "try later");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_send_chunk_is_single_attempt() {
    let (url, calls) = serve(1).await;
    let message = UploadMessage {
        chapters: vec![EncryptedChapter {
            title: "t".into(),
            content: "c".into(),
        }],
        chapter_count: 1,
        chunk_index: 0,
        total_chunks: 1,
        file_size: 1,
        is_last_chunk: true,
        upload_id: None,
    };

    let sink = client(&url, 3);
    assert!(sink.send_chunk("b1", &message).await.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(sink.send_chunk("b1", &message).await.unwrap().is_complete);
}
