use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::ErrorResponse;
use crate::models::{
    Book, ChapterRecord, ChapterResponse, ChunkReceipt, CreateBookResponse, UploadMessage,
};
use crate::services::uploader::{ChunkSink, TransportError};
use crate::utils::RetryPolicy;

/// HTTP client for a running content server.
pub struct LibraryClient {
    client: reqwest::Client,
    api_url: String,
    api_token: Option<String>,
    retry: RetryPolicy,
}

impl LibraryClient {
    pub fn new(api_url: impl Into<String>, api_token: Option<String>) -> Self {
        LibraryClient {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            api_token: api_token.filter(|token| !token.is_empty()),
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for book and chapter calls. Chunk uploads are retried by
    /// the `Uploader` instead, so `send_chunk` makes a single attempt.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request_builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Content-Type", "application/json");

        if let Some(token) = &self.api_token {
            request_builder =
                request_builder.header("Authorization", format!("Bearer {}", token));
        }
        request_builder
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await?;
        // The server answers with an ErrorResponse; anything else is passed through.
        let message = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn send<T, F>(&self, what: &str, build: F) -> Result<T, TransportError>
    where
        T: DeserializeOwned,
        F: Fn() -> reqwest::RequestBuilder,
    {
        let build = &build;
        self.retry
            .run(what, move || Self::attempt::<T>(build()))
            .await
    }

    fn attempt<T: DeserializeOwned>(
        request: reqwest::RequestBuilder,
    ) -> impl Future<Output = Result<T, TransportError>> {
        async move { Self::read(request.send().await?).await }
    }

    /// Create a book record. Title and author should already be CipherBlobs.
    pub async fn create_book(&self, title: &str, author: &str) -> Result<String, TransportError> {
        let body = json!({ "title": title, "author": author });
        let created: CreateBookResponse = self
            .send("create book", || {
                self.request(reqwest::Method::POST, "/api/books").json(&body)
            })
            .await?;
        Ok(created.book_id)
    }

    pub async fn book(&self, book_id: &str) -> Result<Book, TransportError> {
        let path = format!("/api/books/{}", book_id);
        self.send("fetch book", || self.request(reqwest::Method::GET, &path))
            .await
    }

    pub async fn chapter(
        &self,
        book_id: &str,
        chapter_index: usize,
    ) -> Result<ChapterRecord, TransportError> {
        let path = format!("/api/books/{}/chapters/{}", book_id, chapter_index);
        let body: ChapterResponse = self
            .send("fetch chapter", || self.request(reqwest::Method::GET, &path))
            .await?;
        Ok(body.chapter)
    }
}

#[async_trait]
impl ChunkSink for LibraryClient {
    async fn send_chunk(
        &self,
        book_id: &str,
        message: &UploadMessage,
    ) -> Result<ChunkReceipt, TransportError> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/api/books/{}/upload-content", book_id),
            )
            .json(message)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_and_empty_token_are_normalised() {
        let client = LibraryClient::new("http://localhost:3000/", Some(String::new()));
        assert_eq!(client.api_url, "http://localhost:3000");
        assert!(client.api_token.is_none());
        assert_eq!(client.retry, RetryPolicy::default());
    }
}
