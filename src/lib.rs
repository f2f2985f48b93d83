//! Mizhang: end-to-end encrypted plain-text book import.
//!
//! The client side segments a book into chapters, encrypts every title and
//! body with a password-derived key, and uploads the opaque result in
//! resumable chunks. The server side stores and reassembles CipherBlobs
//! without ever seeing plaintext.

pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

pub use config::Config;
pub use routes::{AppState, router};
pub use services::codec::{CodecContext, TextEncoding};
pub use services::store::ContentStore;
