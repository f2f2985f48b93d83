pub mod chapterizer;
pub mod client;
pub mod codec;
pub mod kdf;
pub mod store;
pub mod uploader;
