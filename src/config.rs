//! Server configuration loaded from the environment.

use std::str::FromStr;

use crate::services::store::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_BATCH};

/// Default request body limit. One upload chunk carries a full encrypted
/// chunk budget plus JSON framing.
pub const DEFAULT_MAX_BODY: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Sqlite,
    Memory,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(StorageKind::Sqlite),
            "memory" => Ok(StorageKind::Memory),
            other => Err(format!("expected sqlite or memory, got {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageKind,
    pub database_url: String,
    /// Maximum bytes per stored content block.
    pub block_size: usize,
    /// Maximum statements per atomic write batch.
    pub max_batch_statements: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                max_body_bytes: DEFAULT_MAX_BODY,
            },
            storage: StorageConfig {
                backend: StorageKind::Sqlite,
                database_url: "sqlite:./mizhang.db".to_string(),
                block_size: DEFAULT_BLOCK_SIZE,
                max_batch_statements: DEFAULT_MAX_BATCH,
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from any variable source. Unset variables keep their
    /// defaults; set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("MIZHANG_HOST") {
            config.server.host = host;
        }
        if let Some(port) = parse_var(&lookup, "MIZHANG_PORT")? {
            config.server.port = port;
        }
        if let Some(max_body) = parse_var(&lookup, "MIZHANG_MAX_BODY")? {
            config.server.max_body_bytes = max_body;
        }
        if let Some(backend) = parse_var(&lookup, "MIZHANG_STORAGE")? {
            config.storage.backend = backend;
        }
        if let Some(url) = lookup("DATABASE_URL") {
            config.storage.database_url = url;
        }
        if let Some(block_size) = parse_var(&lookup, "MIZHANG_BLOCK_SIZE")? {
            config.storage.block_size = block_size;
        }
        if let Some(max_batch) = parse_var(&lookup, "MIZHANG_MAX_BATCH")? {
            config.storage.max_batch_statements = max_batch;
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
    }
}
