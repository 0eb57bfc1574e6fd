//! Linkscope: a single-page crawl engine
//!
//! This crate crawls submitted URLs one page at a time, extracting structural
//! metrics (headings, login forms, HTML version, link health) and reporting
//! live progress to any number of observers.

pub mod config;
pub mod crawler;
pub mod output;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Linkscope operations
#[derive(Debug, Error)]
pub enum LinkscopeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid crawl target {url}: {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("Job queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Linkscope operations
pub type Result<T> = std::result::Result<T, LinkscopeError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{CrawlEngine, HttpFetcher};
pub use state::CrawlStatus;
pub use storage::{JobId, JobStore, SqliteStorage};
