//! Page-Harvest: a paginated content harvester
//!
//! This crate walks a numbered range of listing pages with a bounded worker
//! pool, hands each page body to an [`crawler::Extractor`], and records every
//! extracted record in three coordinated sinks: a sled document store, a
//! SQLite index and a flat-file JSON export.

pub mod config;
pub mod crawler;
pub mod output;
pub mod record;
pub mod storage;

use thiserror::Error;

/// Main error type for Page-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Could not determine page count: {0}")]
    PageCountUnavailable(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

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

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown setting: {0}")]
    UnknownKey(String),
}

/// Errors produced by the fetcher
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// One attempt failed; the fetcher may still retry
    #[error("Attempt {attempt} for {url} failed: {message}")]
    Transient {
        url: String,
        attempt: u32,
        message: String,
    },

    /// Every attempt failed; terminal for this work item only
    #[error("Gave up on {url} after {attempts} attempts: {last_error}")]
    Exhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

/// Raised by an extractor that could not make sense of a page body
///
/// The pipeline treats this as "no records on this page".
#[derive(Debug, Error)]
#[error("Failed to extract records from page {page}: {message}")]
pub struct ExtractionError {
    pub page: u32,
    pub message: String,
}

/// Result type alias for Page-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::RunConfig;
pub use crawler::{Harvester, RunReport, WorkItem};
pub use record::{Record, SortKey};
pub use storage::PersistenceLayer;
