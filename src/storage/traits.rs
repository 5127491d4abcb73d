//! Storage traits and error types
//!
//! This module defines the read interface the statistics aggregator uses
//! against the relational index, and the error types shared by the sinks.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur inside a single sink
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Document store error: {0}")]
    Document(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file is held by another process
    #[error("Store at {} is locked by another process", .0.display())]
    Locked(PathBuf),

    #[error("Invalid schema: {0}")]
    Schema(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Corrupt entry: {0}")]
    Corrupt(String),

    #[error("Lock poisoned: {0}")]
    Poisoned(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// The three persistence sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sink {
    DocumentStore,
    RelationalIndex,
    FileExport,
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Sink::DocumentStore => "document store",
            Sink::RelationalIndex => "relational index",
            Sink::FileExport => "file export",
        };
        f.write_str(name)
    }
}

/// Steps of a single save, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SaveStage {
    Lookup,
    UpsertDocument,
    UpsertIndex,
    ReplaceTags,
    ExportFile,
    Done,
}

impl SaveStage {
    /// The sink a stage writes to
    pub fn sink(self) -> Sink {
        match self {
            SaveStage::Lookup | SaveStage::UpsertDocument => Sink::DocumentStore,
            SaveStage::UpsertIndex | SaveStage::ReplaceTags => Sink::RelationalIndex,
            SaveStage::ExportFile | SaveStage::Done => Sink::FileExport,
        }
    }
}

impl fmt::Display for SaveStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SaveStage::Lookup => "lookup",
            SaveStage::UpsertDocument => "upsert document",
            SaveStage::UpsertIndex => "upsert index",
            SaveStage::ReplaceTags => "replace tags",
            SaveStage::ExportFile => "export file",
            SaveStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A save that stopped part way through
///
/// Stages before `stage` have been applied; nothing after it has.
#[derive(Debug, Error)]
#[error("Saving '{natural_key}' failed in {sink} at stage '{stage}': {source}")]
pub struct SinkWriteError {
    pub natural_key: String,
    pub sink: Sink,
    pub stage: SaveStage,
    #[source]
    pub source: StorageError,
}

impl SinkWriteError {
    pub fn new(natural_key: &str, stage: SaveStage, source: StorageError) -> Self {
        Self {
            natural_key: natural_key.to_string(),
            sink: stage.sink(),
            stage,
            source,
        }
    }
}

/// Read-only queries over the relational index
///
/// Everything here is addressed by kind name so callers do not need the
/// record's Rust type.
pub trait RecordIndex {
    /// Whether a table exists for this kind
    fn has_kind(&self, kind: &str) -> StorageResult<bool>;

    /// Total number of records of a kind
    fn count_records(&self, kind: &str) -> StorageResult<u64>;

    /// Scalar field columns of a kind, in declaration order
    fn field_columns(&self, kind: &str) -> StorageResult<Vec<String>>;

    /// Number of records whose field is neither NULL nor blank
    fn count_non_empty(&self, kind: &str, field: &str) -> StorageResult<u64>;

    /// Tag frequencies, most frequent first, ties by first appearance
    fn tag_frequencies(&self, kind: &str, limit: usize) -> StorageResult<Vec<(String, u64)>>;
}
