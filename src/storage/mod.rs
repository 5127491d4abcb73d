//! Storage module for persisting harvested records
//!
//! Every record is written to three sinks:
//! - a sled document store holding the JSON envelope under a surrogate id
//! - a SQLite relational index with one table per record kind plus tags
//! - a flat-file export tree bucketed by sort key
//!
//! The SQLite database also tracks harvest runs.

mod document;
mod export;
mod persistence;
mod schema;
mod sqlite;
mod traits;

pub use document::{fallback_path, DocumentStore};
pub use export::{sanitize_file_name, ExportPaths, FileExporter, TEXT_EXPORT_DIR};
pub use persistence::{PersistenceLayer, SaveReport, StorePaths};
pub use sqlite::{IndexRow, SqliteIndex};
pub use traits::{RecordIndex, SaveStage, Sink, SinkWriteError, StorageError, StorageResult};

/// Represents a harvest run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub kind: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub totals: RunTotals,
}

/// Counters stored when a run finishes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub records_saved: u64,
    pub records_failed: u64,
}

/// Status of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
