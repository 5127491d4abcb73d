//! Statistics generation from the relational index
//!
//! This module scans the index after a run and produces:
//! - the total record count for a kind
//! - how many records have each scalar field filled in
//! - the most frequent tags
//!
//! Only the index is read; the document store is never touched.

use crate::storage::{RecordIndex, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default length of the top tag list
pub const DEFAULT_TOP_TAGS: usize = 20;

/// Non-empty value count for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCount {
    pub field: String,
    pub non_empty: u64,
}

/// Occurrences of one tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Statistics for one record kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub kind: String,
    pub generated_at: DateTime<Utc>,
    pub total_records: u64,
    /// In column order
    pub fields: Vec<FieldCount>,
    /// Most frequent first, ties in discovery order
    pub top_tags: Vec<TagCount>,
}

impl RunStatistics {
    /// Non-empty count for a field, if the field exists
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields
            .iter()
            .find(|f| f.field == name)
            .map(|f| f.non_empty)
    }
}

/// Computes [`RunStatistics`] from a [`RecordIndex`]
pub struct StatisticsAggregator<'a> {
    index: &'a dyn RecordIndex,
}

impl<'a> StatisticsAggregator<'a> {
    pub fn new(index: &'a dyn RecordIndex) -> Self {
        Self { index }
    }

    /// Scans the index for one kind
    ///
    /// # Arguments
    ///
    /// * `kind` - Record kind, i.e. the index table name
    /// * `top_n` - Maximum length of the tag list
    ///
    /// # Returns
    ///
    /// * `Ok(RunStatistics)` - All zero when nothing of this kind was saved yet
    /// * `Err(StorageError)` - Failed to query the index
    pub fn aggregate(&self, kind: &str, top_n: usize) -> Result<RunStatistics, StorageError> {
        let generated_at = Utc::now();

        if !self.index.has_kind(kind)? {
            return Ok(RunStatistics {
                kind: kind.to_string(),
                generated_at,
                total_records: 0,
                fields: Vec::new(),
                top_tags: Vec::new(),
            });
        }

        let total_records = self.index.count_records(kind)?;

        let fields = self
            .index
            .field_columns(kind)?
            .into_iter()
            .map(|field| {
                let non_empty = self.index.count_non_empty(kind, &field)?;
                Ok(FieldCount { field, non_empty })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let top_tags = if top_n == 0 {
            Vec::new()
        } else {
            self.index
                .tag_frequencies(kind, top_n)?
                .into_iter()
                .map(|(tag, count)| TagCount { tag, count })
                .collect()
        };

        Ok(RunStatistics {
            kind: kind.to_string(),
            generated_at,
            total_records,
            fields,
            top_tags,
        })
    }
}

/// Path of the statistics file for a kind
pub fn statistics_path(export_root: &Path, kind: &str) -> PathBuf {
    export_root.join(format!("statistics_{}.json", kind))
}

/// Writes `statistics_<kind>.json` at the export root
pub fn write_statistics(stats: &RunStatistics, export_root: &Path) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(export_root)?;
    let path = statistics_path(export_root, &stats.kind);
    std::fs::write(&path, serde_json::to_string_pretty(stats)?)?;
    tracing::info!("Wrote statistics to {}", path.display());
    Ok(path)
}

/// Loads a previously written statistics file
pub fn load_statistics(export_root: &Path, kind: &str) -> Result<RunStatistics, StorageError> {
    let contents = std::fs::read_to_string(statistics_path(export_root, kind))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Statistics: {} ===\n", stats.kind);

    println!("Overview:");
    println!("  Total records: {}", stats.total_records);
    println!();

    if !stats.fields.is_empty() {
        println!("Fields populated:");
        for field in &stats.fields {
            let percentage = if stats.total_records > 0 {
                (field.non_empty as f64 / stats.total_records as f64) * 100.0
            } else {
                0.0
            };
            println!("  {}: {} ({:.1}%)", field.field, field.non_empty, percentage);
        }
        println!();
    }

    if !stats.top_tags.is_empty() {
        println!("Top Tags ({}):", stats.top_tags.len());
        for (rank, tag) in stats.top_tags.iter().enumerate() {
            println!("  {:>2}. {} ({})", rank + 1, tag.tag, tag.count);
        }
        println!();
    }
}
