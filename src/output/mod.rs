//! Output module for run summaries and statistics
//!
//! This module handles:
//! - Aggregating statistics from the relational index
//! - Writing the statistics file at the export root
//! - Printing run summaries for the CLI

pub mod stats;

pub use stats::{
    load_statistics, print_statistics, statistics_path, write_statistics, FieldCount,
    RunStatistics, StatisticsAggregator, TagCount, DEFAULT_TOP_TAGS,
};

use crate::storage::RunRecord;
use chrono::{DateTime, Utc};

/// Wall-clock duration of a finished run in seconds
pub fn run_duration_seconds(run: &RunRecord) -> Option<u64> {
    let started = run.started_at.parse::<DateTime<Utc>>().ok()?;
    let finished = run.finished_at.as_ref()?.parse::<DateTime<Utc>>().ok()?;
    u64::try_from((finished - started).num_seconds()).ok()
}

/// Prints a stored run to stdout
pub fn print_run_summary(run: &RunRecord) {
    println!("=== Run #{} ({}) ===\n", run.id, run.kind);
    println!("  Status: {}", run.status.to_db_string());
    println!("  Started: {}", run.started_at);
    if let Some(finished) = &run.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(seconds) = run_duration_seconds(run) {
        println!("  Duration: {}s", seconds);
    }
    println!("  Config hash: {}", run.config_hash);
    println!(
        "  Pages: {} dispatched, {} completed, {} failed",
        run.totals.dispatched, run.totals.completed, run.totals.failed
    );
    println!(
        "  Records: {} saved, {} failed",
        run.totals.records_saved, run.totals.records_failed
    );
    println!();
}
