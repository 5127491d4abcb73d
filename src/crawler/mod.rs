//! Crawler module for page fetching and processing
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with retry and backoff
//! - The record extraction seam
//! - Bounded-concurrency scheduling with politeness delays
//! - Overall run coordination

mod coordinator;
mod extract;
mod fetcher;
mod scheduler;

pub use coordinator::{Harvester, RunReport};
pub use extract::{Extractor, JsonPageExtractor, WorkItem, PAGE_PLACEHOLDER};
pub use fetcher::{build_http_client, Fetch, HttpFetcher, RetryPolicy};
pub use scheduler::{PolitenessDelay, RunHandle, Scheduler, SchedulerReport};

use crate::config::RunConfig;
use crate::record::{FirstLetter, Record};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs a complete harvest of `R` records from a JSON listing source
///
/// This is the main entry point used by the CLI. It will:
/// 1. Build the HTTP client from the configuration
/// 2. Open the three sinks
/// 3. Schedule and fetch every listing page
/// 4. Save each extracted record
/// 5. Write the statistics file
///
/// # Arguments
///
/// * `config` - The run configuration
/// * `cancel` - Stops dispatching new pages when triggered
///
/// # Returns
///
/// * `Ok(RunReport)` - Run finished or was cancelled
/// * `Err(HarvestError)` - Run could not start
pub async fn harvest<R: Record>(config: RunConfig, cancel: CancellationToken) -> crate::Result<RunReport> {
    let fetcher = HttpFetcher::from_config(&config.source, &config.fetch)?;
    let harvester = Harvester::new(
        config,
        fetcher,
        JsonPageExtractor::<R>::new(),
        Arc::new(FirstLetter),
    );
    harvester.run(cancel).await
}
