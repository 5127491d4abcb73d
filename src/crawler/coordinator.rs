//! Harvest coordinator - main run orchestration logic
//!
//! This module ties the pieces of a run together:
//! - Validating the configuration before anything is opened
//! - Opening the persistence layer and recording the run
//! - Discovering the page count from the first listing page
//! - Driving fetch, extract and save through the scheduler
//! - Aggregating statistics and closing the run

use crate::config::{hash_config, validate, RunConfig};
use crate::crawler::extract::{Extractor, WorkItem};
use crate::crawler::fetcher::Fetch;
use crate::crawler::scheduler::{PolitenessDelay, Scheduler, SchedulerReport};
use crate::output::{write_statistics, RunStatistics, StatisticsAggregator};
use crate::record::{Record, SortKey};
use crate::storage::{PersistenceLayer, RunStatus, RunTotals, StorePaths};
use crate::{HarvestError, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome of a finished run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: i64,
    pub total_pages: u32,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub records_saved: u64,
    pub records_failed: u64,
    pub cancelled: bool,
    /// Document store actually written, differs from the configured one
    /// after a lock fallback
    pub document_store: PathBuf,
    /// `None` when aggregation failed after the pages were processed
    pub statistics: Option<RunStatistics>,
    /// `None` when the statistics file could not be written
    pub statistics_path: Option<PathBuf>,
}

impl RunReport {
    pub fn totals(&self) -> RunTotals {
        RunTotals {
            dispatched: self.dispatched,
            completed: self.completed,
            failed: self.failed,
            records_saved: self.records_saved,
            records_failed: self.records_failed,
        }
    }
}

#[derive(Default)]
struct RecordCounters {
    saved: AtomicU64,
    failed: AtomicU64,
}

/// Runs one harvest for one record kind
pub struct Harvester<F, X> {
    config: RunConfig,
    fetcher: Arc<F>,
    extractor: Arc<X>,
    sort_key: Arc<dyn SortKey>,
}

impl<F, X> Harvester<F, X>
where
    F: Fetch + 'static,
    X: Extractor + 'static,
{
    pub fn new(config: RunConfig, fetcher: F, extractor: X, sort_key: Arc<dyn SortKey>) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            extractor: Arc::new(extractor),
            sort_key,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Runs the harvest until the page range is exhausted or `cancel` fires
    ///
    /// Failures of individual pages or records are counted in the report,
    /// never returned. Errors are reserved for invalid configuration, sinks
    /// that cannot be opened and an undeterminable page count.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunReport> {
        validate(&self.config)?;
        let config_hash = hash_config(&self.config)?;

        let persistence = Arc::new(PersistenceLayer::open(
            &StorePaths::from_config(&self.config.output),
            Arc::clone(&self.sort_key),
        )?);

        let kind = <X::Record as Record>::KIND;
        let run_id = persistence.index().create_run(kind, &config_hash)?;
        tracing::info!("Starting run {} for kind '{}'", run_id, kind);

        match self.execute(&persistence, run_id, cancel).await {
            Ok(mut report) => {
                self.record_statistics(&persistence, &mut report);

                let status = if report.cancelled {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
                if let Err(e) = persistence
                    .index()
                    .finish_run(run_id, status, &report.totals())
                {
                    tracing::error!("Could not record end of run {}: {}", run_id, e);
                }
                if let Err(e) = persistence.close() {
                    tracing::error!("Could not flush the document store: {}", e);
                }
                tracing::info!(
                    "Run {} {}: {} pages completed, {} failed, {} records saved, {} failed",
                    run_id,
                    status.to_db_string(),
                    report.completed,
                    report.failed,
                    report.records_saved,
                    report.records_failed
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Run {} failed: {}", run_id, e);
                if let Err(finish_err) =
                    persistence
                        .index()
                        .finish_run(run_id, RunStatus::Failed, &RunTotals::default())
                {
                    tracing::warn!("Could not record failure of run {}: {}", run_id, finish_err);
                }
                Err(e)
            }
        }
    }

    /// Aggregates the index and writes the statistics file
    ///
    /// Failures are logged and leave the report's statistics empty; the
    /// page and record counts stand either way.
    fn record_statistics(&self, persistence: &PersistenceLayer, report: &mut RunReport) {
        let kind = <X::Record as Record>::KIND;
        let statistics = match StatisticsAggregator::new(persistence.index())
            .aggregate(kind, self.config.output.top_tags)
        {
            Ok(statistics) => statistics,
            Err(e) => {
                tracing::error!("Could not aggregate statistics for '{}': {}", kind, e);
                return;
            }
        };

        match write_statistics(&statistics, persistence.export_root()) {
            Ok(path) => report.statistics_path = Some(path),
            Err(e) => tracing::error!("Could not write statistics for '{}': {}", kind, e),
        }
        report.statistics = Some(statistics);
    }

    async fn execute(
        &self,
        persistence: &Arc<PersistenceLayer>,
        run_id: i64,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let total_pages = self.discover_total_pages().await?;
        let range = self.config.run.page_range(total_pages);
        tracing::info!(
            "Harvesting pages {}..={} of {}",
            range.start(),
            range.end(),
            total_pages
        );

        let template = &self.config.source.url_template;
        let items = range
            .map(|page| WorkItem::from_template(template, page))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let counters = Arc::new(RecordCounters::default());
        let (min, max) = self.config.run.delay_window();
        let scheduler = Scheduler::new(
            self.config.run.concurrency as usize,
            PolitenessDelay::new(min, max),
            cancel,
        );

        let fetcher = Arc::clone(&self.fetcher);
        let extractor = Arc::clone(&self.extractor);
        let sink = Arc::clone(persistence);
        let handler_counters = Arc::clone(&counters);

        let pages: SchedulerReport = scheduler
            .run(items, move |item: WorkItem| {
                let fetcher = Arc::clone(&fetcher);
                let extractor = Arc::clone(&extractor);
                let sink = Arc::clone(&sink);
                let counters = Arc::clone(&handler_counters);
                async move { process_page(&*fetcher, &*extractor, &sink, &counters, item).await }
            })
            .await;

        Ok(RunReport {
            run_id,
            total_pages,
            dispatched: pages.dispatched,
            completed: pages.completed,
            failed: pages.failed,
            records_saved: counters.saved.load(Ordering::SeqCst),
            records_failed: counters.failed.load(Ordering::SeqCst),
            cancelled: pages.cancelled,
            document_store: persistence.documents().path().to_path_buf(),
            statistics: None,
            statistics_path: None,
        })
    }

    /// Reads the page count from the first listing page
    ///
    /// Falls back to `default-total-pages` when the page cannot be fetched or
    /// does not advertise a count.
    async fn discover_total_pages(&self) -> Result<u32> {
        let first = WorkItem::from_template(&self.config.source.url_template, self.config.run.start_page)?;

        let discovered = match self.fetcher.fetch(&first.url).await {
            Ok(body) => self.extractor.total_pages(&body),
            Err(e) => {
                tracing::warn!("Could not fetch {} to discover the page count: {}", first.url, e);
                None
            }
        };

        if let Some(total) = discovered {
            tracing::info!("Source reports {} pages", total);
            return Ok(total);
        }

        match self.config.run.default_total_pages {
            Some(total) => {
                tracing::warn!("Page count not discovered; using default of {} pages", total);
                Ok(total)
            }
            None => Err(HarvestError::PageCountUnavailable(format!(
                "{} did not report a page count and no default-total-pages is configured",
                first.url
            ))),
        }
    }
}

/// Fetch, extract and save one page
async fn process_page<F, X>(
    fetcher: &F,
    extractor: &X,
    persistence: &PersistenceLayer,
    counters: &RecordCounters,
    item: WorkItem,
) -> Result<()>
where
    F: Fetch + ?Sized,
    X: Extractor + ?Sized,
{
    let body = fetcher.fetch(&item.url).await?;

    let records = match extractor.extract(&item, &body) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("{}; treating page as empty", e);
            Vec::new()
        }
    };

    let mut saved = 0u64;
    for record in &records {
        if persistence.save(record) {
            saved += 1;
        }
    }
    let failed = records.len() as u64 - saved;

    counters.saved.fetch_add(saved, Ordering::SeqCst);
    counters.failed.fetch_add(failed, Ordering::SeqCst);
    tracing::debug!(
        "Page {}: {} records saved, {} failed",
        item.page,
        saved,
        failed
    );

    Ok(())
}
