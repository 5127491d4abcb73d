//! Bounded worker pool over a range of work items
//!
//! This module handles:
//! - Global concurrency limiting via a semaphore
//! - A randomized politeness delay before each item
//! - Catching failures and panics at the item boundary
//! - Cooperative cancellation between dispatches
//!
//! Items are dispatched in the order given, each as soon as a permit frees
//! up. Completion order across workers is not guaranteed.

use crate::crawler::extract::WorkItem;
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// Randomized wait applied before each item, uniform in `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolitenessDelay {
    min: Duration,
    max: Duration,
}

impl PolitenessDelay {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// No delay at all
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn sample(&self) -> Duration {
        if self.min >= self.max {
            return self.min;
        }
        let nanos = rand::rng().random_range(self.min.as_nanos() as u64..self.max.as_nanos() as u64);
        Duration::from_nanos(nanos)
    }
}

/// Counters produced by one scheduler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    /// Whether cancellation stopped dispatch before the items ran out
    pub cancelled: bool,
}

impl SchedulerReport {
    /// Every dispatched item has finished one way or the other
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed == self.dispatched
    }
}

/// The bounded worker pool
#[derive(Debug, Clone)]
pub struct Scheduler {
    concurrency: usize,
    delay: PolitenessDelay,
    cancel: CancellationToken,
}

impl Scheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `concurrency` - Maximum number of items in flight, at least 1
    /// * `delay` - Politeness delay applied before each item
    /// * `cancel` - Signal checked before every dispatch
    pub fn new(concurrency: usize, delay: PolitenessDelay, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            delay,
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `handler` over every item, at most `concurrency` at a time
    ///
    /// Resolves once the items are exhausted or cancellation was observed,
    /// and every dispatched item has finished.
    pub async fn run<I, H, Fut, E>(&self, items: I, handler: H) -> SchedulerReport
    where
        I: IntoIterator<Item = WorkItem>,
        H: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let handler = Arc::new(handler);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers: JoinSet<bool> = JoinSet::new();
        let mut report = SchedulerReport::default();

        for item in items {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Cancelled while the permit was being granted
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            report.dispatched += 1;
            let handler = Arc::clone(&handler);
            let delay = self.delay.sample();
            tracing::debug!("Dispatching page {}", item.page);

            workers.spawn(async move {
                let _permit = permit;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let page = item.page;
                let url = item.url.to_string();
                match handler(item).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("Page {} ({}) failed: {}", page, url, e);
                        false
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(true) => report.completed += 1,
                Ok(false) => report.failed += 1,
                Err(e) => {
                    tracing::warn!("Worker did not finish: {}", e);
                    report.failed += 1;
                }
            }
        }

        if report.cancelled {
            tracing::info!(
                "Cancelled after dispatching {} items; all in-flight items finished",
                report.dispatched
            );
        }

        report
    }

    /// Starts [`Scheduler::run`] in the background
    pub fn spawn<I, H, Fut, E>(self, items: I, handler: H) -> RunHandle
    where
        I: IntoIterator<Item = WorkItem> + Send + 'static,
        I::IntoIter: Send,
        H: Fn(WorkItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move { self.run(items, handler).await });
        RunHandle { cancel, task }
    }
}

/// A scheduler run executing in the background
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<SchedulerReport>,
}

impl RunHandle {
    /// Stops dispatching new items; in-flight items still finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the run to settle
    pub async fn complete(self) -> Result<SchedulerReport, tokio::task::JoinError> {
        self.task.await
    }
}
