//! Collector
//!
//! Walks a source's paginated listing and upserts every item into the store.
//! - One request per second at most
//! - Transport failures end the run; committed pages stay committed
//! - Re-running over already seen pages only refreshes payloads

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use kestrel_core::{external_id_of, Endpoint, Source, UpsertOutcome};
use kestrel_net::{FetchError, PageSource};
use kestrel_store::RecordStore;

use crate::{PipelineError, ProgressObserver};

/// Collector configuration
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Minimum time between the starts of two requests
    pub min_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
        }
    }
}

/// Per-run options
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectOptions {
    /// Page number to start from (1-based)
    pub resume_page: Option<u32>,
    /// Stop after this many items
    pub limit: Option<u64>,
}

/// Outcome of a collection run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectReport {
    pub inserted: u64,
    pub updated: u64,
    /// Time spent sleeping to respect the rate limit
    pub idle_seconds: f64,
    /// Pages fetched and fully processed
    pub pages: u32,
    /// Number of the last fully processed page
    pub last_page: Option<u32>,
    /// Why the run stopped before the end of the listing, if it did
    pub stopped: Option<String>,
}

impl CollectReport {
    pub fn processed(&self) -> u64 {
        self.inserted + self.updated
    }

    /// Page to pass as `resume_page` to continue after an early stop
    pub fn resume_hint(&self, options: &CollectOptions) -> u32 {
        self.last_page
            .map(|p| p + 1)
            .unwrap_or_else(|| options.resume_page.unwrap_or(1))
    }
}

/// Harvests one source into the store
pub struct Collector<'a> {
    store: &'a dyn RecordStore,
    pages: &'a dyn PageSource,
    config: CollectorConfig,
}

impl<'a> Collector<'a> {
    pub fn new(store: &'a dyn RecordStore, pages: &'a dyn PageSource, config: CollectorConfig) -> Self {
        Self {
            store,
            pages,
            config,
        }
    }

    /// Collect `source` from its registered endpoint
    pub async fn collect(
        &self,
        source: Source,
        options: CollectOptions,
        progress: &mut dyn ProgressObserver,
    ) -> Result<CollectReport, PipelineError> {
        self.collect_from(source, &source.endpoint(), options, progress)
            .await
    }

    /// Collect `source` from an explicit endpoint
    pub async fn collect_from(
        &self,
        source: Source,
        endpoint: &Endpoint,
        options: CollectOptions,
        progress: &mut dyn ProgressObserver,
    ) -> Result<CollectReport, PipelineError> {
        if options.resume_page == Some(0) {
            return Err(PipelineError::InvalidOptions(
                "resume page numbers start at 1".to_string(),
            ));
        }

        let mut report = CollectReport::default();
        if options.limit == Some(0) {
            return Ok(report);
        }

        let mut idle = Duration::ZERO;
        let mut page_number = options.resume_page.unwrap_or(1);
        let mut next_url = Some(endpoint.start_url(options.resume_page));

        info!("Collecting {} from {}", source, endpoint.base_url);

        while let Some(url) = next_url.take() {
            progress.on_page_fetched(&url);
            let started = Instant::now();

            let page = match self.pages.fetch(&url).await {
                Ok(page) => page,
                Err(e) if e.is_transport() => {
                    progress.on_fetch_failed(&url, &e);
                    report.stopped = Some(e.to_string());
                    break;
                }
                Err(FetchError::Malformed { url, reason }) => {
                    return Err(PipelineError::MalformedPage(format!("{}: {}", url, reason)));
                }
                Err(e) => return Err(e.into()),
            };

            if report.pages == 0 {
                progress.on_total(page.count, endpoint.resume_offset(options.resume_page));
            }

            let mut handled = 0;
            let mut limit_reached = false;
            for item in &page.results {
                let external_id = external_id_of(item).ok_or_else(|| {
                    PipelineError::MalformedPage(format!("{}: item without a usable id", url))
                })?;

                let (_, created) = self.store.upsert(source, &external_id, item)?;
                let outcome = UpsertOutcome::from_created(created);
                match outcome {
                    UpsertOutcome::Inserted => report.inserted += 1,
                    UpsertOutcome::Updated => report.updated += 1,
                }
                progress.on_item(outcome, report.inserted, report.updated);
                handled += 1;

                if options.limit.is_some_and(|limit| report.processed() >= limit) {
                    limit_reached = true;
                    break;
                }
            }

            if handled == page.results.len() {
                report.pages += 1;
                report.last_page = Some(page_number);
                debug!(
                    "Page {} done: {} items, {} new so far",
                    page_number,
                    handled,
                    report.inserted
                );
                page_number += 1;
            }

            if limit_reached {
                debug!("Reached limit of {} items", report.processed());
                break;
            }

            next_url = page.next.filter(|next| !next.is_empty());
            if next_url.is_none() {
                break;
            }

            let wait = self.config.min_interval.saturating_sub(started.elapsed());
            if !wait.is_zero() {
                sleep(wait).await;
                idle += wait;
                progress.on_idle(idle);
            }
        }

        report.idle_seconds = idle.as_secs_f64();

        info!(
            "{} new and {} updated records from {} (slept {:.1}s)",
            report.inserted, report.updated, source, report.idle_seconds
        );
        Ok(report)
    }
}
