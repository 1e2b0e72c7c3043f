//! Progress reporting
//!
//! Pipelines call into a [`ProgressObserver`] as they go. Rendering is up to
//! the implementation; the pipelines never format progress themselves.

use std::time::Duration;
use tracing::{debug, info, warn};

use kestrel_core::UpsertOutcome;
use kestrel_net::FetchError;

/// Callbacks invoked by the collector and the scorer
pub trait ProgressObserver {
    /// A page request is about to be issued
    fn on_page_fetched(&mut self, _url: &str) {}

    /// Total size became known; `already_done` items precede this run
    fn on_total(&mut self, _total: u64, _already_done: u64) {}

    /// One item was upserted
    fn on_item(&mut self, _outcome: UpsertOutcome, _inserted: u64, _updated: u64) {}

    /// Rate-limit sleep finished; `total_idle` is cumulative
    fn on_idle(&mut self, _total_idle: Duration) {}

    /// The run is stopping because a page could not be fetched
    fn on_fetch_failed(&mut self, _url: &str, _error: &FetchError) {}

    /// A batch of `batch_len` records was written; `positive` is cumulative
    fn on_batch_scored(&mut self, _batch_len: usize, _positive: u64) {}
}

/// Ignores all progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}

/// Tracks completed/total and reports through `tracing`
#[derive(Debug, Default)]
pub struct LogProgress {
    total: Option<u64>,
    completed: u64,
    every: u64,
}

impl LogProgress {
    /// Log an item-level progress line every `every` items
    pub fn new(every: u64) -> Self {
        Self {
            total: None,
            completed: 0,
            every: every.max(1),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    fn percent(&self) -> Option<f64> {
        self.total
            .filter(|t| *t > 0)
            .map(|t| self.completed as f64 * 100.0 / t as f64)
    }
}

impl ProgressObserver for LogProgress {
    fn on_page_fetched(&mut self, url: &str) {
        debug!("GET {}", url);
    }

    fn on_total(&mut self, total: u64, already_done: u64) {
        self.total = Some(total);
        self.completed = already_done;
        info!("{} records in total, starting at {}", total, already_done);
    }

    fn on_item(&mut self, _outcome: UpsertOutcome, inserted: u64, _updated: u64) {
        self.completed += 1;
        if self.completed % self.every == 0 {
            match (self.total, self.percent()) {
                (Some(total), Some(pct)) => info!(
                    "{}/{} records ({:.1}%), {} new",
                    self.completed, total, pct, inserted
                ),
                _ => info!("{} records, {} new", self.completed, inserted),
            }
        }
    }

    fn on_idle(&mut self, total_idle: Duration) {
        debug!("{:.1}s idle", total_idle.as_secs_f64());
    }

    fn on_fetch_failed(&mut self, url: &str, error: &FetchError) {
        warn!("Stopping at {}: {}", url, error);
    }

    fn on_batch_scored(&mut self, batch_len: usize, positive: u64) {
        self.completed += batch_len as u64;
        match self.total {
            Some(total) => info!("{}/{} records scored ({} positive)", self.completed, total, positive),
            None => info!("{} records scored ({} positive)", self.completed, positive),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_progress_resume_offset() {
        let mut progress = LogProgress::new(10);
        progress.on_total(1000, 200);
        progress.on_item(UpsertOutcome::Inserted, 1, 0);
        progress.on_item(UpsertOutcome::Updated, 1, 1);

        assert_eq!(progress.total(), Some(1000));
        assert_eq!(progress.completed(), 202);
    }

    #[test]
    fn test_log_progress_batches() {
        let mut progress = LogProgress::new(1);
        progress.on_total(5, 0);
        progress.on_batch_scored(3, 2);
        progress.on_batch_scored(2, 2);
        assert_eq!(progress.completed(), 5);
        assert_eq!(progress.percent(), Some(100.0));
    }
}
