//! Bounded-parallelism candle fetch pool.
//!
//! A fixed number of worker threads pull (symbol, timeframe) jobs from a shared
//! queue and push results into a bounded channel. The calling thread consumes
//! results as they arrive, so detection overlaps with fetching and a slow
//! consumer applies backpressure to the workers. A failed fetch becomes an
//! `Err` outcome for that job only.

use std::collections::VecDeque;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::provider::{CandleSource, DataError};
use super::validate::{drop_unclosed, validate_series};
use crate::domain::{Candle, Timeframe};

/// One unit of fetch work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchJob {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl FetchJob {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

/// Result of one job.
#[derive(Debug)]
pub struct FetchOutcome {
    pub job: FetchJob,
    pub result: Result<Vec<Candle>, DataError>,
}

/// Summary counts for a pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Fetch pool configuration plus the shared source.
pub struct FetchPool {
    source: Arc<dyn CandleSource>,
    concurrency: usize,
    channel_capacity: usize,
    limit: usize,
    /// When set, in-progress candles (not closed by this time) are dropped.
    now_ms: Option<i64>,
}

impl FetchPool {
    pub fn new(source: Arc<dyn CandleSource>, concurrency: usize, limit: usize) -> Self {
        Self {
            source,
            concurrency: concurrency.max(1),
            channel_capacity: concurrency.max(1) * 2,
            limit,
            now_ms: None,
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn with_now(mut self, now_ms: i64) -> Self {
        self.now_ms = Some(now_ms);
        self
    }

    /// Fetch, trim and validate a single series.
    pub fn fetch_one(&self, job: &FetchJob) -> Result<Vec<Candle>, DataError> {
        let mut candles = self
            .source
            .fetch_candles(&job.symbol, job.timeframe, self.limit)?;
        if let Some(now) = self.now_ms {
            drop_unclosed(&mut candles, job.timeframe.duration_ms(), now);
        }
        validate_series(&candles)?;
        Ok(candles)
    }

    /// Run every job, handing each outcome to `consume` on the calling thread.
    pub fn run<F>(&self, jobs: Vec<FetchJob>, mut consume: F) -> FetchStats
    where
        F: FnMut(FetchOutcome),
    {
        let mut stats = FetchStats {
            requested: jobs.len(),
            ..FetchStats::default()
        };
        if jobs.is_empty() {
            return stats;
        }

        let workers = self.concurrency.min(jobs.len());
        let queue = Mutex::new(jobs.into_iter().collect::<VecDeque<_>>());
        let (tx, rx) = sync_channel::<FetchOutcome>(self.channel_capacity);

        std::thread::scope(|scope| {
            for worker_id in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .pop_front();
                    let Some(job) = next else {
                        break;
                    };
                    let result = self.fetch_one(&job);
                    if let Err(e) = &result {
                        warn!(worker_id, symbol = %job.symbol, timeframe = %job.timeframe, error = %e, "fetch failed");
                    }
                    if tx.send(FetchOutcome { job, result }).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            for outcome in rx {
                match &outcome.result {
                    Ok(candles) => {
                        stats.succeeded += 1;
                        debug!(symbol = %outcome.job.symbol, timeframe = %outcome.job.timeframe, candles = candles.len(), "fetched");
                    }
                    Err(_) => stats.failed += 1,
                }
                consume(outcome);
            }
        });

        stats
    }
}
