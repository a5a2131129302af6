//! Live scan pipeline.
//!
//! universe → benchmark regime per timeframe → fetch pool (bounded workers,
//! bounded channel) → per-symbol analysis on the consuming thread → publish.
//!
//! A bad symbol only costs that symbol. The one fatal path is a store write that
//! keeps failing: publishing stops for the rest of the run and the error is
//! returned once the fetch pool has drained.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use vcpscan_core::config::ScannerConfig;
use vcpscan_core::data::{CandleSource, DataError, FetchJob, FetchPool, Universe};
use vcpscan_core::detect::{benchmark_regime, PriorBreakout, SetupInput, SkipReason};
use vcpscan_core::domain::{BenchmarkRegime, SignalEvent, SignalType, Timeframe};
use vcpscan_core::{analyze_symbol, ConfigError, Scorer};

use crate::publish::{PublishError, PublishOutcome, Publisher};
use crate::store::{SignalStore, StoreError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("universe unavailable: {0}")]
    Universe(#[source] DataError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PublishError),

    #[error("store read failed: {0}")]
    Store(#[from] StoreError),
}

/// One row of the report's top-N list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopSignal {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal_type: SignalType,
    pub score: u8,
    /// Legacy `BTC_UP|A` form.
    pub market_regime: String,
    pub pivot: f64,
    pub close: f64,
    pub published: bool,
    pub summary: String,
}

impl TopSignal {
    fn from_event(event: &SignalEvent, published: bool) -> Self {
        Self {
            symbol: event.symbol.clone(),
            timeframe: event.timeframe,
            signal_type: event.signal_type(),
            score: event.score,
            market_regime: event.setup.regime.to_string(),
            pivot: event.pivot(),
            close: event.close,
            published,
            summary: event.summary(),
        }
    }
}

/// Scanner output contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub exchange: String,
    pub as_of_ms: i64,
    pub universe_size: usize,
    pub benchmark: BTreeMap<Timeframe, BenchmarkRegime>,
    pub fetch_failed: usize,
    pub setups: BTreeMap<Timeframe, usize>,
    /// Publishable signals (BREAKOUT + RETEST_OK) before gating.
    pub signals: BTreeMap<Timeframe, usize>,
    pub approaching: usize,
    pub published: usize,
    pub gate_rejected: usize,
    pub duplicates: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    pub top: Vec<TopSignal>,
}

/// Explicit scan context: configuration, candle source and scorer.
pub struct Scanner {
    config: ScannerConfig,
    source: Arc<dyn CandleSource>,
    scorer: Scorer,
    publisher: Publisher,
}

impl Scanner {
    pub fn new(config: ScannerConfig, source: Arc<dyn CandleSource>) -> Result<Self, ScanError> {
        config.validate()?;
        let scorer = Scorer::new(config.weights.clone());
        let publisher = Publisher::new(config.publish.clone());
        Ok(Self {
            config,
            source,
            scorer,
            publisher,
        })
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Build the universe from 24h tickers.
    pub fn universe(&self) -> Result<Universe, ScanError> {
        let tickers = self.source.tickers().map_err(ScanError::Universe)?;
        Ok(Universe::from_tickers(
            &tickers,
            &self.config.quote_asset,
            &self.config.universe,
        ))
    }

    fn pool(&self, now_ms: i64) -> FetchPool {
        FetchPool::new(
            Arc::clone(&self.source),
            self.config.effective_concurrency(),
            self.config.candle_limit,
        )
        .with_channel_capacity(self.config.channel_capacity)
        .with_now(now_ms)
    }

    /// Benchmark regime per configured timeframe. Missing data is SIDE.
    pub fn benchmark_regimes(&self, pool: &FetchPool) -> BTreeMap<Timeframe, BenchmarkRegime> {
        self.config
            .timeframes
            .iter()
            .map(|&tf| {
                let job = FetchJob::new(self.config.benchmark_symbol.clone(), tf);
                let regime = match pool.fetch_one(&job) {
                    Ok(candles) => benchmark_regime(&candles),
                    Err(e) => {
                        warn!(symbol = %job.symbol, timeframe = %tf, error = %e, "benchmark unavailable, assuming SIDE");
                        BenchmarkRegime::Side
                    }
                };
                (tf, regime)
            })
            .collect()
    }

    /// Run one full scan cycle against `store`.
    pub fn run(&self, store: &mut SignalStore, now_ms: i64) -> Result<ScanReport, ScanError> {
        let universe = self.universe()?;
        let pool = self.pool(now_ms);
        let benchmark = self.benchmark_regimes(&pool);
        info!(
            exchange = %self.config.exchange,
            universe = universe.len(),
            ?benchmark,
            "scan started"
        );

        let jobs: Vec<FetchJob> = universe
            .members
            .iter()
            .flat_map(|m| {
                self.config
                    .timeframes
                    .iter()
                    .map(move |&tf| FetchJob::new(m.symbol.clone(), tf))
            })
            .collect();

        let params: BTreeMap<Timeframe, _> = self
            .config
            .timeframes
            .iter()
            .map(|&tf| (tf, self.config.params_for(tf)))
            .collect();

        let mut report = ScanReport {
            exchange: self.config.exchange.clone(),
            as_of_ms: now_ms,
            universe_size: universe.len(),
            benchmark: benchmark.clone(),
            ..ScanReport::default()
        };
        let mut ranked: Vec<(SignalEvent, bool)> = Vec::new();
        let mut fatal: Option<ScanError> = None;

        let stats = pool.run(jobs, |outcome| {
            let Ok(candles) = outcome.result else {
                return;
            };
            let tf = outcome.job.timeframe;
            let symbol = outcome.job.symbol.as_str();
            let Some(tf_params) = params.get(&tf) else {
                return;
            };

            let priors = if fatal.is_none() {
                let since = now_ms - tf_params.max_bars_after_breakout as i64 * tf.duration_ms();
                match store.recent_breakouts(&self.config.exchange, symbol, tf, since) {
                    Ok(events) => events.iter().filter_map(PriorBreakout::from_signal).collect(),
                    Err(e) => {
                        warn!(symbol, timeframe = %tf, error = %e, "prior breakout lookup failed");
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            let input = SetupInput {
                symbol,
                timeframe: tf,
                candles: &candles,
                params: tf_params,
                benchmark: benchmark.get(&tf).copied().unwrap_or(BenchmarkRegime::Side),
                liquidity: universe.bucket_of(symbol),
            };
            let analysis = analyze_symbol(&self.config.exchange, &input, &priors, &self.scorer);
            match &analysis.setup {
                Ok(_) => *report.setups.entry(tf).or_default() += 1,
                Err(reason) => *report.skipped.entry(*reason).or_default() += 1,
            }

            for event in analysis.events {
                if !event.signal_type().is_publishable() {
                    report.approaching += 1;
                    debug!(symbol, timeframe = %tf, score = event.score, "approaching pivot");
                    continue;
                }
                *report.signals.entry(tf).or_default() += 1;
                if fatal.is_some() {
                    ranked.push((event, false));
                    continue;
                }
                match self.publisher.publish(store, &event, now_ms) {
                    Ok(PublishOutcome::Published { .. }) => {
                        report.published += 1;
                        ranked.push((event, true));
                    }
                    Ok(PublishOutcome::GateRejected(_)) => {
                        report.gate_rejected += 1;
                        ranked.push((event, false));
                    }
                    Ok(PublishOutcome::Duplicate(_)) => {
                        report.duplicates += 1;
                        ranked.push((event, false));
                    }
                    Err(e) => {
                        warn!(symbol, error = %e, "publishing aborted");
                        fatal = Some(e.into());
                        ranked.push((event, false));
                    }
                }
            }
        });
        report.fetch_failed = stats.failed;

        if let Some(e) = fatal {
            return Err(e);
        }

        ranked.sort_by(|(a, _), (b, _)| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.timeframe.cmp(&b.timeframe))
        });
        report.top = ranked
            .iter()
            .take(self.config.report_top_n)
            .map(|(event, published)| TopSignal::from_event(event, *published))
            .collect();

        info!(
            setups = report.setups.values().sum::<usize>(),
            signals = report.signals.values().sum::<usize>(),
            published = report.published,
            duplicates = report.duplicates,
            gate_rejected = report.gate_rejected,
            fetch_failed = report.fetch_failed,
            "scan finished"
        );
        Ok(report)
    }
}
