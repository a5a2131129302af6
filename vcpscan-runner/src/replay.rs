//! Signal replay: rebuilds the signal timeline a live scanner would have
//! published over a historical period.
//!
//! Each symbol is walked candle by candle. At every candle the detector sees
//! only the trailing `window_bars` candles ending there, so nothing computed at
//! time `t` can depend on a candle after `t`. Symbols replay in parallel.
//!
//! Each symbol publishes into its own in-memory dedup store as it goes, with
//! the event time as the publish clock. Day caps and cooldowns are keyed by
//! symbol, so separate stores decide exactly what one shared store would.
//! Only breakouts that actually published become retest priors.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use vcpscan_core::analysis::analyze_symbol;
use vcpscan_core::config::{ScannerConfig, TimeframeParams};
use vcpscan_core::detect::{benchmark_regime, PriorBreakout, SetupInput, SkipReason};
use vcpscan_core::domain::{
    last_index_at_or_before, BenchmarkRegime, Candle, LiquidityBucket, SignalEvent, SignalType,
    Timeframe,
};
use vcpscan_core::Scorer;

use crate::publish::{PublishError, PublishOutcome, Publisher};
use crate::store::{SignalStore, StoreError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay store: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Historical inputs for one replay run.
#[derive(Debug, Clone, Copy)]
pub struct ReplayInput<'a> {
    pub candles: &'a BTreeMap<String, Vec<Candle>>,
    /// Benchmark candles on the same timeframe; empty means BTC_SIDE throughout.
    pub benchmark: &'a [Candle],
    /// Liquidity bucket per symbol; unknown symbols are bucket `A`.
    pub liquidity: &'a BTreeMap<String, LiquidityBucket>,
    /// Signals are emitted for candles with `start_ts <= ts < end_ts`.
    pub start_ts: i64,
    pub end_ts: i64,
}

/// Replayed timeline plus what was dropped on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Published signals, chronological.
    pub timeline: Vec<SignalEvent>,
    pub bars_evaluated: usize,
    pub setups: usize,
    /// BREAKOUT and RETEST_OK events before gating.
    pub raw_signals: usize,
    pub approaching: usize,
    pub gate_rejected: usize,
    pub duplicates: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
}

impl ReplayResult {
    pub fn count(&self, signal_type: SignalType) -> usize {
        self.timeline
            .iter()
            .filter(|e| e.signal_type() == signal_type)
            .count()
    }
}

/// Per-symbol output of the parallel phase.
#[derive(Debug, Default)]
struct SymbolReplay {
    published: Vec<SignalEvent>,
    bars_evaluated: usize,
    setups: usize,
    raw_signals: usize,
    approaching: usize,
    gate_rejected: usize,
    duplicates: usize,
    skipped: BTreeMap<SkipReason, usize>,
}

/// Replays detection, scoring and publishing for one timeframe.
#[derive(Debug, Clone)]
pub struct SignalReplay {
    exchange: String,
    timeframe: Timeframe,
    params: TimeframeParams,
    scorer: Scorer,
    publisher: Publisher,
    window_bars: usize,
}

impl SignalReplay {
    /// Same exchange, parameters, weights, gate and candle window as a live scan.
    pub fn from_config(config: &ScannerConfig, timeframe: Timeframe) -> Self {
        Self {
            exchange: config.exchange.clone(),
            timeframe,
            params: config.params_for(timeframe),
            scorer: Scorer::new(config.weights.clone()),
            publisher: Publisher::new(config.publish.clone()),
            window_bars: config.candle_limit,
        }
    }

    pub fn with_window_bars(mut self, window_bars: usize) -> Self {
        self.window_bars = window_bars.max(1);
        self
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn run(&self, input: &ReplayInput<'_>) -> Result<ReplayResult, ReplayError> {
        let regimes = self.benchmark_regimes(input.benchmark);

        let per_symbol = input
            .candles
            .par_iter()
            .map(|(symbol, candles)| {
                let liquidity = input
                    .liquidity
                    .get(symbol)
                    .copied()
                    .unwrap_or(LiquidityBucket::A);
                self.replay_symbol(symbol, candles, liquidity, input, &regimes)
            })
            .collect::<Result<Vec<SymbolReplay>, ReplayError>>()?;

        let mut result = ReplayResult::default();
        for symbol in per_symbol {
            result.bars_evaluated += symbol.bars_evaluated;
            result.setups += symbol.setups;
            result.raw_signals += symbol.raw_signals;
            result.approaching += symbol.approaching;
            result.gate_rejected += symbol.gate_rejected;
            result.duplicates += symbol.duplicates;
            for (reason, n) in symbol.skipped {
                *result.skipped.entry(reason).or_default() += n;
            }
            result.timeline.extend(symbol.published);
        }
        result.timeline.sort_by(|a, b| {
            a.ts.cmp(&b.ts)
                .then_with(|| b.score.cmp(&a.score))
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.event_id.cmp(&b.event_id))
        });

        info!(
            timeframe = %self.timeframe,
            symbols = input.candles.len(),
            bars = result.bars_evaluated,
            raw = result.raw_signals,
            published = result.timeline.len(),
            duplicates = result.duplicates,
            gate_rejected = result.gate_rejected,
            "replay finished"
        );
        Ok(result)
    }

    /// Regime as of every benchmark candle, computed from the trailing window.
    fn benchmark_regimes(&self, benchmark: &[Candle]) -> Vec<BenchmarkRegime> {
        (0..benchmark.len())
            .map(|i| benchmark_regime(self.window(benchmark, i)))
            .collect()
    }

    /// Trailing window of at most `window_bars` candles ending at `i`.
    fn window<'c>(&self, candles: &'c [Candle], i: usize) -> &'c [Candle] {
        let start = (i + 1).saturating_sub(self.window_bars);
        &candles[start..=i]
    }

    fn replay_symbol(
        &self,
        symbol: &str,
        candles: &[Candle],
        liquidity: LiquidityBucket,
        input: &ReplayInput<'_>,
        regimes: &[BenchmarkRegime],
    ) -> Result<SymbolReplay, ReplayError> {
        let mut out = SymbolReplay::default();
        let mut store = SignalStore::in_memory()?;
        let mut priors: Vec<PriorBreakout> = Vec::new();
        let retest_horizon =
            self.params.max_bars_after_breakout as i64 * self.timeframe.duration_ms();

        for (i, candle) in candles.iter().enumerate() {
            if candle.ts < input.start_ts || candle.ts >= input.end_ts {
                continue;
            }
            out.bars_evaluated += 1;

            let benchmark = last_index_at_or_before(input.benchmark, candle.ts)
                .and_then(|b| regimes.get(b).copied())
                .unwrap_or(BenchmarkRegime::Side);
            priors.retain(|p| candle.ts - p.ts <= retest_horizon);

            let setup_input = SetupInput {
                symbol,
                timeframe: self.timeframe,
                candles: self.window(candles, i),
                params: &self.params,
                benchmark,
                liquidity,
            };
            let analysis = analyze_symbol(&self.exchange, &setup_input, &priors, &self.scorer);
            match analysis.setup {
                Ok(_) => out.setups += 1,
                Err(reason) => *out.skipped.entry(reason).or_default() += 1,
            }

            let (approaching, signals): (Vec<_>, Vec<_>) = analysis
                .events
                .into_iter()
                .partition(|e| e.signal_type() == SignalType::Approaching);
            out.approaching += approaching.len();
            self.publish_candle(&mut store, signals, &mut priors, &mut out)?;
        }

        debug!(
            symbol,
            timeframe = %self.timeframe,
            bars = out.bars_evaluated,
            raw = out.raw_signals,
            published = out.published.len(),
            "symbol replayed"
        );
        Ok(out)
    }

    /// Publish one candle's signals, highest score first, at their own time.
    /// Published breakouts are appended to `priors`.
    fn publish_candle(
        &self,
        store: &mut SignalStore,
        mut signals: Vec<SignalEvent>,
        priors: &mut Vec<PriorBreakout>,
        out: &mut SymbolReplay,
    ) -> Result<(), ReplayError> {
        signals.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        for event in signals {
            out.raw_signals += 1;
            match self.publisher.publish(store, &event, event.ts)? {
                PublishOutcome::Published { .. } => {
                    priors.extend(PriorBreakout::from_signal(&event));
                    out.published.push(event);
                }
                PublishOutcome::GateRejected(_) => out.gate_rejected += 1,
                PublishOutcome::Duplicate(_) => out.duplicates += 1,
            }
        }
        Ok(())
    }
}
