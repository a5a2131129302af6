//! Trade simulator: replays a chronological signal stream through a
//! `PositionManager`, bar by bar.
//!
//! Per bar timestamp: (1) exits for open positions on that bar, (2) entries
//! for signals stamped at that bar, filled at the signal close, (3) one
//! mark-to-market equity point. Anything still open after the last bar is
//! force-closed at its last price.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use vcpscan_core::domain::{Candle, SignalEvent, Timeframe};
use vcpscan_core::ConfigError;

use super::config::{BacktestConfig, EntryRejection};
use super::position::PositionManager;
use super::trade::{ExitReason, Trade};
use crate::metrics::{breakdown_by, exit_reason_counts, BacktestMetrics, BreakdownStats};

/// Current schema version for exported results.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid range: start {start_ts} is not before end {end_ts}")]
    InvalidRange { start_ts: i64, end_ts: i64 },

    #[error("signals are not in chronological order at index {index}")]
    UnsortedSignals { index: usize },
}

/// One point of the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub ts: i64,
    pub equity: f64,
}

/// What the simulator needs: candles per symbol, a chronological signal list
/// and the half-open period `[start_ts, end_ts)` to simulate.
#[derive(Debug, Clone, Copy)]
pub struct SimulationInput<'a> {
    pub timeframe: Timeframe,
    pub candles: &'a BTreeMap<String, Vec<Candle>>,
    pub signals: &'a [SignalEvent],
    pub start_ts: i64,
    pub end_ts: i64,
}

/// Complete result of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub timeframe: Timeframe,
    pub start_ts: i64,
    pub end_ts: i64,
    pub initial_capital: f64,
    pub config: BacktestConfig,
    pub metrics: BacktestMetrics,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    /// Keyed by benchmark regime (`BTC_UP`, ...).
    pub by_regime: BTreeMap<String, BreakdownStats>,
    pub by_grade: BTreeMap<String, BreakdownStats>,
    pub exit_reasons: BTreeMap<ExitReason, usize>,
    pub signals_seen: usize,
    pub signals_taken: usize,
    pub rejections: BTreeMap<EntryRejection, usize>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn force_closed(&self) -> usize {
        self.exit_reasons
            .get(&ExitReason::ForceClosed)
            .copied()
            .unwrap_or(0)
    }
}

/// Run the simulation. Signals must be sorted by `ts`; signals outside the
/// period are ignored.
pub fn simulate(
    config: &BacktestConfig,
    input: SimulationInput<'_>,
) -> Result<BacktestResult, SimulationError> {
    config.validate()?;
    if input.start_ts >= input.end_ts {
        return Err(SimulationError::InvalidRange {
            start_ts: input.start_ts,
            end_ts: input.end_ts,
        });
    }
    if let Some(index) = input
        .signals
        .windows(2)
        .position(|w| w[1].ts < w[0].ts)
    {
        return Err(SimulationError::UnsortedSignals { index: index + 1 });
    }

    let in_range = |ts: i64| ts >= input.start_ts && ts < input.end_ts;

    // Per-symbol ts → candle for the period, plus the global bar clock.
    let mut bars: BTreeMap<&str, BTreeMap<i64, &Candle>> = BTreeMap::new();
    let mut clock: BTreeSet<i64> = BTreeSet::new();
    for (symbol, candles) in input.candles {
        let series = bars.entry(symbol.as_str()).or_default();
        for c in candles.iter().filter(|c| in_range(c.ts)) {
            series.insert(c.ts, c);
            clock.insert(c.ts);
        }
    }

    let signals: Vec<&SignalEvent> = input.signals.iter().filter(|s| in_range(s.ts)).collect();
    let mut next_signal = 0;

    let mut pm = PositionManager::new(config.clone());
    let mut marks: BTreeMap<String, f64> = BTreeMap::new();
    let mut last_bar: BTreeMap<String, Candle> = BTreeMap::new();
    let mut equity_curve = Vec::with_capacity(clock.len() + 1);
    let mut rejections: BTreeMap<EntryRejection, usize> = BTreeMap::new();
    let mut signals_taken = 0;

    for &ts in &clock {
        // 1. exits
        let open: Vec<String> = pm.open_positions().keys().cloned().collect();
        for symbol in open {
            if let Some(bar) = bars.get(symbol.as_str()).and_then(|s| s.get(&ts)) {
                if let Some(trade) = pm.on_bar(&symbol, bar) {
                    debug!(symbol = %trade.symbol, reason = %trade.exit_reason, pnl = trade.pnl_net, "exit");
                }
            }
        }
        for (symbol, series) in &bars {
            if let Some(bar) = series.get(&ts) {
                marks.insert(symbol.to_string(), bar.close);
                last_bar.insert(symbol.to_string(), **bar);
            }
        }

        // 2. entries
        while next_signal < signals.len() && signals[next_signal].ts <= ts {
            let signal = signals[next_signal];
            next_signal += 1;
            let Some(bar) = bars.get(signal.symbol.as_str()).and_then(|s| s.get(&signal.ts)) else {
                *rejections.entry(EntryRejection::NoPriceData).or_default() += 1;
                continue;
            };
            match pm.try_open(signal, bar.close) {
                Ok(()) => signals_taken += 1,
                Err(reason) => *rejections.entry(reason).or_default() += 1,
            }
        }

        // 3. equity
        equity_curve.push(EquityPoint {
            ts,
            equity: pm.equity(&marks),
        });
    }

    // Signals stamped after the last bar never see a price.
    let unfilled = signals.len() - next_signal;
    if unfilled > 0 {
        *rejections.entry(EntryRejection::NoPriceData).or_default() += unfilled;
    }

    pm.force_close_all(&last_bar);
    if let Some(last) = equity_curve.last_mut() {
        last.equity = pm.capital();
    }

    let trades = pm.into_closed_trades();
    let curve: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let metrics = BacktestMetrics::compute(
        &curve,
        &trades,
        config.initial_capital,
        input.timeframe.bars_per_year(),
    );
    info!(
        trades = metrics.trade_count,
        win_rate = metrics.win_rate,
        pnl = metrics.total_pnl_net,
        signals = signals.len(),
        "simulation finished"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        timeframe: input.timeframe,
        start_ts: input.start_ts,
        end_ts: input.end_ts,
        initial_capital: config.initial_capital,
        config: config.clone(),
        by_regime: breakdown_by(&trades, |t| t.market_regime.benchmark.to_string()),
        by_grade: breakdown_by(&trades, |t| t.grade.to_string()),
        exit_reasons: exit_reason_counts(&trades),
        metrics,
        trades,
        equity_curve,
        signals_seen: signals.len(),
        signals_taken,
        rejections,
    })
}
