//! Walk-forward validation: rolling train/test windows over calendar months.
//!
//! Window `i` trains on `[t_i, t_i + train)` and tests on
//! `[t_i + train, t_i + train + test)`, with `t_{i+1} = t_i + test`, so the
//! test periods tile the range without gaps or overlap. Every slice gets its own
//! replay (and replay dedup store) and its own position manager; windows run in
//! parallel.

use std::collections::BTreeMap;

use chrono::{DateTime, Months, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use vcpscan_core::domain::{Candle, LiquidityBucket, Timeframe};

use crate::backtest::{simulate, BacktestConfig, SimulationError, SimulationInput};
use crate::metrics::BacktestMetrics;
use crate::replay::{ReplayError, ReplayInput, SignalReplay};

/// Degradation is undefined when the in-sample value is this close to zero.
const DEGRADATION_EPSILON: f64 = 1e-9;

// ─── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    /// In-sample length in months (default 6).
    pub train_months: u32,
    /// Out-of-sample length in months, also the step (default 2).
    pub test_months: u32,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_months: 6,
            test_months: 2,
        }
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// Calendar boundaries of one window. All ranges are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    pub train_end: DateTime<Utc>,
    pub test_start: DateTime<Utc>,
    pub test_end: DateTime<Utc>,
}

/// The slice of `BacktestMetrics` compared between IS and OOS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub trades: usize,
    pub signals: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub total_pnl_net: f64,
    pub max_drawdown_pct: f64,
}

impl WindowMetrics {
    fn from_metrics(m: &BacktestMetrics, signals: usize) -> Self {
        Self {
            trades: m.trade_count,
            signals,
            win_rate: m.win_rate,
            profit_factor: m.profit_factor,
            sharpe: m.sharpe,
            total_pnl_net: m.total_pnl_net,
            max_drawdown_pct: m.max_drawdown_pct,
        }
    }
}

/// One evaluated window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub spec: WindowSpec,
    pub in_sample: WindowMetrics,
    pub out_of_sample: WindowMetrics,
    /// (IS - OOS) / |IS|; `None` when IS is zero.
    pub sharpe_degradation: Option<f64>,
    pub win_rate_degradation: Option<f64>,
    pub profit_factor_degradation: Option<f64>,
}

impl WalkForwardWindow {
    pub fn new(spec: WindowSpec, in_sample: WindowMetrics, out_of_sample: WindowMetrics) -> Self {
        Self {
            spec,
            sharpe_degradation: degradation(in_sample.sharpe, out_of_sample.sharpe),
            win_rate_degradation: degradation(in_sample.win_rate, out_of_sample.win_rate),
            profit_factor_degradation: degradation(
                in_sample.profit_factor,
                out_of_sample.profit_factor,
            ),
            in_sample,
            out_of_sample,
        }
    }
}

/// Complete result of walk-forward validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub timeframe: Timeframe,
    pub config: WalkForwardConfig,
    pub windows: Vec<WalkForwardWindow>,
    pub oos_trades: usize,
    /// OOS averages weighted by each window's trade count.
    pub avg_oos_win_rate: f64,
    pub avg_oos_profit_factor: f64,
    pub avg_oos_sharpe: f64,
    pub total_oos_pnl_net: f64,
    /// Mean of the defined per-window Sharpe degradations.
    pub mean_sharpe_degradation: Option<f64>,
    /// Percent of windows with positive OOS net PnL.
    pub consistency_score: f64,
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("train_months and test_months must be > 0 (got {train_months}/{test_months})")]
    InvalidConfig { train_months: u32, test_months: u32 },

    #[error("range {start} .. {end} does not fit one {train_months}+{test_months} month window")]
    NoWindows {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        train_months: u32,
        test_months: u32,
    },

    #[error("replay failed on window {window}: {source}")]
    Replay {
        window: usize,
        #[source]
        source: ReplayError,
    },

    #[error("simulation failed on window {window}: {source}")]
    Simulation {
        window: usize,
        #[source]
        source: SimulationError,
    },
}

// ─── Window creation ─────────────────────────────────────────────────

/// Roll `train + test` windows through `[start, end]`, stepping by `test_months`,
/// until a test period would end after `end`.
pub fn create_windows(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    config: &WalkForwardConfig,
) -> Result<Vec<WindowSpec>, WalkForwardError> {
    if config.train_months == 0 || config.test_months == 0 {
        return Err(WalkForwardError::InvalidConfig {
            train_months: config.train_months,
            test_months: config.test_months,
        });
    }
    let train = Months::new(config.train_months);
    let test = Months::new(config.test_months);

    let mut windows = Vec::new();
    let mut t = start;
    loop {
        let Some(train_end) = t.checked_add_months(train) else {
            break;
        };
        let Some(test_end) = train_end.checked_add_months(test) else {
            break;
        };
        if test_end > end {
            break;
        }
        windows.push(WindowSpec {
            index: windows.len(),
            train_start: t,
            train_end,
            test_start: train_end,
            test_end,
        });
        match t.checked_add_months(test) {
            Some(next) => t = next,
            None => break,
        }
    }

    if windows.is_empty() {
        return Err(WalkForwardError::NoWindows {
            start,
            end,
            train_months: config.train_months,
            test_months: config.test_months,
        });
    }
    Ok(windows)
}

// ─── Orchestration ───────────────────────────────────────────────────

/// Historical data shared by every window.
#[derive(Debug, Clone, Copy)]
pub struct WalkForwardInput<'a> {
    pub candles: &'a BTreeMap<String, Vec<Candle>>,
    pub benchmark: &'a [Candle],
    pub liquidity: &'a BTreeMap<String, LiquidityBucket>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Replay + simulate every window's train and test slices and aggregate.
pub fn run_walk_forward(
    replay: &SignalReplay,
    backtest: &BacktestConfig,
    input: &WalkForwardInput<'_>,
    config: &WalkForwardConfig,
) -> Result<WalkForwardResult, WalkForwardError> {
    let specs = create_windows(input.start, input.end, config)?;
    info!(
        windows = specs.len(),
        train_months = config.train_months,
        test_months = config.test_months,
        timeframe = %replay.timeframe(),
        "walk-forward started"
    );

    let windows = specs
        .par_iter()
        .map(|spec| {
            let in_sample = evaluate_slice(
                replay,
                backtest,
                input,
                spec.index,
                spec.train_start,
                spec.train_end,
            )?;
            let out_of_sample = evaluate_slice(
                replay,
                backtest,
                input,
                spec.index,
                spec.test_start,
                spec.test_end,
            )?;
            debug!(
                window = spec.index,
                is_sharpe = in_sample.sharpe,
                oos_sharpe = out_of_sample.sharpe,
                oos_trades = out_of_sample.trades,
                "window evaluated"
            );
            Ok(WalkForwardWindow::new(*spec, in_sample, out_of_sample))
        })
        .collect::<Result<Vec<_>, WalkForwardError>>()?;

    let result = aggregate(replay.timeframe(), *config, windows);
    info!(
        oos_trades = result.oos_trades,
        avg_oos_sharpe = result.avg_oos_sharpe,
        consistency = result.consistency_score,
        "walk-forward finished"
    );
    Ok(result)
}

fn evaluate_slice(
    replay: &SignalReplay,
    backtest: &BacktestConfig,
    input: &WalkForwardInput<'_>,
    window: usize,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<WindowMetrics, WalkForwardError> {
    let (start_ts, end_ts) = (start.timestamp_millis(), end.timestamp_millis());
    let replayed = replay
        .run(&ReplayInput {
            candles: input.candles,
            benchmark: input.benchmark,
            liquidity: input.liquidity,
            start_ts,
            end_ts,
        })
        .map_err(|source| WalkForwardError::Replay { window, source })?;

    let result = simulate(
        backtest,
        SimulationInput {
            timeframe: replay.timeframe(),
            candles: input.candles,
            signals: &replayed.timeline,
            start_ts,
            end_ts,
        },
    )
    .map_err(|source| WalkForwardError::Simulation { window, source })?;

    Ok(WindowMetrics::from_metrics(
        &result.metrics,
        replayed.timeline.len(),
    ))
}

/// Aggregate evaluated windows.
pub fn aggregate(
    timeframe: Timeframe,
    config: WalkForwardConfig,
    windows: Vec<WalkForwardWindow>,
) -> WalkForwardResult {
    let oos: Vec<&WindowMetrics> = windows.iter().map(|w| &w.out_of_sample).collect();
    let oos_trades: usize = oos.iter().map(|m| m.trades).sum();
    let weighted = |f: fn(&WindowMetrics) -> f64| {
        if oos_trades == 0 {
            return 0.0;
        }
        oos.iter().map(|m| f(m) * m.trades as f64).sum::<f64>() / oos_trades as f64
    };

    let degradations: Vec<f64> = windows.iter().filter_map(|w| w.sharpe_degradation).collect();
    let mean_sharpe_degradation = if degradations.is_empty() {
        None
    } else {
        Some(degradations.iter().sum::<f64>() / degradations.len() as f64)
    };

    let consistency_score = if windows.is_empty() {
        0.0
    } else {
        let positive = oos.iter().filter(|m| m.total_pnl_net > 0.0).count();
        positive as f64 / windows.len() as f64 * 100.0
    };

    WalkForwardResult {
        timeframe,
        config,
        oos_trades,
        avg_oos_win_rate: weighted(|m| m.win_rate),
        avg_oos_profit_factor: weighted(|m| m.profit_factor),
        avg_oos_sharpe: weighted(|m| m.sharpe),
        total_oos_pnl_net: oos.iter().map(|m| m.total_pnl_net).sum(),
        mean_sharpe_degradation,
        consistency_score,
        windows,
    }
}

/// (IS - OOS) / |IS|. Positive means out-of-sample did worse.
pub fn degradation(in_sample: f64, out_of_sample: f64) -> Option<f64> {
    if !in_sample.is_finite() || !out_of_sample.is_finite() || in_sample.abs() < DEGRADATION_EPSILON
    {
        return None;
    }
    Some((in_sample - out_of_sample) / in_sample.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn spec(index: usize) -> WindowSpec {
        WindowSpec {
            index,
            train_start: utc(2023, 1, 1),
            train_end: utc(2023, 7, 1),
            test_start: utc(2023, 7, 1),
            test_end: utc(2023, 9, 1),
        }
    }

    fn metrics(trades: usize, win_rate: f64, sharpe: f64, pnl: f64) -> WindowMetrics {
        WindowMetrics {
            trades,
            signals: trades,
            win_rate,
            profit_factor: 1.5,
            sharpe,
            total_pnl_net: pnl,
            max_drawdown_pct: 5.0,
        }
    }

    // ─── Window creation ─────────────────────────────────────────

    #[test]
    fn one_year_six_plus_two() {
        let windows =
            create_windows(utc(2023, 1, 1), utc(2024, 1, 1), &WalkForwardConfig::default()).unwrap();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].train_end, utc(2023, 7, 1));
        assert_eq!(windows[0].test_end, utc(2023, 9, 1));
        assert_eq!(windows[2].train_start, utc(2023, 5, 1));
        assert_eq!(windows[2].test_end, utc(2024, 1, 1));
    }

    #[test]
    fn test_periods_tile_without_gaps() {
        let windows =
            create_windows(utc(2021, 1, 1), utc(2024, 1, 1), &WalkForwardConfig::default()).unwrap();
        for pair in windows.windows(2) {
            assert_eq!(pair[0].test_end, pair[1].test_start);
            assert_eq!(pair[0].test_start, pair[0].train_end);
        }
    }

    #[test]
    fn range_too_short() {
        let err = create_windows(utc(2023, 1, 1), utc(2023, 6, 1), &WalkForwardConfig::default())
            .unwrap_err();
        assert!(matches!(err, WalkForwardError::NoWindows { .. }));
    }

    #[test]
    fn zero_months_rejected() {
        let config = WalkForwardConfig {
            train_months: 0,
            test_months: 2,
        };
        let err = create_windows(utc(2023, 1, 1), utc(2024, 1, 1), &config).unwrap_err();
        assert!(matches!(err, WalkForwardError::InvalidConfig { .. }));
    }

    #[test]
    fn month_end_start_is_clamped() {
        let config = WalkForwardConfig {
            train_months: 1,
            test_months: 1,
        };
        let windows = create_windows(utc(2023, 1, 31), utc(2023, 6, 1), &config).unwrap();
        assert_eq!(windows[0].train_end, utc(2023, 2, 28));
    }

    // ─── Degradation ─────────────────────────────────────────────

    #[test]
    fn degradation_relative_to_in_sample() {
        assert!((degradation(2.0, 1.0).unwrap() - 0.5).abs() < 1e-12);
        assert!((degradation(-1.0, -2.0).unwrap() - 1.0).abs() < 1e-12);
        assert!(degradation(1.0, 1.5).unwrap() < 0.0);
        assert_eq!(degradation(0.0, 1.0), None);
        assert_eq!(degradation(f64::NAN, 1.0), None);
    }

    // ─── Aggregation ─────────────────────────────────────────────

    #[test]
    fn aggregate_weights_by_oos_trades() {
        let windows = vec![
            WalkForwardWindow::new(spec(0), metrics(10, 60.0, 2.0, 100.0), metrics(3, 50.0, 1.0, 50.0)),
            WalkForwardWindow::new(spec(1), metrics(10, 60.0, 2.0, 100.0), metrics(1, 0.0, -1.0, -20.0)),
        ];

        let result = aggregate(Timeframe::H4, WalkForwardConfig::default(), windows);

        assert_eq!(result.oos_trades, 4);
        assert!((result.avg_oos_win_rate - 37.5).abs() < 1e-12);
        assert!((result.avg_oos_sharpe - 0.5).abs() < 1e-12);
        // degradations 0.5 and 1.5
        assert!((result.mean_sharpe_degradation.unwrap() - 1.0).abs() < 1e-12);
        assert!((result.consistency_score - 50.0).abs() < 1e-12);
        assert!((result.total_oos_pnl_net - 30.0).abs() < 1e-12);
    }

    #[test]
    fn aggregate_without_trades() {
        let windows = vec![WalkForwardWindow::new(
            spec(0),
            metrics(0, 0.0, 0.0, 0.0),
            metrics(0, 0.0, 0.0, 0.0),
        )];
        let result = aggregate(Timeframe::D1, WalkForwardConfig::default(), windows);
        assert_eq!(result.avg_oos_sharpe, 0.0);
        assert_eq!(result.mean_sharpe_degradation, None);
        assert_eq!(result.consistency_score, 0.0);
    }
}
