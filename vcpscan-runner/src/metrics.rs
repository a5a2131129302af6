//! Backtest metrics: pure functions over the equity curve and trade list.
//!
//! Ratios are annualized with the timeframe's bars per year (crypto trades
//! around the clock, so a 4h series has 2190 bars a year).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backtest::trade::{ExitReason, Trade};

/// Aggregate metrics for one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub trade_count: usize,
    pub winners: usize,
    pub losers: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Positive percent, e.g. 12.5 for a 12.5% peak-to-trough drop.
    pub max_drawdown_pct: f64,
    pub total_pnl_gross: f64,
    pub total_pnl_net: f64,
    pub total_fees: f64,
    pub total_return_pct: f64,
    /// Mean net PnL per trade.
    pub expectancy: f64,
    pub avg_r: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub avg_bars_held: f64,
    pub max_consecutive_losses: usize,
    pub final_capital: f64,
}

impl BacktestMetrics {
    pub fn compute(
        equity_curve: &[f64],
        trades: &[Trade],
        initial_capital: f64,
        bars_per_year: f64,
    ) -> Self {
        let winners = trades.iter().filter(|t| t.is_winner()).count();
        let total_pnl_net: f64 = trades.iter().map(|t| t.pnl_net).sum();
        let wins: Vec<f64> = trades
            .iter()
            .filter(|t| t.is_winner())
            .map(Trade::return_pct)
            .collect();
        let losses: Vec<f64> = trades
            .iter()
            .filter(|t| !t.is_winner())
            .map(Trade::return_pct)
            .collect();
        Self {
            trade_count: trades.len(),
            winners,
            losers: trades.len() - winners,
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            sharpe: sharpe_ratio(equity_curve, bars_per_year),
            sortino: sortino_ratio(equity_curve, bars_per_year),
            max_drawdown_pct: max_drawdown_pct(equity_curve),
            total_pnl_gross: trades.iter().map(|t| t.pnl_gross).sum(),
            total_pnl_net,
            total_fees: trades.iter().map(|t| t.fees_paid).sum(),
            total_return_pct: if initial_capital > 0.0 {
                total_pnl_net / initial_capital * 100.0
            } else {
                0.0
            },
            expectancy: mean_f64(&trades.iter().map(|t| t.pnl_net).collect::<Vec<_>>()),
            avg_r: mean_f64(&trades.iter().map(|t| t.r_multiple).collect::<Vec<_>>()),
            avg_win_pct: mean_f64(&wins),
            avg_loss_pct: mean_f64(&losses),
            avg_bars_held: mean_f64(
                &trades.iter().map(|t| t.bars_held as f64).collect::<Vec<_>>(),
            ),
            max_consecutive_losses: max_consecutive_losses(trades),
            final_capital: initial_capital + total_pnl_net,
        }
    }
}

/// Trade-level summary for one slice (regime, grade, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakdownStats {
    pub trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub total_pnl_net: f64,
    pub avg_r: f64,
}

impl BreakdownStats {
    pub fn from_trades(trades: &[&Trade]) -> Self {
        let owned: Vec<Trade> = trades.iter().map(|t| (*t).clone()).collect();
        Self {
            trades: owned.len(),
            win_rate: win_rate(&owned),
            profit_factor: profit_factor(&owned),
            total_pnl_net: owned.iter().map(|t| t.pnl_net).sum(),
            avg_r: mean_f64(&owned.iter().map(|t| t.r_multiple).collect::<Vec<_>>()),
        }
    }
}

/// Group trades by `key` and summarize each group.
pub fn breakdown_by<F>(trades: &[Trade], key: F) -> BTreeMap<String, BreakdownStats>
where
    F: Fn(&Trade) -> String,
{
    let mut groups: BTreeMap<String, Vec<&Trade>> = BTreeMap::new();
    for t in trades {
        groups.entry(key(t)).or_default().push(t);
    }
    groups
        .into_iter()
        .map(|(k, ts)| (k, BreakdownStats::from_trades(&ts)))
        .collect()
}

/// Count of trades per exit reason; every reason appears, zero or not.
pub fn exit_reason_counts(trades: &[Trade]) -> BTreeMap<ExitReason, usize> {
    let mut counts: BTreeMap<ExitReason, usize> =
        ExitReason::ALL.iter().map(|r| (*r, 0)).collect();
    for t in trades {
        *counts.entry(t.exit_reason).or_default() += 1;
    }
    counts
}

// ─── Individual metric functions ────────────────────────────────────

pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    trades.iter().filter(|t| t.is_winner()).count() as f64 / trades.len() as f64
}

/// Gross profits / gross losses, capped at 100.0 (all winners).
pub fn profit_factor(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.pnl_net > 0.0)
        .map(|t| t.pnl_net)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl_net < 0.0)
        .map(|t| t.pnl_net.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

/// Annualized Sharpe of per-bar equity returns. 0.0 when undefined.
pub fn sharpe_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let returns = bar_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(&returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / std * bars_per_year.sqrt()
}

/// Annualized Sortino (downside deviation only). 0.0 with no downside.
pub fn sortino_ratio(equity_curve: &[f64], bars_per_year: f64) -> f64 {
    let returns = bar_returns(equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }
    let downside_sq: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside_sq <= 0.0 {
        return 0.0;
    }
    let downside_std = (downside_sq / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(&returns) / downside_std * bars_per_year.sqrt()
}

/// Largest peak-to-trough drop as a positive percent.
pub fn max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &eq in equity_curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            max_dd = max_dd.max((peak - eq) / peak * 100.0);
        }
    }
    max_dd
}

pub fn max_consecutive_losses(trades: &[Trade]) -> usize {
    let mut best = 0;
    let mut current = 0;
    for t in trades {
        if t.is_winner() {
            current = 0;
        } else {
            current += 1;
            best = best.max(current);
        }
    }
    best
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn bar_returns(equity_curve: &[f64]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
