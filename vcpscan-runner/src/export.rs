//! Reporting and export: JSON, CSV, and Markdown artifacts.
//!
//! - **JSON**: full `BacktestResult` / `WalkForwardResult` with schema versioning
//! - **CSV**: trade tape and equity curve
//! - **Flat summary**: one record per run for downstream dashboards
//! - **Markdown**: human-readable single-run report
//!
//! Unknown (newer) schema versions are rejected on load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use vcpscan_core::domain::ms_to_datetime;

use crate::backtest::{BacktestResult, EquityPoint, Trade};
use crate::backtest::simulator::SCHEMA_VERSION;
use crate::walk_forward::WalkForwardResult;

// ─── JSON export ────────────────────────────────────────────────────

/// Serialize a `BacktestResult` to pretty JSON.
pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult` from JSON, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

pub fn export_walk_forward_json(result: &WalkForwardResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize WalkForwardResult to JSON")
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export a trade list as CSV, one row per closed trade.
pub fn export_trades_csv(trades: &[Trade]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "id",
        "symbol",
        "timeframe",
        "entry_type",
        "grade",
        "market_regime",
        "score",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "exit_reason",
        "quantity",
        "stop_loss",
        "take_profit",
        "gross_pnl",
        "fees",
        "net_pnl",
        "r_multiple",
        "mae_pct",
        "mfe_pct",
        "bars_held",
        "signal_event_id",
    ])?;

    for t in trades {
        wtr.write_record([
            &t.id.to_string(),
            &t.symbol,
            t.timeframe.as_str(),
            t.entry_type.as_str(),
            t.grade.as_str(),
            &t.market_regime.to_string(),
            &t.score.to_string(),
            &ms_to_datetime(t.entry_ts).to_rfc3339(),
            &format!("{:.6}", t.entry_price),
            &ms_to_datetime(t.exit_ts).to_rfc3339(),
            &format!("{:.6}", t.exit_price),
            t.exit_reason.as_str(),
            &format!("{:.6}", t.quantity),
            &format!("{:.6}", t.stop_loss),
            &t.take_profit.map(|tp| format!("{tp:.6}")).unwrap_or_default(),
            &format!("{:.2}", t.pnl_gross),
            &format!("{:.2}", t.fees_paid),
            &format!("{:.2}", t.pnl_net),
            &format!("{:.3}", t.r_multiple),
            &format!("{:.2}", t.mae_pct),
            &format!("{:.2}", t.mfe_pct),
            &t.bars_held.to_string(),
            &t.signal_event_id,
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

/// Export an equity curve as CSV with time and equity columns.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["time", "equity"])?;
    for p in equity_curve {
        wtr.write_record([&ms_to_datetime(p.ts).to_rfc3339(), &format!("{:.2}", p.equity)])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Flat summary ───────────────────────────────────────────────────

/// One flat record per backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatSummary {
    pub timeframe: String,
    pub start: String,
    pub end: String,
    pub trades: usize,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub max_drawdown_pct: f64,
    pub total_pnl_net: f64,
    pub total_return_pct: f64,
    pub force_closed: usize,
    /// Net PnL per benchmark regime.
    pub pnl_by_regime: BTreeMap<String, f64>,
}

impl FlatSummary {
    pub fn from_result(result: &BacktestResult) -> Self {
        let m = &result.metrics;
        Self {
            timeframe: result.timeframe.to_string(),
            start: ms_to_datetime(result.start_ts).to_rfc3339(),
            end: ms_to_datetime(result.end_ts).to_rfc3339(),
            trades: m.trade_count,
            win_rate: m.win_rate,
            profit_factor: m.profit_factor,
            sharpe: m.sharpe,
            max_drawdown_pct: m.max_drawdown_pct,
            total_pnl_net: m.total_pnl_net,
            total_return_pct: m.total_return_pct,
            force_closed: result.force_closed(),
            pnl_by_regime: result
                .by_regime
                .iter()
                .map(|(regime, stats)| (regime.clone(), stats.total_pnl_net))
                .collect(),
        }
    }
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the artifact set for a backtest run.
///
/// Creates `{timeframe}_{start}_{end}/` under `output_dir` containing:
/// - `manifest.json`: the full `BacktestResult`
/// - `summary.json`: the `FlatSummary`
/// - `trades.csv`: trade tape
/// - `equity.csv`: equity curve
///
/// Returns the path to the created directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "{}_{}_{}",
        result.timeframe,
        ms_to_datetime(result.start_ts).format("%Y%m%d"),
        ms_to_datetime(result.end_ts).format("%Y%m%d")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)?;

    let summary = serde_json::to_string_pretty(&FlatSummary::from_result(result))
        .context("failed to serialize summary")?;
    std::fs::write(run_dir.join("summary.json"), summary)?;

    std::fs::write(run_dir.join("trades.csv"), export_trades_csv(&result.trades)?)?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.equity_curve)?,
    )?;

    Ok(run_dir)
}

/// Load a `BacktestResult` from an artifact directory's manifest.json.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate a Markdown report for a single backtest run.
pub fn generate_report(result: &BacktestResult) -> String {
    let mut md = String::with_capacity(2048);
    let m = &result.metrics;

    md.push_str("# Backtest Report\n\n");

    md.push_str("## Run\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Timeframe | {} |\n", result.timeframe));
    md.push_str(&format!(
        "| Period | {} to {} |\n",
        ms_to_datetime(result.start_ts).date_naive(),
        ms_to_datetime(result.end_ts).date_naive()
    ));
    md.push_str(&format!(
        "| Initial Capital | ${:.0} |\n",
        result.initial_capital
    ));
    md.push_str(&format!(
        "| Signals | {} seen, {} taken |\n",
        result.signals_seen, result.signals_taken
    ));
    md.push('\n');

    md.push_str("## Performance Summary\n\n");
    md.push_str("| Metric | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Total Return | {:.2}% |\n", m.total_return_pct));
    md.push_str(&format!("| Net PnL | ${:.2} |\n", m.total_pnl_net));
    md.push_str(&format!("| Fees | ${:.2} |\n", m.total_fees));
    md.push_str(&format!("| Sharpe | {:.3} |\n", m.sharpe));
    md.push_str(&format!("| Sortino | {:.3} |\n", m.sortino));
    md.push_str(&format!("| Max Drawdown | {:.2}% |\n", m.max_drawdown_pct));
    md.push_str(&format!("| Win Rate | {:.1}% |\n", m.win_rate));
    md.push_str(&format!("| Profit Factor | {:.2} |\n", m.profit_factor));
    md.push_str(&format!("| Expectancy | ${:.2} |\n", m.expectancy));
    md.push_str(&format!("| Avg R | {:.2} |\n", m.avg_r));
    md.push_str(&format!("| Trades | {} |\n", m.trade_count));
    md.push_str(&format!(
        "| Max Consecutive Losses | {} |\n",
        m.max_consecutive_losses
    ));
    md.push('\n');

    if !result.by_regime.is_empty() {
        md.push_str("## By Regime\n\n");
        md.push_str("| Regime | Trades | Win Rate | PF | Net PnL |\n");
        md.push_str("| --- | --- | --- | --- | --- |\n");
        for (regime, s) in &result.by_regime {
            md.push_str(&format!(
                "| {} | {} | {:.1}% | {:.2} | ${:.2} |\n",
                regime, s.trades, s.win_rate, s.profit_factor, s.total_pnl_net
            ));
        }
        md.push('\n');
    }

    if !result.exit_reasons.is_empty() {
        md.push_str("## Exits\n\n");
        for (reason, n) in &result.exit_reasons {
            md.push_str(&format!("- {reason}: {n}\n"));
        }
        md.push('\n');
    }

    if !result.rejections.is_empty() {
        md.push_str("## Rejected Signals\n\n");
        for (reason, n) in &result.rejections {
            md.push_str(&format!("- {}: {n}\n", reason.as_str()));
        }
        md.push('\n');
    }

    md
}
