//! vcpscan CLI: scan, backtest and walk-forward commands.
//!
//! Commands:
//! - `scan`: one scan cycle over the exchange universe, published into the sqlite store
//! - `backtest`: replay signals over a date range and simulate trading them
//! - `walk-forward`: rolling train/test validation of the same pipeline
//! - `gate`: print the parameter preset a regime gate color pins

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vcpscan_core::config::ScannerConfig;
use vcpscan_core::data::{BinanceSource, CandleSource, CircuitBreaker, SyntheticSource, Universe};
use vcpscan_core::domain::{Candle, LiquidityBucket, Timeframe};
use vcpscan_runner::export::{export_walk_forward_json, save_artifacts};
use vcpscan_runner::store::SignalStore;
use vcpscan_runner::{
    run_walk_forward, simulate, BacktestConfig, BacktestResult, GateColor, ReplayInput, Scanner,
    SignalReplay, SimulationInput, WalkForwardConfig, WalkForwardInput,
};

const DEFAULT_LOG_FILTER: &str = "vcpscan_core=info,vcpscan_runner=info,vcpscan=info";

#[derive(Parser)]
#[command(name = "vcpscan", about = "vcpscan: VCP breakout scanner and backtester")]
struct Cli {
    /// Log level for the vcpscan crates (overridden by RUST_LOG).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Inputs shared by `backtest` and `walk-forward`.
#[derive(clap::Args)]
struct MarketArgs {
    /// Symbols to test (e.g., SOLUSDT LINKUSDT).
    #[arg(long, required = true, num_args = 1..)]
    symbols: Vec<String>,

    /// Candle timeframe: 1h, 4h or 1d.
    #[arg(long, default_value = "4h")]
    timeframe: Timeframe,

    /// Start date (YYYY-MM-DD), inclusive.
    #[arg(long)]
    start: String,

    /// End date (YYYY-MM-DD), exclusive.
    #[arg(long)]
    end: String,

    /// Scanner config TOML (detection parameters, weights, publish gate).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Backtest config TOML. Mutually exclusive with --preset.
    #[arg(long)]
    backtest_config: Option<PathBuf>,

    /// Named backtest preset: default, conservative or aggressive.
    #[arg(long)]
    preset: Option<String>,

    /// Apply a regime gate color on top of the backtest config.
    #[arg(long)]
    gate: Option<GateColor>,

    /// Use the offline synthetic market instead of the exchange.
    #[arg(long, default_value_t = false)]
    synthetic: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle and print the report as JSON.
    Scan {
        /// Path to a TOML config file. Defaults to built-in settings.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the offline synthetic market instead of the exchange.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// SQLite store path. Overrides `store_path` from the config.
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Replay signals over a date range and simulate trading them.
    Backtest {
        #[command(flatten)]
        market: MarketArgs,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Rolling train/test validation; prints the result as JSON.
    WalkForward {
        #[command(flatten)]
        market: MarketArgs,

        /// Training slice length in months.
        #[arg(long, default_value_t = 6)]
        train_months: u32,

        /// Test slice length (and step) in months.
        #[arg(long, default_value_t = 2)]
        test_months: u32,
    },
    /// Print the parameter preset for a regime gate color.
    Gate {
        /// green, yellow or red.
        color: GateColor,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        Commands::Scan {
            config,
            synthetic,
            store,
        } => run_scan(config.as_deref(), synthetic, store),
        Commands::Backtest { market, output_dir } => run_backtest(&market, &output_dir),
        Commands::WalkForward {
            market,
            train_months,
            test_months,
        } => run_walk_forward_cmd(&market, train_months, test_months),
        Commands::Gate { color } => {
            println!("{}", serde_json::to_string_pretty(&color.preset())?);
            Ok(())
        }
    }
}

fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match log_level {
        Some(level) => EnvFilter::new(format!(
            "vcpscan_core={level},vcpscan_runner={level},vcpscan={level}"
        )),
        None => EnvFilter::new(DEFAULT_LOG_FILTER),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// ─── scan ────────────────────────────────────────────────────────────

fn run_scan(config_path: Option<&Path>, synthetic: bool, store: Option<PathBuf>) -> Result<()> {
    let config = load_scanner_config(config_path)?;
    let now = Utc::now().timestamp_millis();
    let source = make_source(synthetic, now)?;

    let store_path = store.unwrap_or_else(|| PathBuf::from(&config.store_path));
    let mut store = SignalStore::open(&store_path)
        .with_context(|| format!("failed to open signal store: {}", store_path.display()))?;

    let scanner = Scanner::new(config, source)?;
    let report = scanner.run(&mut store, now)?;
    info!(
        published = report.published,
        duplicates = report.duplicates,
        gate_rejected = report.gate_rejected,
        "scan complete"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

// ─── backtest ────────────────────────────────────────────────────────

fn run_backtest(args: &MarketArgs, output_dir: &Path) -> Result<()> {
    let scanner_config = load_scanner_config(args.config.as_deref())?;
    let backtest_config = resolve_backtest_config(args)?;
    let (start, end) = parse_range(&args.start, &args.end)?;
    let (start_ts, end_ts) = (start.timestamp_millis(), end.timestamp_millis());

    let market = load_market(args, &scanner_config, start_ts, end_ts)?;
    let replay = SignalReplay::from_config(&scanner_config, args.timeframe);

    eprintln!(
        "Replaying {} symbol(s) on {} from {} to {}...",
        market.candles.len(),
        args.timeframe,
        args.start,
        args.end
    );
    let replayed = replay.run(&ReplayInput {
        candles: &market.candles,
        benchmark: &market.benchmark,
        liquidity: &market.liquidity,
        start_ts,
        end_ts,
    })?;

    let result = simulate(
        &backtest_config,
        SimulationInput {
            timeframe: args.timeframe,
            candles: &market.candles,
            signals: &replayed.timeline,
            start_ts,
            end_ts,
        },
    )?;

    print_summary(&result);

    let artifact_dir = save_artifacts(&result, output_dir)?;
    println!("\nArtifacts saved to: {}", artifact_dir.display());

    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let m = &result.metrics;
    println!();
    println!("=== Backtest Results ===");
    println!("Timeframe:          {}", result.timeframe);
    println!("Signals seen/taken: {}/{}", result.signals_seen, result.signals_taken);
    println!("Trades:             {}", m.trade_count);
    println!("Win rate:           {:.1}%", m.win_rate * 100.0);
    println!("Profit factor:      {:.2}", m.profit_factor);
    println!("Sharpe:             {:.3}", m.sharpe);
    println!("Sortino:            {:.3}", m.sortino);
    println!("Max drawdown:       {:.2}%", m.max_drawdown_pct);
    println!("Avg R:              {:.2}", m.avg_r);
    println!("Total return:       {:.2}%", m.total_return_pct);
    println!("Final capital:      {:.2}", m.final_capital);
    if result.force_closed() > 0 {
        println!("Force closed:       {}", result.force_closed());
    }
}

// ─── walk-forward ────────────────────────────────────────────────────

fn run_walk_forward_cmd(args: &MarketArgs, train_months: u32, test_months: u32) -> Result<()> {
    let scanner_config = load_scanner_config(args.config.as_deref())?;
    let backtest_config = resolve_backtest_config(args)?;
    let (start, end) = parse_range(&args.start, &args.end)?;

    let market = load_market(
        args,
        &scanner_config,
        start.timestamp_millis(),
        end.timestamp_millis(),
    )?;
    let replay = SignalReplay::from_config(&scanner_config, args.timeframe);
    let wf_config = WalkForwardConfig {
        train_months,
        test_months,
    };

    let result = run_walk_forward(
        &replay,
        &backtest_config,
        &WalkForwardInput {
            candles: &market.candles,
            benchmark: &market.benchmark,
            liquidity: &market.liquidity,
            start,
            end,
        },
        &wf_config,
    )?;

    println!("{}", export_walk_forward_json(&result)?);
    Ok(())
}

// ─── shared helpers ──────────────────────────────────────────────────

struct Market {
    candles: BTreeMap<String, Vec<Candle>>,
    benchmark: Vec<Candle>,
    liquidity: BTreeMap<String, LiquidityBucket>,
}

fn load_scanner_config(path: Option<&Path>) -> Result<ScannerConfig> {
    match path {
        Some(p) => Ok(ScannerConfig::from_file(p)?),
        None => Ok(ScannerConfig::default()),
    }
}

fn resolve_backtest_config(args: &MarketArgs) -> Result<BacktestConfig> {
    let base = match (&args.backtest_config, &args.preset) {
        (Some(_), Some(_)) => bail!("--backtest-config and --preset are mutually exclusive"),
        (Some(path), None) => BacktestConfig::from_file(path)?,
        (None, Some(name)) => match BacktestConfig::preset(name) {
            Some(config) => config,
            None => bail!("unknown preset '{name}' (expected default, conservative or aggressive)"),
        },
        (None, None) => BacktestConfig::default(),
    };
    Ok(match args.gate {
        Some(gate) => base.with_gate(gate),
        None => base,
    })
}

fn parse_date(s: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{s}': expected YYYY-MM-DD"))?;
    match date.and_hms_opt(0, 0, 0) {
        Some(dt) => Ok(dt.and_utc()),
        None => bail!("invalid date '{s}'"),
    }
}

fn parse_range(start: &str, end: &str) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if start >= end {
        bail!("start date must be before end date");
    }
    Ok((start, end))
}

fn make_source(synthetic: bool, now_ms: i64) -> Result<Arc<dyn CandleSource>> {
    if synthetic {
        return Ok(Arc::new(SyntheticSource::default_universe(now_ms)));
    }
    let breaker = Arc::new(CircuitBreaker::default_exchange());
    Ok(Arc::new(BinanceSource::new(breaker)?))
}

/// Fetches the test symbols and the benchmark, with one scan window of
/// history before `start_ts` so the first bars in range see a full window.
fn load_market(
    args: &MarketArgs,
    config: &ScannerConfig,
    start_ts: i64,
    end_ts: i64,
) -> Result<Market> {
    let source = make_source(args.synthetic, end_ts)?;
    let warmup = config.candle_limit as i64 * args.timeframe.duration_ms();
    let fetch_start = start_ts - warmup;
    let fetch_end = end_ts - 1;

    let mut candles = BTreeMap::new();
    for symbol in &args.symbols {
        let series = source
            .fetch_range(symbol, args.timeframe, fetch_start, fetch_end)
            .with_context(|| format!("failed to fetch {symbol} {}", args.timeframe))?;
        if series.is_empty() {
            warn!(symbol = %symbol, "no candles in range; symbol skipped");
            continue;
        }
        candles.insert(symbol.clone(), series);
    }
    if candles.is_empty() {
        bail!("no candle data for any requested symbol");
    }

    let benchmark = source
        .fetch_range(&config.benchmark_symbol, args.timeframe, fetch_start, fetch_end)
        .unwrap_or_else(|e| {
            warn!(error = %e, "benchmark unavailable; regime falls back to SIDE");
            Vec::new()
        });

    // Buckets come from today's tickers; without them every symbol counts as liquid.
    let liquidity = match source.tickers() {
        Ok(tickers) => {
            let universe = Universe::from_tickers(&tickers, &config.quote_asset, &config.universe);
            candles
                .keys()
                .map(|s| (s.clone(), universe.bucket_of(s)))
                .collect()
        }
        Err(e) => {
            warn!(error = %e, "tickers unavailable; liquidity buckets default to A");
            BTreeMap::new()
        }
    };

    Ok(Market {
        candles,
        benchmark,
        liquidity,
    })
}
