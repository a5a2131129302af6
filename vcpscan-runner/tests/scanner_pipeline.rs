//! Integration tests for a full scan cycle over the offline synthetic market.

use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use tempfile::TempDir;

use vcpscan_core::config::ScannerConfig;
use vcpscan_core::data::synthetic::{trending_series, vcp_breakout_series};
use vcpscan_core::data::{CandleSource, DataError, DataSource, SyntheticSource, Ticker};
use vcpscan_core::domain::{Candle, Timeframe};

use vcpscan_runner::store::SignalStore;
use vcpscan_runner::{PublishError, ScanError, Scanner};

const NOW: i64 = 1_709_251_200_000; // 2024-03-01T00:00:00Z

fn config() -> ScannerConfig {
    ScannerConfig {
        concurrency: 4,
        ..ScannerConfig::default()
    }
}

/// Synthetic market where some symbols or the ticker endpoint fail.
struct FlakySource {
    inner: SyntheticSource,
    failing_symbol: &'static str,
    tickers_down: bool,
}

impl CandleSource for FlakySource {
    fn name(&self) -> &str {
        "flaky"
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        if symbol == self.failing_symbol {
            return Err(DataError::NetworkUnreachable("connection reset".into()));
        }
        self.inner.fetch_candles(symbol, timeframe, limit)
    }

    fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, DataError> {
        self.inner.fetch_range(symbol, timeframe, start_ms, end_ms)
    }

    fn tickers(&self) -> Result<Vec<Ticker>, DataError> {
        if self.tickers_down {
            return Err(DataError::NetworkUnreachable("ticker endpoint down".into()));
        }
        self.inner.tickers()
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// One liquid symbol whose last 4h candle is a textbook VCP breakout.
struct TextbookSource {
    series: Vec<Candle>,
}

impl TextbookSource {
    fn new() -> Self {
        Self {
            series: vcp_breakout_series(),
        }
    }

    /// First moment the breakout candle counts as closed.
    fn close_of_last(&self) -> i64 {
        self.series.last().map_or(0, |c| c.ts + Timeframe::H4.duration_ms())
    }
}

impl CandleSource for TextbookSource {
    fn name(&self) -> &str {
        "textbook"
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        match symbol {
            "SOLUSDT" => Ok(self.series.clone()),
            "BTCUSDT" => Ok(trending_series(
                self.series[0].ts,
                timeframe,
                self.series.len(),
                40_000.0,
                0.1,
            )),
            other => Err(DataError::NetworkUnreachable(format!("no data for {other}"))),
        }
    }

    fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        _start_ms: i64,
        _end_ms: i64,
    ) -> Result<Vec<Candle>, DataError> {
        self.fetch_candles(symbol, timeframe, 0)
    }

    fn tickers(&self) -> Result<Vec<Ticker>, DataError> {
        Ok(vec![Ticker {
            symbol: "SOLUSDT".into(),
            last_price: self.series.last().map_or(0.0, |c| c.close),
            quote_volume: 100_000_000.0,
        }])
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn textbook_config() -> ScannerConfig {
    let mut config = ScannerConfig {
        timeframes: vec![Timeframe::H4],
        ..config()
    };
    config.publish.retry_backoff_ms = 1;
    config
}

#[test]
fn textbook_breakout_is_published_by_a_scan() {
    let source = Arc::new(TextbookSource::new());
    let now = source.close_of_last();
    let scanner = Scanner::new(textbook_config(), source).unwrap();
    let mut store = SignalStore::in_memory().unwrap();

    let report = scanner.run(&mut store, now).unwrap();

    assert_eq!(report.universe_size, 1);
    assert_eq!(report.published, 1);
    assert_eq!(store.signal_count().unwrap(), 1);
}

#[test]
fn locked_store_aborts_the_scan_with_a_persistence_error() {
    let source = Arc::new(TextbookSource::new());
    let now = source.close_of_last();
    let scanner = Scanner::new(textbook_config(), source).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("signals.db");
    let mut store = SignalStore::open(&path)
        .unwrap()
        .with_busy_timeout(Duration::from_millis(10))
        .unwrap();
    let writer = Connection::open(&path).unwrap();
    writer.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = scanner.run(&mut store, now).unwrap_err();

    match err {
        ScanError::Persistence(PublishError::Persistence { attempts, .. }) => {
            assert_eq!(attempts, scanner.config().publish.write_retries);
        }
        other => panic!("expected a persistence error, got {other}"),
    }
    writer.execute_batch("ROLLBACK").unwrap();
    assert_eq!(store.signal_count().unwrap(), 0);
}

#[test]
fn scan_reports_and_persists() {
    let source = Arc::new(SyntheticSource::default_universe(NOW));
    let scanner = Scanner::new(config(), source).unwrap();
    let mut store = SignalStore::in_memory().unwrap();

    let report = scanner.run(&mut store, NOW).unwrap();

    assert!(report.universe_size > 0);
    assert_eq!(report.fetch_failed, 0);
    assert_eq!(report.published, store.signal_count().unwrap());
    assert_eq!(
        report.signals.values().sum::<usize>(),
        report.published + report.gate_rejected + report.duplicates
    );
    assert!(report.top.len() <= scanner.config().report_top_n);
    for pair in report.top.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(report.benchmark.len(), scanner.config().timeframes.len());
}

#[test]
fn rescanning_the_same_candles_publishes_nothing_new() {
    let source = Arc::new(SyntheticSource::default_universe(NOW));
    let scanner = Scanner::new(config(), source).unwrap();
    let mut store = SignalStore::in_memory().unwrap();

    let first = scanner.run(&mut store, NOW).unwrap();
    let second = scanner.run(&mut store, NOW + 60_000).unwrap();

    assert_eq!(second.published, 0);
    assert_eq!(second.duplicates, first.published + first.duplicates);
    assert_eq!(store.signal_count().unwrap(), first.published);
}

#[test]
fn one_failing_symbol_does_not_abort_the_scan() {
    let source = Arc::new(FlakySource {
        inner: SyntheticSource::default_universe(NOW),
        failing_symbol: "SOLUSDT",
        tickers_down: false,
    });
    let scanner = Scanner::new(config(), source).unwrap();
    let mut store = SignalStore::in_memory().unwrap();

    let report = scanner.run(&mut store, NOW).unwrap();

    let universe = scanner.universe().unwrap();
    if universe.contains("SOLUSDT") {
        assert_eq!(report.fetch_failed, scanner.config().timeframes.len());
    }
    assert!(report.top.iter().all(|s| s.symbol != "SOLUSDT"));
}

#[test]
fn ticker_outage_is_a_universe_error() {
    let source = Arc::new(FlakySource {
        inner: SyntheticSource::default_universe(NOW),
        failing_symbol: "",
        tickers_down: true,
    });
    let scanner = Scanner::new(config(), source).unwrap();
    let mut store = SignalStore::in_memory().unwrap();

    let err = scanner.run(&mut store, NOW).unwrap_err();
    assert!(matches!(err, ScanError::Universe(_)));
}

#[test]
fn invalid_config_is_rejected() {
    let source = Arc::new(SyntheticSource::default_universe(NOW));
    let bad = ScannerConfig {
        timeframes: Vec::new(),
        ..ScannerConfig::default()
    };
    assert!(matches!(
        Scanner::new(bad, source),
        Err(ScanError::Config(_))
    ));
}
