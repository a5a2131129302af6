//! Binance spot candle source.
//!
//! Fetches klines from `/api/v3/klines` and 24h tickers from `/api/v3/ticker/24hr`.
//! Handles paging beyond the 1000-candle request cap, retries with exponential
//! backoff, and the shared circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{CandleSource, DataError, DataSource, Ticker};
use crate::domain::{Candle, Timeframe};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Exchange cap on candles per klines request.
pub const MAX_KLINES_PER_REQUEST: usize = 1000;

/// Kline rows are heterogeneous JSON arrays:
/// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`.
type KlineRow = Vec<serde_json::Value>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerRow {
    symbol: String,
    last_price: String,
    quote_volume: String,
}

/// Binance spot REST source.
pub struct BinanceSource {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceSource {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        Self::with_base_url(DEFAULT_BASE_URL, circuit_breaker)
    }

    pub fn with_base_url(
        base_url: &str,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("vcpscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            circuit_breaker,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    fn interval(timeframe: Timeframe) -> &'static str {
        timeframe.as_str()
    }

    fn klines_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> String {
        let mut url = format!(
            "{}/api/v3/klines?symbol={symbol}&interval={}&limit={limit}",
            self.base_url,
            Self::interval(timeframe)
        );
        if let Some(start) = start_ms {
            url.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_ms {
            url.push_str(&format!("&endTime={end}"));
        }
        url
    }

    /// Parse one kline row. Numeric fields arrive as JSON strings.
    fn parse_kline(row: &KlineRow) -> Result<Candle, DataError> {
        let num = |idx: usize| -> Result<f64, DataError> {
            let v = row
                .get(idx)
                .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline missing field {idx}")))?;
            match v {
                serde_json::Value::String(s) => s.parse::<f64>().map_err(|e| {
                    DataError::ResponseFormatChanged(format!("kline field {idx} '{s}': {e}"))
                }),
                serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| {
                    DataError::ResponseFormatChanged(format!("kline field {idx} not a float"))
                }),
                other => Err(DataError::ResponseFormatChanged(format!(
                    "kline field {idx} has unexpected type: {other}"
                ))),
            }
        };
        let ts = row
            .first()
            .and_then(|v| v.as_i64())
            .ok_or_else(|| DataError::ResponseFormatChanged("kline open time missing".into()))?;

        Ok(Candle {
            ts,
            open: num(1)?,
            high: num(2)?,
            low: num(3)?,
            close: num(4)?,
            volume: num(5)?,
        })
    }

    fn parse_klines(rows: &[KlineRow]) -> Result<Vec<Candle>, DataError> {
        rows.iter().map(Self::parse_kline).collect()
    }

    fn parse_tickers(rows: Vec<TickerRow>) -> Vec<Ticker> {
        rows.into_iter()
            .filter_map(|row| {
                let last_price = row.last_price.parse::<f64>().ok()?;
                let quote_volume = row.quote_volume.parse::<f64>().ok()?;
                Some(Ticker {
                    symbol: row.symbol,
                    last_price,
                    quote_volume,
                })
            })
            .collect()
    }

    /// Execute a GET with retry and circuit breaker logic.
    fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::FORBIDDEN || status.as_u16() == 418 {
                        warn!(%status, symbol, "exchange blocked requests; tripping circuit breaker");
                        self.circuit_breaker.trip();
                        return Err(DataError::CircuitBreakerTripped);
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        self.circuit_breaker.record_failure();
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::BAD_REQUEST {
                        // Binance answers 400 {"code":-1121} for unknown symbols.
                        return Err(DataError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if !status.is_success() {
                        self.circuit_breaker.record_failure();
                        last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let parsed: T = resp.json().map_err(|e| {
                        DataError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;
                    self.circuit_breaker.record_success();
                    return Ok(parsed);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn fetch_page(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Result<Vec<Candle>, DataError> {
        let url = self.klines_url(symbol, timeframe, limit, start_ms, end_ms);
        let rows: Vec<KlineRow> = self.get_json(&url, symbol)?;
        Self::parse_klines(&rows)
    }
}

impl CandleSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    fn source(&self) -> DataSource {
        DataSource::Binance
    }

    /// Pages backwards from now in requests of at most 1000 candles.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        let mut pages: Vec<Vec<Candle>> = Vec::new();
        let mut remaining = limit;
        let mut end_ms: Option<i64> = None;

        while remaining > 0 {
            let page_limit = remaining.min(MAX_KLINES_PER_REQUEST);
            let page = self.fetch_page(symbol, timeframe, page_limit, None, end_ms)?;
            let got = page.len();
            let Some(first_ts) = page.first().map(|c| c.ts) else {
                break;
            };
            pages.push(page);
            remaining = remaining.saturating_sub(got);
            if got < page_limit {
                break;
            }
            end_ms = Some(first_ts - 1);
        }

        let candles: Vec<Candle> = pages.into_iter().rev().flatten().collect();
        if candles.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        debug!(symbol, %timeframe, candles = candles.len(), "fetched klines");
        Ok(candles)
    }

    /// Pages forwards from `start_ms` until `end_ms`.
    fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, DataError> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = start_ms;

        while cursor <= end_ms {
            let page = self.fetch_page(
                symbol,
                timeframe,
                MAX_KLINES_PER_REQUEST,
                Some(cursor),
                Some(end_ms),
            )?;
            let Some(last_ts) = page.last().map(|c| c.ts) else {
                break;
            };
            let full = page.len() == MAX_KLINES_PER_REQUEST;
            candles.extend(page);
            if !full {
                break;
            }
            cursor = last_ts + timeframe.duration_ms();
        }

        debug!(symbol, %timeframe, candles = candles.len(), "fetched kline range");
        Ok(candles)
    }

    fn tickers(&self) -> Result<Vec<Ticker>, DataError> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let rows: Vec<TickerRow> = self.get_json(&url, "*")?;
        Ok(Self::parse_tickers(rows))
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}
