//! Candle source trait and structured error types.
//!
//! `CandleSource` abstracts over exchanges and offline generators so the fetch
//! pool, scanner and replay engine never know where candles come from.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Candle, Timeframe};

/// 24h ticker statistics used to rank the universe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    /// 24h traded volume in the quote asset.
    pub quote_volume: f64,
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by exchange (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: exchange has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("insufficient history for {symbol}: got {got} candles, need {need}")]
    InsufficientHistory {
        symbol: String,
        got: usize,
        need: usize,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// True when retrying later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_) | DataError::RateLimited { .. }
        )
    }
}

/// Where candles came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSource {
    Binance,
    Synthetic,
}

/// Capability: fetch OHLCV candles and 24h tickers.
///
/// Implementations must return candles with strictly increasing timestamps,
/// oldest first, and never include a candle that has not opened yet.
pub trait CandleSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    fn source(&self) -> DataSource;

    /// Fetch the most recent `limit` candles for a symbol.
    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError>;

    /// Fetch candles whose open time falls in `[start_ms, end_ms]`.
    fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, DataError>;

    /// 24h statistics for every listed symbol.
    fn tickers(&self) -> Result<Vec<Ticker>, DataError>;

    /// Check if the source is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}
