//! Candle: the fundamental market data unit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OHLCV candle for a single symbol on a single timeframe.
///
/// `ts` is the candle open time in Unix milliseconds (UTC). Candles are
/// immutable and ordered by `ts` within a (symbol, timeframe) series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Returns true if any OHLCV field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan()
            || self.high.is_nan()
            || self.low.is_nan()
            || self.close.is_nan()
            || self.volume.is_nan()
    }

    /// Basic OHLCV sanity check: high >= low, high >= open/close, positive prices.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
    }

    /// Candle open time as a UTC datetime.
    pub fn datetime(&self) -> DateTime<Utc> {
        ms_to_datetime(self.ts)
    }

    /// Calendar day (UTC) the candle opened on.
    pub fn day(&self) -> NaiveDate {
        self.datetime().date_naive()
    }
}

/// Convert Unix milliseconds to a UTC datetime, clamping out-of-range values to the epoch.
pub fn ms_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Index of the last candle with `ts <= as_of`, or `None` if every candle is later.
pub fn last_index_at_or_before(candles: &[Candle], as_of: i64) -> Option<usize> {
    let n = candles.partition_point(|c| c.ts <= as_of);
    n.checked_sub(1)
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::H1, Timeframe::H4, Timeframe::D1];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Length of one candle in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 4 * 3_600_000,
            Timeframe::D1 => 24 * 3_600_000,
        }
    }

    /// Candles per calendar year (crypto markets trade 24/7).
    pub fn bars_per_year(&self) -> f64 {
        365.0 * 24.0 * 3_600_000.0 / self.duration_ms() as f64
    }

    /// Number of candles spanning `days` calendar days, rounded up.
    pub fn bars_in_days(&self, days: f64) -> usize {
        let bars = days * 24.0 * 3_600_000.0 / self.duration_ms() as f64;
        bars.ceil().max(0.0) as usize
    }

    /// Intraday timeframes use the stricter publish threshold.
    pub fn is_intraday(&self) -> bool {
        !matches!(self, Timeframe::D1)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" | "d" | "daily" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{other}' (expected 1h, 4h or 1d)")),
        }
    }
}
