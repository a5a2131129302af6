//! Deterministic signal identities.
//!
//! - `event_id`: exact identity of one trigger (exchange, symbol, timeframe, event time, type).
//! - `dedupe_key`: pattern identity independent of the exact event time; the pivot is
//!   rounded so small pivot drift between scans maps to the same key.

use super::candle::{ms_to_datetime, Timeframe};
use super::signal::SignalType;
use chrono::SecondsFormat;

/// Significant digits kept when rounding a pivot price into a dedupe key.
pub const PIVOT_SIGNIFICANT_DIGITS: i32 = 4;

/// BLAKE3 hash of the canonical event tuple, hex encoded.
pub fn event_id(
    exchange: &str,
    symbol: &str,
    timeframe: Timeframe,
    ts: i64,
    signal_type: SignalType,
) -> String {
    let iso = ms_to_datetime(ts).to_rfc3339_opts(SecondsFormat::Secs, true);
    let canonical = format!("{exchange}|{symbol}|{timeframe}|{iso}|{signal_type}");
    blake3::hash(canonical.as_bytes()).to_hex().to_string()
}

/// Human-readable pattern fingerprint, e.g. `binance:SOLUSDT:4h:BREAKOUT:142.3`.
pub fn dedupe_key(
    exchange: &str,
    symbol: &str,
    timeframe: Timeframe,
    signal_type: SignalType,
    pivot: f64,
) -> String {
    format!(
        "{exchange}:{symbol}:{timeframe}:{signal_type}:{}",
        format_pivot(pivot)
    )
}

/// Pivot rounded to `PIVOT_SIGNIFICANT_DIGITS` significant digits.
pub fn format_pivot(pivot: f64) -> String {
    if !pivot.is_finite() || pivot <= 0.0 {
        return "0".to_string();
    }
    let rounded = round_significant(pivot);
    // Rounding can carry into the next power of ten (99.996 -> 100.0), so the
    // decimal count comes from the rounded value.
    let decimals = (PIVOT_SIGNIFICANT_DIGITS - 1 - magnitude(rounded)).max(0);
    format!("{:.*}", decimals as usize, rounded)
}

fn magnitude(value: f64) -> i32 {
    value.log10().floor() as i32
}

fn round_significant(value: f64) -> f64 {
    let scale = 10f64.powi(PIVOT_SIGNIFICANT_DIGITS - 1 - magnitude(value));
    (value * scale).round() / scale
}
