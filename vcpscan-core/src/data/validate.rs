//! Candle series validation.

use super::provider::DataError;
use crate::domain::Candle;

/// Check a series for strictly increasing timestamps and sane OHLCV values.
pub fn validate_series(candles: &[Candle]) -> Result<(), DataError> {
    for (i, c) in candles.iter().enumerate() {
        if !c.is_sane() {
            return Err(DataError::ValidationError(format!(
                "candle {i} (ts {}) fails OHLCV sanity check",
                c.ts
            )));
        }
        if i > 0 && c.ts <= candles[i - 1].ts {
            return Err(DataError::ValidationError(format!(
                "timestamps not strictly increasing at index {i} ({} <= {})",
                c.ts,
                candles[i - 1].ts
            )));
        }
    }
    Ok(())
}

/// Drop a trailing candle that has not closed yet as of `now_ms`.
///
/// Exchanges return the in-progress candle last; detection must only see
/// closed candles.
pub fn drop_unclosed(candles: &mut Vec<Candle>, duration_ms: i64, now_ms: i64) {
    while let Some(last) = candles.last() {
        if last.ts + duration_ms > now_ms {
            candles.pop();
        } else {
            break;
        }
    }
}
