//! Wick ratios of a single candle.

use crate::domain::Candle;

/// Upper wick as a share of the candle range: (high - max(open, close)) / (high - low).
///
/// A long upper wick on a breakout candle signals supply into the move.
/// Returns 0.0 for a zero-range candle.
pub fn upper_wick_ratio(candle: &Candle) -> f64 {
    let range = candle.high - candle.low;
    if range <= 0.0 || range.is_nan() {
        return 0.0;
    }
    let body_top = candle.open.max(candle.close);
    ((candle.high - body_top) / range).clamp(0.0, 1.0)
}

/// Wick ratio used by the trigger detector and scorer.
pub fn wick_ratio(candle: &Candle) -> f64 {
    upper_wick_ratio(candle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            ts: 0,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn marubozu_has_no_wick() {
        assert_eq!(wick_ratio(&candle(100.0, 110.0, 100.0, 110.0)), 0.0);
    }

    #[test]
    fn shooting_star_has_long_wick() {
        let r = wick_ratio(&candle(100.0, 110.0, 99.0, 101.0));
        assert!((r - 9.0 / 11.0).abs() < 1e-12);
    }

    #[test]
    fn flat_candle_is_zero() {
        assert_eq!(wick_ratio(&candle(5.0, 5.0, 5.0, 5.0)), 0.0);
    }
}
