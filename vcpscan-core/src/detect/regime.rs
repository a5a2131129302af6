//! Benchmark regime from the benchmark's close, EMA50 and 21-bar EMA50 slope.

use crate::domain::{BenchmarkRegime, Candle};
use crate::indicators::ema_of_series;

pub const REGIME_EMA_PERIOD: usize = 50;
pub const REGIME_SLOPE_BARS: usize = 21;

/// Bars needed for a defined EMA50 slope.
pub const MIN_BENCHMARK_BARS: usize = REGIME_EMA_PERIOD + REGIME_SLOPE_BARS;

/// UP when close > EMA50 and EMA50 rose over 21 bars, DOWN when close < EMA50
/// and EMA50 fell, otherwise SIDE. Short or undefined history is SIDE.
pub fn benchmark_regime(candles: &[Candle]) -> BenchmarkRegime {
    let n = candles.len();
    if n < MIN_BENCHMARK_BARS {
        return BenchmarkRegime::Side;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let ema = ema_of_series(&closes, REGIME_EMA_PERIOD);
    let now = ema[n - 1];
    let then = ema[n - 1 - REGIME_SLOPE_BARS];
    let close = closes[n - 1];
    if now.is_nan() || then.is_nan() || close.is_nan() {
        return BenchmarkRegime::Side;
    }

    let slope = now - then;
    if close > now && slope > 0.0 {
        BenchmarkRegime::Up
    } else if close < now && slope < 0.0 {
        BenchmarkRegime::Down
    } else {
        BenchmarkRegime::Side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::trending_series;
    use crate::domain::Timeframe;

    #[test]
    fn rising_benchmark_is_up() {
        let candles = trending_series(0, Timeframe::D1, 120, 100.0, 0.5);
        assert_eq!(benchmark_regime(&candles), BenchmarkRegime::Up);
    }

    #[test]
    fn falling_benchmark_is_down() {
        let candles = trending_series(0, Timeframe::D1, 120, 100.0, -0.5);
        assert_eq!(benchmark_regime(&candles), BenchmarkRegime::Down);
    }

    #[test]
    fn short_history_is_side() {
        let candles = trending_series(0, Timeframe::D1, MIN_BENCHMARK_BARS - 1, 100.0, 0.5);
        assert_eq!(benchmark_regime(&candles), BenchmarkRegime::Side);
        assert_eq!(benchmark_regime(&[]), BenchmarkRegime::Side);
    }

    #[test]
    fn rising_ema_with_close_below_is_side() {
        let mut candles = trending_series(0, Timeframe::D1, 120, 100.0, 0.5);
        if let Some(last) = candles.last_mut() {
            last.close = 10.0;
            last.low = 9.0;
        }
        assert_eq!(benchmark_regime(&candles), BenchmarkRegime::Side);
    }
}
