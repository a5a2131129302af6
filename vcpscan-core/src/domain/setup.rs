//! SetupCandidate: a detected VCP base for one symbol + timeframe at a point in time.

use super::candle::Timeframe;
use super::regime::{Grade, LiquidityBucket, MarketRegime};
use serde::{Deserialize, Serialize};

/// One symbol+timeframe's detected contraction base.
///
/// Recomputed fresh every scan cycle and consumed by the trigger detector; only
/// persisted as a snapshot inside a published signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupCandidate {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Timestamp of the candle the setup was evaluated on.
    pub as_of_ts: i64,
    /// Open time of the first contraction's swing high.
    pub base_start_ts: i64,
    /// Highest high of the base; a close above it is a breakout.
    pub pivot_high: f64,
    /// Contraction depths as % of the swing high, oldest first.
    pub c1_pct: f64,
    pub c2_pct: f64,
    pub c3_pct: f64,
    /// ATR(14) as % of the last close.
    pub atr_pct: f64,
    pub ema50: f64,
    pub ema200: f64,
    /// (EMA50 - EMA200) / EMA200 * 100.
    pub ema_sep_pct: f64,
    /// Fraction of the last 20 closes above EMA50.
    pub above_ema50_ratio: f64,
    /// Mean volume of the 20 candles before the evaluated candle.
    pub vol_avg20: f64,
    pub liquidity: LiquidityBucket,
    pub regime: MarketRegime,
}

impl SetupCandidate {
    pub fn grade(&self) -> Grade {
        self.regime.grade
    }

    /// First decay ratio c1/c2.
    pub fn r12(&self) -> f64 {
        ratio(self.c1_pct, self.c2_pct)
    }

    /// Second decay ratio c2/c3.
    pub fn r23(&self) -> f64 {
        ratio(self.c2_pct, self.c3_pct)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den <= 0.0 {
        return f64::INFINITY;
    }
    num / den
}

#[cfg(test)]
pub(crate) fn sample_setup() -> SetupCandidate {
    use super::regime::BenchmarkRegime;
    SetupCandidate {
        symbol: "SOLUSDT".into(),
        timeframe: Timeframe::H4,
        as_of_ts: 1_704_153_600_000,
        base_start_ts: 1_703_000_000_000,
        pivot_high: 100.0,
        c1_pct: 12.0,
        c2_pct: 7.0,
        c3_pct: 3.0,
        atr_pct: 2.0,
        ema50: 95.0,
        ema200: 88.0,
        ema_sep_pct: 7.95,
        above_ema50_ratio: 1.0,
        vol_avg20: 1_000.0,
        liquidity: LiquidityBucket::A,
        regime: MarketRegime::new(BenchmarkRegime::Up, Grade::A),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_ratios() {
        let s = sample_setup();
        assert!((s.r12() - 12.0 / 7.0).abs() < 1e-12);
        assert!((s.r23() - 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(s.grade(), Grade::A);
    }

    #[test]
    fn zero_final_contraction_is_infinite_ratio() {
        let mut s = sample_setup();
        s.c3_pct = 0.0;
        assert!(s.r23().is_infinite());
    }
}
