//! Composite 0–100 signal score.
//!
//! Four components (contraction, trend, trigger, risk/liquidity), each a weighted
//! blend of sub-scores clamped to [0, 1] and scaled to the component's points.
//! Weights and bounds come from `ScoringWeights` and the timeframe's
//! `TimeframeParams`.

use crate::config::{ScoringWeights, TimeframeParams};
use crate::domain::{
    BenchmarkRegime, LiquidityBucket, ScoreBreakdown, TriggerDetail, TriggerEvent,
};

/// Linear map of `x` from `[lo, hi]` onto `[0, 1]`, clamped. NaN maps to 0.
pub fn norm(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    if hi <= lo {
        return if x >= hi { 1.0 } else { 0.0 };
    }
    ((x - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// `1 - norm`: smaller is better. NaN maps to 0.
pub fn inv_norm(x: f64, lo: f64, hi: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    1.0 - norm(x, lo, hi)
}

/// Triangular score: 0 at `lo` and `hi`, 1 at `lo + peak_frac * (hi - lo)`.
pub fn goldilocks(x: f64, lo: f64, hi: f64, peak_frac: f64) -> f64 {
    if x.is_nan() || hi <= lo {
        return 0.0;
    }
    let peak = lo + peak_frac.clamp(0.0, 1.0) * (hi - lo);
    let s = if x <= peak {
        if peak <= lo {
            1.0
        } else {
            (x - lo) / (peak - lo)
        }
    } else if hi <= peak {
        1.0
    } else {
        (hi - x) / (hi - peak)
    };
    s.clamp(0.0, 1.0)
}

pub fn liquidity_score(bucket: LiquidityBucket) -> f64 {
    match bucket {
        LiquidityBucket::A => 1.0,
        LiquidityBucket::B => 0.6,
        LiquidityBucket::C => 0.2,
    }
}

pub fn regime_score(regime: BenchmarkRegime) -> f64 {
    match regime {
        BenchmarkRegime::Up => 1.0,
        BenchmarkRegime::Side => 0.7,
        BenchmarkRegime::Down => 0.3,
    }
}

/// Scores triggers with a fixed set of weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, trigger: &TriggerEvent, params: &TimeframeParams) -> ScoreBreakdown {
        let contraction = self.contraction(trigger, params);
        let trend = self.trend(trigger, params);
        let trigger_pts = self.trigger(trigger, params);
        let risk = self.risk(trigger);
        let sum = contraction + trend + trigger_pts + risk;
        ScoreBreakdown {
            contraction,
            trend,
            trigger: trigger_pts,
            risk,
            total: sum.clamp(0.0, 100.0).round() as u8,
        }
    }

    fn contraction(&self, t: &TriggerEvent, p: &TimeframeParams) -> f64 {
        let w = &self.weights;
        let s = &t.setup;
        let ratios =
            (norm(s.r12(), w.r12_low, w.r12_high) + norm(s.r23(), w.r23_low, w.r23_high)) / 2.0;
        let tight = inv_norm(s.c3_pct, p.c3_tight, p.c3_loose);
        let calm = inv_norm(s.atr_pct, p.atr_score_low, p.atr_score_high);
        w.contraction_points
            * (w.contraction_ratio_weight * ratios
                + w.contraction_c3_weight * tight
                + w.contraction_atr_weight * calm)
    }

    fn trend(&self, t: &TriggerEvent, p: &TimeframeParams) -> f64 {
        let w = &self.weights;
        let s = &t.setup;
        w.trend_points
            * (w.trend_above_weight
                * norm(s.above_ema50_ratio, w.above_ratio_low, w.above_ratio_high)
                + w.trend_sep_weight * norm(s.ema_sep_pct, p.ema_sep_low, p.ema_sep_high))
    }

    fn trigger(&self, t: &TriggerEvent, p: &TimeframeParams) -> f64 {
        let w = &self.weights;
        let sub = match t.detail {
            TriggerDetail::Breakout {
                breakout_close_pct,
                vol_ratio,
            } => {
                w.breakout_extension_weight
                    * goldilocks(
                        breakout_close_pct,
                        p.breakout_min_pct,
                        p.breakout_max_pct,
                        w.breakout_peak_frac,
                    )
                    + w.breakout_volume_weight * norm(vol_ratio, w.vol_ratio_low, w.vol_ratio_high)
            }
            // Informational only: no extension credit, volume still counts.
            TriggerDetail::Approaching { vol_ratio, .. } => {
                w.breakout_volume_weight * norm(vol_ratio, w.vol_ratio_low, w.vol_ratio_high)
            }
            TriggerDetail::RetestOk {
                retest_depth_pct,
                retest_vol_ratio,
                confirm_close_above,
                ..
            } => {
                let confirm = if confirm_close_above { 1.0 } else { 0.0 };
                w.retest_depth_weight
                    * goldilocks(retest_depth_pct, 0.0, p.retest_band_pct, w.retest_peak_frac)
                    + w.retest_confirm_weight * confirm
                    + w.retest_volume_weight
                        * inv_norm(retest_vol_ratio, w.retest_vol_low, w.retest_vol_high)
            }
        };
        w.trigger_points * sub
    }

    fn risk(&self, t: &TriggerEvent) -> f64 {
        let w = &self.weights;
        let wick = if t.wick_ratio.is_nan() {
            0.0
        } else {
            1.0 - t.wick_ratio.clamp(0.0, 1.0)
        };
        w.risk_points
            * (w.risk_wick_weight * wick
                + w.risk_liquidity_weight * liquidity_score(t.setup.liquidity)
                + w.risk_regime_weight * regime_score(t.setup.regime.benchmark))
    }
}
