//! Tiered VCP base detection.
//!
//! A base is the last three swing highs of the lookback window, each followed by
//! a pullback. The highs must descend, the pullback lows ascend, and each
//! contraction must be meaningfully shallower than the one before. Grades
//! differ only in the trend filter; the strictest passing grade wins.

use tracing::trace;

use super::swing::swing_highs;
use super::SkipReason;
use crate::config::TimeframeParams;
use crate::data::validate::validate_series;
use crate::domain::{
    BenchmarkRegime, Candle, Grade, LiquidityBucket, MarketRegime, SetupCandidate, Timeframe,
};
use crate::indicators::{atr_pct, closes, ema_of_series, sma_of_series, volumes};

/// Bars required before a symbol is considered at all.
pub const MIN_HISTORY_BARS: usize = 260;
pub const EMA_FAST: usize = 50;
pub const EMA_SLOW: usize = 200;
pub const ATR_PERIOD: usize = 14;
/// Bars over which EMA200 must have risen for grade A.
pub const SLOW_SLOPE_BARS: usize = 21;
/// Window of the above-EMA50 ratio.
pub const ABOVE_RATIO_BARS: usize = 20;
/// Window of the volume average (candles before the evaluated one).
pub const VOLUME_AVG_BARS: usize = 20;

// ─── Grade rules ─────────────────────────────────────────────────────

/// Trend requirement of a grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendFilter {
    /// close > EMA50 > EMA200 and EMA200 rising.
    Strict,
    AboveEma50,
    AboveEma200,
    Any,
}

/// Trend values at the evaluated candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendSnapshot {
    pub close: f64,
    pub ema50: f64,
    pub ema200: f64,
    /// EMA200 `SLOW_SLOPE_BARS` candles earlier.
    pub ema200_prior: f64,
}

impl TrendFilter {
    pub fn passes(&self, t: &TrendSnapshot) -> bool {
        match self {
            TrendFilter::Strict => {
                t.close > t.ema50 && t.ema50 > t.ema200 && t.ema200 > t.ema200_prior
            }
            TrendFilter::AboveEma50 => t.close > t.ema50,
            TrendFilter::AboveEma200 => t.close > t.ema200,
            TrendFilter::Any => true,
        }
    }
}

/// One tier of the grade ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GradeRule {
    pub grade: Grade,
    pub label: &'static str,
    pub trend: TrendFilter,
}

/// Strictest first.
pub const GRADE_RULES: [GradeRule; 4] = [
    GradeRule {
        grade: Grade::A,
        label: "STRICT",
        trend: TrendFilter::Strict,
    },
    GradeRule {
        grade: Grade::B,
        label: "ABOVE_EMA50",
        trend: TrendFilter::AboveEma50,
    },
    GradeRule {
        grade: Grade::C,
        label: "ABOVE_EMA200",
        trend: TrendFilter::AboveEma200,
    },
    GradeRule {
        grade: Grade::D,
        label: "ANY",
        trend: TrendFilter::Any,
    },
];

// ─── Base extraction ─────────────────────────────────────────────────

/// Three-contraction base found in a window. Indices are window-relative.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Base {
    pub high_idx: [usize; 3],
    pub highs: [f64; 3],
    pub lows: [f64; 3],
    /// Contraction depths in percent of each swing high.
    pub contractions: [f64; 3],
    /// Highest high from the first swing high to the end of the window.
    pub pivot: f64,
}

/// Extract the base from `window` (which must not include the evaluated candle).
pub fn extract_base(window: &[Candle], params: &TimeframeParams) -> Option<Base> {
    let swings = swing_highs(window, params.swing_width);
    if swings.len() < 3 {
        return None;
    }
    let high_idx = [
        swings[swings.len() - 3],
        swings[swings.len() - 2],
        swings[swings.len() - 1],
    ];
    let highs = high_idx.map(|i| window[i].high);
    if !(highs[0] > highs[1] && highs[1] > highs[2]) {
        return None;
    }

    let mut lows = [0.0; 3];
    for j in 0..3 {
        let end = if j < 2 { high_idx[j + 1] } else { window.len() };
        lows[j] = window[high_idx[j]..end]
            .iter()
            .map(|c| c.low)
            .fold(f64::INFINITY, f64::min);
    }
    if !(lows[0] < lows[1] && lows[1] < lows[2]) {
        return None;
    }

    let contractions = [0, 1, 2].map(|j| (highs[j] - lows[j]) / highs[j] * 100.0);
    let [c1, c2, c3] = contractions;
    if !(c1 > c2 && c2 > c3 && c3 > 0.0) {
        return None;
    }
    if c1 / c2 < params.min_r12 || c2 / c3 < params.min_r23 {
        return None;
    }

    let pivot = window[high_idx[0]..]
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);

    Some(Base {
        high_idx,
        highs,
        lows,
        contractions,
        pivot,
    })
}

// ─── Detection ───────────────────────────────────────────────────────

/// Everything the detector needs for one symbol and timeframe.
#[derive(Debug, Clone, Copy)]
pub struct SetupInput<'a> {
    pub symbol: &'a str,
    pub timeframe: Timeframe,
    /// Candles up to and including the evaluated one (the last).
    pub candles: &'a [Candle],
    pub params: &'a TimeframeParams,
    pub benchmark: BenchmarkRegime,
    pub liquidity: LiquidityBucket,
}

/// Detect a graded VCP setup at the last candle of `input.candles`.
pub fn detect_setup(input: &SetupInput<'_>) -> Result<SetupCandidate, SkipReason> {
    let result = detect_inner(input);
    if let Err(reason) = &result {
        trace!(symbol = input.symbol, timeframe = %input.timeframe, %reason, "no setup");
    }
    result
}

fn detect_inner(input: &SetupInput<'_>) -> Result<SetupCandidate, SkipReason> {
    let candles = input.candles;
    let params = input.params;
    let n = candles.len();
    if n < MIN_HISTORY_BARS {
        return Err(SkipReason::InsufficientHistory);
    }
    validate_series(candles).map_err(|_| SkipReason::InvalidCandles)?;

    let last = n - 1;
    let closes = closes(candles);
    let ema50 = ema_of_series(&closes, EMA_FAST);
    let ema200 = ema_of_series(&closes, EMA_SLOW);

    let trend = TrendSnapshot {
        close: closes[last],
        ema50: ema50[last],
        ema200: ema200[last],
        ema200_prior: ema200[last - SLOW_SLOPE_BARS],
    };
    if [trend.ema50, trend.ema200, trend.ema200_prior]
        .iter()
        .any(|v| !v.is_finite())
    {
        return Err(SkipReason::IndicatorUndefined);
    }

    let atr = atr_pct(candles, ATR_PERIOD);
    if !atr.is_finite() {
        return Err(SkipReason::IndicatorUndefined);
    }
    if atr < params.atr_pct_min || atr > params.atr_pct_max {
        return Err(SkipReason::AtrOutOfBounds);
    }

    let vol_avg20 = sma_of_series(
        &volumes(&candles[last - VOLUME_AVG_BARS..last]),
        VOLUME_AVG_BARS,
    )
    .last()
    .copied()
    .unwrap_or(f64::NAN);
    if !(vol_avg20.is_finite() && vol_avg20 > 0.0) {
        return Err(SkipReason::IndicatorUndefined);
    }

    let window_start = last.saturating_sub(params.base_lookback);
    let window = &candles[window_start..last];
    let base = extract_base(window, params).ok_or(SkipReason::NoQualifyingBase)?;

    let rule = GRADE_RULES
        .iter()
        .find(|rule| rule.trend.passes(&trend))
        .ok_or(SkipReason::NoQualifyingBase)?;

    let above = (n - ABOVE_RATIO_BARS..n)
        .filter(|&i| closes[i] > ema50[i])
        .count();

    let [c1, c2, c3] = base.contractions;
    Ok(SetupCandidate {
        symbol: input.symbol.to_string(),
        timeframe: input.timeframe,
        as_of_ts: candles[last].ts,
        base_start_ts: window[base.high_idx[0]].ts,
        pivot_high: base.pivot,
        c1_pct: c1,
        c2_pct: c2,
        c3_pct: c3,
        atr_pct: atr,
        ema50: trend.ema50,
        ema200: trend.ema200,
        ema_sep_pct: (trend.ema50 - trend.ema200) / trend.ema200 * 100.0,
        above_ema50_ratio: above as f64 / ABOVE_RATIO_BARS as f64,
        vol_avg20,
        liquidity: input.liquidity,
        regime: MarketRegime::new(input.benchmark, rule.grade),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::VcpScenario;

    fn params() -> TimeframeParams {
        TimeframeParams::for_timeframe(Timeframe::H4)
    }

    fn detect(candles: &[Candle]) -> Result<SetupCandidate, SkipReason> {
        let params = params();
        detect_setup(&SetupInput {
            symbol: "SOLUSDT",
            timeframe: Timeframe::H4,
            candles,
            params: &params,
            benchmark: BenchmarkRegime::Up,
            liquidity: LiquidityBucket::A,
        })
    }

    /// Scenario that reaches the base from a long decline, so EMA200 sits above price.
    fn bear_scenario() -> VcpScenario {
        VcpScenario {
            start_price: 400.0,
            prior_trend_end: 70.0,
            ..VcpScenario::default()
        }
    }

    #[test]
    fn textbook_base_is_grade_a() {
        let setup = detect(&VcpScenario::default().series()).unwrap();
        assert_eq!(setup.grade(), Grade::A);
        assert_eq!(setup.regime.to_string(), "BTC_UP|A");
        assert!((setup.pivot_high - 100.0).abs() < 1e-6);
        assert!((setup.c1_pct - 12.0).abs() < 1e-6);
        assert!((setup.c2_pct - 7.0).abs() < 1e-6);
        assert!((setup.c3_pct - 3.0).abs() < 1e-6);
        assert!((setup.vol_avg20 - 1_000.0).abs() < 1e-9);
        assert!(setup.ema50 > setup.ema200);
        assert!(setup.above_ema50_ratio > 0.5);
    }

    #[test]
    fn volume_average_covers_the_twenty_bars_before_the_evaluated_one() {
        let mut candles = VcpScenario::default().series();
        let last = candles.len() - 1;
        candles[last].volume = 50_000.0;
        candles[last - VOLUME_AVG_BARS - 1].volume = 50_000.0;
        candles[last - 1].volume += 2_000.0;
        let setup = detect(&candles).unwrap();
        assert!((setup.vol_avg20 - 1_100.0).abs() < 1e-9);
    }

    #[test]
    fn base_start_is_first_swing_high() {
        let scenario = VcpScenario::default();
        let candles = scenario.series();
        let setup = detect(&candles).unwrap();
        assert_eq!(setup.base_start_ts, candles[scenario.pivot_index()].ts);
        assert_eq!(setup.as_of_ts, candles[candles.len() - 1].ts);
    }

    #[test]
    fn short_history_is_skipped() {
        let candles = VcpScenario::default().series();
        let short = &candles[candles.len() - (MIN_HISTORY_BARS - 1)..];
        assert_eq!(detect(short), Err(SkipReason::InsufficientHistory));
    }

    #[test]
    fn widening_contractions_are_rejected() {
        let scenario = VcpScenario {
            contractions: [6.0, 7.0, 3.0],
            ..VcpScenario::default()
        };
        assert_eq!(detect(&scenario.series()), Err(SkipReason::NoQualifyingBase));
    }

    #[test]
    fn weak_decay_ratio_is_rejected() {
        // c2/c3 = 1.05 < min_r23 = 1.1
        let scenario = VcpScenario {
            contractions: [12.0, 6.3, 6.0],
            ..VcpScenario::default()
        };
        assert_eq!(detect(&scenario.series()), Err(SkipReason::NoQualifyingBase));
    }

    #[test]
    fn broken_timestamps_are_invalid() {
        let mut candles = VcpScenario::default().series();
        candles[100].ts = candles[99].ts;
        assert_eq!(detect(&candles), Err(SkipReason::InvalidCandles));
    }

    #[test]
    fn atr_outside_bounds_is_skipped() {
        let mut p = params();
        p.atr_pct_max = 0.2;
        let candles = VcpScenario::default().series();
        let result = detect_setup(&SetupInput {
            symbol: "SOLUSDT",
            timeframe: Timeframe::H4,
            candles: &candles,
            params: &p,
            benchmark: BenchmarkRegime::Up,
            liquidity: LiquidityBucket::A,
        });
        assert_eq!(result, Err(SkipReason::AtrOutOfBounds));
    }

    #[test]
    fn close_above_ema50_only_is_grade_b() {
        let setup = detect(&bear_scenario().series()).unwrap();
        assert!(setup.ema50 < setup.ema200);
        assert_eq!(setup.grade(), Grade::B);
    }

    #[test]
    fn close_below_both_emas_falls_through_to_grade_d() {
        let mut candles = bear_scenario().series();
        let n = candles.len();
        let prev_close = candles[n - 2].close;
        candles[n - 1] = Candle {
            ts: candles[n - 1].ts,
            open: prev_close,
            high: prev_close * 1.004,
            low: 89.0,
            close: 90.0,
            volume: 1_000.0,
        };
        let setup = detect(&candles).unwrap();
        assert!(setup.ema200 > 90.0);
        assert_eq!(setup.grade(), Grade::D);
    }

    #[test]
    fn grade_rules_are_strictest_first() {
        let grades: Vec<Grade> = GRADE_RULES.iter().map(|r| r.grade).collect();
        assert_eq!(grades, vec![Grade::A, Grade::B, Grade::C, Grade::D]);
        let everything = TrendSnapshot {
            close: 10.0,
            ema50: 9.0,
            ema200: 8.0,
            ema200_prior: 7.0,
        };
        assert!(GRADE_RULES.iter().all(|r| r.trend.passes(&everything)));
    }
}
