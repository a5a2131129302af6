//! Property tests for detection invariants.
//!
//! 1. Grade ordering: the reported grade is the strictest whose trend filter holds
//! 2. Setup invariants: contractions strictly decrease, ratios meet thresholds
//! 3. Score bounds on real detector output

use proptest::prelude::*;
use vcpscan_core::config::TimeframeParams;
use vcpscan_core::data::synthetic::VcpScenario;
use vcpscan_core::detect::pattern::{TrendSnapshot, GRADE_RULES, SLOW_SLOPE_BARS};
use vcpscan_core::detect::{detect_breakout, detect_setup, SetupInput};
use vcpscan_core::domain::{BenchmarkRegime, Grade, LiquidityBucket, Timeframe};
use vcpscan_core::indicators::ema_of_series;
use vcpscan_core::Scorer;

// ── Strategies ───────────────────────────────────────────────────────

fn arb_scenario() -> impl Strategy<Value = VcpScenario> {
    (
        10.0..400.0_f64,   // start price
        60.0..95.0_f64,    // prior trend end
        10.0..16.0_f64,    // c1
        1.25..1.9_f64,     // c1/c2
        1.2..2.2_f64,      // c2/c3
        0.5..2.5_f64,      // breakout pct
        0.5..3.0_f64,      // vol ratio
    )
        .prop_map(|(start, prior, c1, r12, r23, bo, vol)| {
            let c2 = c1 / r12;
            VcpScenario {
                start_price: start,
                prior_trend_end: prior,
                contractions: [c1, c2, c2 / r23],
                breakout_pct: bo,
                breakout_vol_ratio: vol,
                ..VcpScenario::default()
            }
        })
}

fn input<'a>(
    candles: &'a [vcpscan_core::domain::Candle],
    params: &'a TimeframeParams,
) -> SetupInput<'a> {
    SetupInput {
        symbol: "PROPUSDT",
        timeframe: Timeframe::H4,
        candles,
        params,
        benchmark: BenchmarkRegime::Up,
        liquidity: LiquidityBucket::B,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Highest qualifying grade wins: recompute the trend snapshot independently
    /// and check the detector picked the first passing rule.
    #[test]
    fn grade_is_strictest_passing(scenario in arb_scenario()) {
        let params = TimeframeParams::for_timeframe(Timeframe::H4);
        let candles = scenario.series();
        let Ok(setup) = detect_setup(&input(&candles, &params)) else {
            return Ok(());
        };

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let ema50 = ema_of_series(&closes, 50);
        let ema200 = ema_of_series(&closes, 200);
        let last = closes.len() - 1;
        let trend = TrendSnapshot {
            close: closes[last],
            ema50: ema50[last],
            ema200: ema200[last],
            ema200_prior: ema200[last - SLOW_SLOPE_BARS],
        };
        let expected = GRADE_RULES
            .iter()
            .find(|r| r.trend.passes(&trend))
            .map(|r| r.grade)
            .unwrap_or(Grade::D);
        prop_assert_eq!(setup.grade(), expected);
        if GRADE_RULES[0].trend.passes(&trend) {
            prop_assert_eq!(setup.grade(), Grade::A);
        }
    }

    #[test]
    fn detected_setups_are_contracting(scenario in arb_scenario()) {
        let params = TimeframeParams::for_timeframe(Timeframe::H4);
        let candles = scenario.series();
        if let Ok(setup) = detect_setup(&input(&candles, &params)) {
            prop_assert!(setup.c1_pct > setup.c2_pct);
            prop_assert!(setup.c2_pct > setup.c3_pct);
            prop_assert!(setup.c3_pct > 0.0);
            prop_assert!(setup.r12() >= params.min_r12);
            prop_assert!(setup.r23() >= params.min_r23);
            prop_assert!((0.0..=1.0).contains(&setup.above_ema50_ratio));
        }
    }

    #[test]
    fn detector_scores_stay_bounded(scenario in arb_scenario()) {
        let params = TimeframeParams::for_timeframe(Timeframe::H4);
        let candles = scenario.series();
        if let Ok(setup) = detect_setup(&input(&candles, &params)) {
            if let Some(trigger) = detect_breakout(&setup, &candles[candles.len() - 1], &params) {
                let score = Scorer::default().score(&trigger, &params);
                prop_assert!(score.total <= 100);
            }
        }
    }
}
