//! End-to-end detection scenario on a textbook VCP.
//!
//! 300 4h candles: uptrend, three tightening contractions (12% / 7% / 3%),
//! breakout closing 1.5% above the pivot on twice the average volume, with the
//! benchmark in an uptrend.

use vcpscan_core::config::TimeframeParams;
use vcpscan_core::data::synthetic::{trending_series, vcp_breakout_series, VcpScenario};
use vcpscan_core::detect::{benchmark_regime, SetupInput};
use vcpscan_core::domain::{
    BenchmarkRegime, Grade, LiquidityBucket, SignalType, Timeframe, TriggerDetail,
};
use vcpscan_core::{analyze_symbol, Scorer};

#[test]
fn textbook_breakout_is_grade_a_and_scores_at_least_70() {
    // GIVEN: the textbook series and a rising benchmark
    let candles = vcp_breakout_series();
    assert_eq!(candles.len(), 300);
    let benchmark = trending_series(candles[0].ts, Timeframe::H4, 300, 40_000.0, 0.1);
    let regime = benchmark_regime(&benchmark);
    assert_eq!(regime, BenchmarkRegime::Up);
    let params = TimeframeParams::for_timeframe(Timeframe::H4);

    // WHEN: the last candle is evaluated
    let analysis = analyze_symbol(
        "binance",
        &SetupInput {
            symbol: "SOLUSDT",
            timeframe: Timeframe::H4,
            candles: &candles,
            params: &params,
            benchmark: regime,
            liquidity: LiquidityBucket::A,
        },
        &[],
        &Scorer::default(),
    );

    // THEN: a grade-A BREAKOUT with the expected features and a high score
    let setup = analysis.setup.as_ref().expect("setup expected");
    assert_eq!(setup.grade(), Grade::A);
    assert_eq!(setup.regime.to_string(), "BTC_UP|A");

    assert_eq!(analysis.events.len(), 1);
    let event = &analysis.events[0];
    assert_eq!(event.signal_type(), SignalType::Breakout);
    match event.detail {
        TriggerDetail::Breakout {
            breakout_close_pct,
            vol_ratio,
        } => {
            assert!((breakout_close_pct - 1.5).abs() < 1e-6);
            assert!((vol_ratio - 2.0).abs() < 1e-9);
        }
        other => panic!("unexpected detail {other:?}"),
    }
    assert!(event.score >= 70, "score {} < 70: {:?}", event.score, event.breakdown);
    assert_eq!(event.dedupe_key, "binance:SOLUSDT:4h:BREAKOUT:100.0");
}

#[test]
fn one_candle_earlier_is_approaching() {
    let candles = VcpScenario::default().series_without_breakout();
    let params = TimeframeParams::for_timeframe(Timeframe::H4);
    let analysis = analyze_symbol(
        "binance",
        &SetupInput {
            symbol: "SOLUSDT",
            timeframe: Timeframe::H4,
            candles: &candles,
            params: &params,
            benchmark: BenchmarkRegime::Up,
            liquidity: LiquidityBucket::A,
        },
        &[],
        &Scorer::default(),
    );
    assert!(analysis.has_setup());
    assert_eq!(analysis.events.len(), 1);
    assert_eq!(analysis.events[0].signal_type(), SignalType::Approaching);
}
