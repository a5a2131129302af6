//! Breakout and retest triggers.

use serde::{Deserialize, Serialize};

use crate::config::TimeframeParams;
use crate::domain::{
    last_index_at_or_before, Candle, SetupCandidate, SignalEvent, SignalType, TriggerDetail,
    TriggerEvent,
};
use crate::indicators::wick_ratio;

/// Classify the evaluated candle against a fresh setup.
///
/// BREAKOUT when the close clears the pivot by `[breakout_min_pct, breakout_max_pct]`,
/// APPROACHING when it sits at most `approaching_pct` below, otherwise nothing.
/// A close above the pivot outside the extension band (too weak or chased) is nothing.
pub fn detect_breakout(
    setup: &SetupCandidate,
    candle: &Candle,
    params: &TimeframeParams,
) -> Option<TriggerEvent> {
    let pivot = setup.pivot_high;
    if !(pivot > 0.0) || !(setup.vol_avg20 > 0.0) {
        return None;
    }
    let vol_ratio = candle.volume / setup.vol_avg20;

    let detail = if candle.close > pivot {
        let breakout_close_pct = (candle.close - pivot) / pivot * 100.0;
        if breakout_close_pct < params.breakout_min_pct
            || breakout_close_pct > params.breakout_max_pct
        {
            return None;
        }
        TriggerDetail::Breakout {
            breakout_close_pct,
            vol_ratio,
        }
    } else {
        let distance_pct = (pivot - candle.close) / pivot * 100.0;
        if distance_pct > params.approaching_pct {
            return None;
        }
        TriggerDetail::Approaching {
            distance_pct,
            vol_ratio,
        }
    };

    Some(TriggerEvent {
        ts: candle.ts,
        close: candle.close,
        wick_ratio: wick_ratio(candle),
        detail,
        setup: setup.clone(),
    })
}

/// A breakout a retest can follow: its time and the setup snapshot it broke out of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorBreakout {
    pub ts: i64,
    pub setup: SetupCandidate,
}

impl PriorBreakout {
    pub fn from_signal(signal: &SignalEvent) -> Option<Self> {
        if signal.signal_type() != SignalType::Breakout {
            return None;
        }
        Some(Self {
            ts: signal.ts,
            setup: signal.setup.clone(),
        })
    }

    pub fn from_trigger(trigger: &TriggerEvent) -> Option<Self> {
        if trigger.signal_type() != SignalType::Breakout {
            return None;
        }
        Some(Self {
            ts: trigger.ts,
            setup: trigger.setup.clone(),
        })
    }

    pub fn pivot(&self) -> f64 {
        self.setup.pivot_high
    }
}

/// Look for a retest of `prior` confirmed by the last candle.
///
/// Requires, within `max_bars_after_breakout` candles of the breakout: the lowest
/// low since the breakout inside `pivot ± retest_tol_pct`, no close below the
/// lower edge of that band, and a last close at or above the pivot.
pub fn detect_retest(
    prior: &PriorBreakout,
    candles: &[Candle],
    params: &TimeframeParams,
) -> Option<TriggerEvent> {
    let pivot = prior.pivot();
    if !(pivot > 0.0) || !(prior.setup.vol_avg20 > 0.0) {
        return None;
    }
    let b = last_index_at_or_before(candles, prior.ts)?;
    if candles[b].ts != prior.ts {
        return None;
    }
    let last = candles.len().checked_sub(1)?;
    let bars_after = last.checked_sub(b)?;
    if bars_after == 0 || bars_after > params.max_bars_after_breakout {
        return None;
    }

    let after = &candles[b + 1..=last];
    let tol = params.retest_tol_pct / 100.0;
    let band_lo = pivot * (1.0 - tol);
    let band_hi = pivot * (1.0 + tol);

    let dip_low = after.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    if dip_low > band_hi || dip_low < band_lo {
        return None;
    }
    if after.iter().any(|c| c.close < band_lo) {
        return None;
    }

    let confirm = &candles[last];
    if confirm.close < pivot {
        return None;
    }

    let mut setup = prior.setup.clone();
    setup.as_of_ts = confirm.ts;

    Some(TriggerEvent {
        ts: confirm.ts,
        close: confirm.close,
        wick_ratio: wick_ratio(confirm),
        detail: TriggerDetail::RetestOk {
            retest_depth_pct: (pivot - dip_low) / pivot * 100.0,
            retest_vol_ratio: confirm.volume / prior.setup.vol_avg20,
            confirm_close_above: confirm.close > pivot && confirm.close > confirm.open,
            breakout_ts: prior.ts,
        },
        setup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::setup::sample_setup;
    use crate::domain::Timeframe;

    fn params() -> TimeframeParams {
        TimeframeParams::for_timeframe(Timeframe::H4)
    }

    fn candle(ts: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    #[test]
    fn breakout_within_band() {
        let setup = sample_setup();
        let c = candle(1, 99.0, 101.8, 98.9, 101.5, 2_000.0);
        let trigger = detect_breakout(&setup, &c, &params()).unwrap();
        match trigger.detail {
            TriggerDetail::Breakout {
                breakout_close_pct,
                vol_ratio,
            } => {
                assert!((breakout_close_pct - 1.5).abs() < 1e-9);
                assert!((vol_ratio - 2.0).abs() < 1e-9);
            }
            other => panic!("expected breakout, got {other:?}"),
        }
    }

    #[test]
    fn overextended_or_weak_close_is_nothing() {
        let setup = sample_setup();
        let chased = candle(1, 99.0, 106.0, 98.9, 105.0, 2_000.0);
        assert!(detect_breakout(&setup, &chased, &params()).is_none());
        let weak = candle(1, 99.0, 100.4, 98.9, 100.2, 2_000.0);
        assert!(detect_breakout(&setup, &weak, &params()).is_none());
    }

    #[test]
    fn close_just_below_pivot_is_approaching() {
        let setup = sample_setup();
        let near = candle(1, 98.0, 99.0, 97.9, 98.5, 900.0);
        let trigger = detect_breakout(&setup, &near, &params()).unwrap();
        assert_eq!(trigger.signal_type(), SignalType::Approaching);
        assert!(!trigger.signal_type().is_publishable());

        let far = candle(1, 96.0, 97.5, 95.9, 97.0, 900.0);
        assert!(detect_breakout(&setup, &far, &params()).is_none());
    }

    fn prior() -> PriorBreakout {
        PriorBreakout {
            ts: 10,
            setup: sample_setup(),
        }
    }

    fn after_breakout(rest: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        let mut candles = vec![candle(10, 99.0, 101.8, 98.9, 101.5, 2_000.0)];
        for (i, &(o, h, l, c)) in rest.iter().enumerate() {
            candles.push(candle(11 + i as i64, o, h, l, c, 800.0));
        }
        candles
    }

    #[test]
    fn retest_touching_pivot_and_closing_above() {
        let candles = after_breakout(&[
            (101.5, 102.0, 100.4, 100.6),
            (100.6, 100.9, 99.6, 100.2),
            (100.2, 101.6, 100.0, 101.2),
        ]);
        let trigger = detect_retest(&prior(), &candles, &params()).unwrap();
        match trigger.detail {
            TriggerDetail::RetestOk {
                retest_depth_pct,
                retest_vol_ratio,
                confirm_close_above,
                breakout_ts,
            } => {
                assert!((retest_depth_pct - 0.4).abs() < 1e-9);
                assert!((retest_vol_ratio - 0.8).abs() < 1e-9);
                assert!(confirm_close_above);
                assert_eq!(breakout_ts, 10);
            }
            other => panic!("expected retest, got {other:?}"),
        }
        assert_eq!(trigger.setup.as_of_ts, 13);
    }

    #[test]
    fn close_below_band_fails_retest() {
        let candles = after_breakout(&[
            (101.5, 101.6, 97.0, 97.5),
            (97.5, 101.5, 97.4, 101.2),
        ]);
        assert!(detect_retest(&prior(), &candles, &params()).is_none());
    }

    #[test]
    fn no_dip_into_band_is_not_a_retest() {
        let candles = after_breakout(&[(101.5, 104.0, 102.0, 103.5)]);
        assert!(detect_retest(&prior(), &candles, &params()).is_none());
    }

    #[test]
    fn last_close_below_pivot_is_not_confirmed() {
        let candles = after_breakout(&[(101.5, 101.6, 99.5, 99.8)]);
        assert!(detect_retest(&prior(), &candles, &params()).is_none());
    }

    #[test]
    fn retest_window_expires() {
        let mut rest = vec![(101.5, 102.0, 101.0, 101.5); params().max_bars_after_breakout];
        rest.push((101.5, 101.8, 99.8, 101.0));
        let candles = after_breakout(&rest);
        assert!(detect_retest(&prior(), &candles, &params()).is_none());
    }

    #[test]
    fn breakout_candle_missing_from_series() {
        let mut candles = after_breakout(&[(101.5, 102.0, 100.4, 100.6)]);
        candles.remove(0);
        assert!(detect_retest(&prior(), &candles, &params()).is_none());
    }
}
