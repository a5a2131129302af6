//! Trigger events and scored signal events.

use super::candle::Timeframe;
use super::ids;
use super::setup::SetupCandidate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of trigger a setup produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Breakout,
    /// Close within a small distance below the pivot. Informational only.
    Approaching,
    RetestOk,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Breakout => "BREAKOUT",
            SignalType::Approaching => "APPROACHING",
            SignalType::RetestOk => "RETEST_OK",
        }
    }

    pub fn is_publishable(&self) -> bool {
        !matches!(self, SignalType::Approaching)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BREAKOUT" => Ok(SignalType::Breakout),
            "APPROACHING" => Ok(SignalType::Approaching),
            "RETEST_OK" | "RETEST" => Ok(SignalType::RetestOk),
            other => Err(format!("unknown signal type '{other}'")),
        }
    }
}

/// Trigger-specific measurements, one variant per signal type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerDetail {
    Breakout {
        /// (close - pivot) / pivot * 100.
        breakout_close_pct: f64,
        vol_ratio: f64,
    },
    Approaching {
        /// (pivot - close) / pivot * 100.
        distance_pct: f64,
        vol_ratio: f64,
    },
    RetestOk {
        /// (pivot - dip_low) / pivot * 100. Negative when the dip held above the pivot.
        retest_depth_pct: f64,
        retest_vol_ratio: f64,
        confirm_close_above: bool,
        breakout_ts: i64,
    },
}

impl TriggerDetail {
    pub fn signal_type(&self) -> SignalType {
        match self {
            TriggerDetail::Breakout { .. } => SignalType::Breakout,
            TriggerDetail::Approaching { .. } => SignalType::Approaching,
            TriggerDetail::RetestOk { .. } => SignalType::RetestOk,
        }
    }
}

/// An unscored trigger: a setup plus the candle that confirmed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub ts: i64,
    pub close: f64,
    /// Upper-wick share of the triggering candle's range.
    pub wick_ratio: f64,
    pub detail: TriggerDetail,
    pub setup: SetupCandidate,
}

impl TriggerEvent {
    pub fn signal_type(&self) -> SignalType {
        self.detail.signal_type()
    }
}

/// Weighted score components. `total` is the rounded, clamped sum.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub contraction: f64,
    pub trend: f64,
    pub trigger: f64,
    pub risk: f64,
    pub total: u8,
}

/// A scored, identified trigger. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub event_id: String,
    pub dedupe_key: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub ts: i64,
    pub close: f64,
    pub wick_ratio: f64,
    pub detail: TriggerDetail,
    pub setup: SetupCandidate,
    pub score: u8,
    pub breakdown: ScoreBreakdown,
}

impl SignalEvent {
    /// Attach identity and score to a trigger.
    pub fn from_trigger(exchange: &str, trigger: TriggerEvent, breakdown: ScoreBreakdown) -> Self {
        let signal_type = trigger.signal_type();
        let symbol = trigger.setup.symbol.clone();
        let timeframe = trigger.setup.timeframe;
        let event_id = ids::event_id(exchange, &symbol, timeframe, trigger.ts, signal_type);
        let dedupe_key = ids::dedupe_key(
            exchange,
            &symbol,
            timeframe,
            signal_type,
            trigger.setup.pivot_high,
        );
        Self {
            event_id,
            dedupe_key,
            exchange: exchange.to_string(),
            symbol,
            timeframe,
            ts: trigger.ts,
            close: trigger.close,
            wick_ratio: trigger.wick_ratio,
            detail: trigger.detail,
            setup: trigger.setup,
            score: breakdown.total,
            breakdown,
        }
    }

    pub fn signal_type(&self) -> SignalType {
        self.detail.signal_type()
    }

    pub fn pivot(&self) -> f64 {
        self.setup.pivot_high
    }

    /// One-line human-readable description used as the persisted summary.
    pub fn summary(&self) -> String {
        let trigger = match self.detail {
            TriggerDetail::Breakout {
                breakout_close_pct,
                vol_ratio,
            } => format!("close {breakout_close_pct:+.2}% vs pivot, vol x{vol_ratio:.2}"),
            TriggerDetail::Approaching {
                distance_pct,
                vol_ratio,
            } => format!("{distance_pct:.2}% below pivot, vol x{vol_ratio:.2}"),
            TriggerDetail::RetestOk {
                retest_depth_pct,
                retest_vol_ratio,
                confirm_close_above,
                ..
            } => format!(
                "retest depth {retest_depth_pct:.2}%, vol x{retest_vol_ratio:.2}, confirmed={confirm_close_above}"
            ),
        };
        format!(
            "{} {} {} score {} | pivot {} | {} | grade {} {} | c {:.1}/{:.1}/{:.1}%",
            self.symbol,
            self.timeframe,
            self.signal_type(),
            self.score,
            ids::format_pivot(self.pivot()),
            trigger,
            self.setup.grade(),
            self.setup.regime.benchmark,
            self.setup.c1_pct,
            self.setup.c2_pct,
            self.setup.c3_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::setup::sample_setup;

    fn sample_breakdown() -> ScoreBreakdown {
        ScoreBreakdown {
            contraction: 35.0,
            trend: 20.0,
            trigger: 17.0,
            risk: 9.0,
            total: 81,
        }
    }

    fn sample_trigger() -> TriggerEvent {
        TriggerEvent {
            ts: 1_704_153_600_000,
            close: 101.5,
            wick_ratio: 0.1,
            detail: TriggerDetail::Breakout {
                breakout_close_pct: 1.5,
                vol_ratio: 2.0,
            },
            setup: sample_setup(),
        }
    }

    #[test]
    fn from_trigger_assigns_identity() {
        let ev = SignalEvent::from_trigger("binance", sample_trigger(), sample_breakdown());
        assert_eq!(ev.signal_type(), SignalType::Breakout);
        assert_eq!(ev.score, 81);
        assert_eq!(ev.dedupe_key, "binance:SOLUSDT:4h:BREAKOUT:100.0");
        assert_eq!(ev.event_id.len(), 64);
    }

    #[test]
    fn approaching_is_not_publishable() {
        assert!(!SignalType::Approaching.is_publishable());
        assert!(SignalType::Breakout.is_publishable());
        assert!(SignalType::RetestOk.is_publishable());
    }

    #[test]
    fn trigger_detail_serializes_tagged() {
        let json = serde_json::to_value(TriggerDetail::RetestOk {
            retest_depth_pct: 1.0,
            retest_vol_ratio: 0.8,
            confirm_close_above: true,
            breakout_ts: 7,
        })
        .unwrap();
        assert_eq!(json["signal_type"], "RETEST_OK");
    }

    #[test]
    fn summary_mentions_key_fields() {
        let ev = SignalEvent::from_trigger("binance", sample_trigger(), sample_breakdown());
        let s = ev.summary();
        assert!(s.starts_with("SOLUSDT 4h BREAKOUT score 81"));
        assert!(s.contains("BTC_UP"));
    }
}
