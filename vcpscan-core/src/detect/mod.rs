//! Detection: swing structure, benchmark regime, tiered VCP bases and triggers.
//!
//! Everything here is pure and only reads candles up to the evaluated index.

pub mod pattern;
pub mod regime;
pub mod swing;
pub mod trigger;

pub use pattern::{detect_setup, GradeRule, SetupInput, GRADE_RULES, MIN_HISTORY_BARS};
pub use regime::{benchmark_regime, MIN_BENCHMARK_BARS};
pub use swing::swing_highs;
pub use trigger::{detect_breakout, detect_retest, PriorBreakout};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a symbol produced no setup this cycle.
///
/// These are expected, high-frequency outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    InsufficientHistory,
    IndicatorUndefined,
    NoQualifyingBase,
    AtrOutOfBounds,
    InvalidCandles,
}

impl SkipReason {
    pub const ALL: [SkipReason; 5] = [
        SkipReason::InsufficientHistory,
        SkipReason::IndicatorUndefined,
        SkipReason::NoQualifyingBase,
        SkipReason::AtrOutOfBounds,
        SkipReason::InvalidCandles,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InsufficientHistory => "insufficient_history",
            SkipReason::IndicatorUndefined => "indicator_undefined",
            SkipReason::NoQualifyingBase => "no_qualifying_base",
            SkipReason::AtrOutOfBounds => "atr_out_of_bounds",
            SkipReason::InvalidCandles => "invalid_candles",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
