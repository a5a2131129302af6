//! Per-symbol evaluation: setup → trigger → score.
//!
//! Shared by the live scanner and the replay engine so both see the exact same
//! pipeline. Pure: the only input is the candle slice ending at the evaluated
//! candle.

use crate::config::TimeframeParams;
use crate::detect::{
    detect_breakout, detect_retest, detect_setup, PriorBreakout, SetupInput, SkipReason,
};
use crate::domain::{SetupCandidate, SignalEvent};
use crate::scoring::Scorer;

/// Everything one symbol/timeframe produced at one candle.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolAnalysis {
    pub setup: Result<SetupCandidate, SkipReason>,
    /// Scored BREAKOUT / APPROACHING / RETEST_OK events, in that order.
    pub events: Vec<SignalEvent>,
}

impl SymbolAnalysis {
    pub fn has_setup(&self) -> bool {
        self.setup.is_ok()
    }
}

/// Evaluate the last candle of `input.candles`.
///
/// Retests are checked against every `priors` breakout regardless of whether a
/// fresh setup exists: the base that was broken may no longer qualify once
/// price has left it.
pub fn analyze_symbol(
    exchange: &str,
    input: &SetupInput<'_>,
    priors: &[PriorBreakout],
    scorer: &Scorer,
) -> SymbolAnalysis {
    let params: &TimeframeParams = input.params;
    let setup = detect_setup(input);
    let mut events = Vec::new();

    if let (Ok(setup), Some(last)) = (&setup, input.candles.last()) {
        if let Some(trigger) = detect_breakout(setup, last, params) {
            let breakdown = scorer.score(&trigger, params);
            events.push(SignalEvent::from_trigger(exchange, trigger, breakdown));
        }
    }

    for prior in priors {
        if let Some(trigger) = detect_retest(prior, input.candles, params) {
            let breakdown = scorer.score(&trigger, params);
            events.push(SignalEvent::from_trigger(exchange, trigger, breakdown));
        }
    }

    SymbolAnalysis { setup, events }
}
