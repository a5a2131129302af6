//! Open positions and closed trades.
//!
//! An `OpenPosition` is created at entry and tracks the running high and
//! excursions bar by bar. Closing it produces a `Trade`, which is terminal.

use serde::{Deserialize, Serialize};

use vcpscan_core::domain::{Candle, Grade, MarketRegime, SignalType, Timeframe};

/// Terminal state of a closed trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExitReason {
    #[serde(rename = "STOPPED_OUT")]
    StopLoss,
    #[serde(rename = "TOOK_PROFIT")]
    TakeProfit,
    #[serde(rename = "TRAILING_STOPPED")]
    TrailingStop,
    #[serde(rename = "TIMED_OUT")]
    TimeExit,
    /// Still open when the simulated period ended.
    #[serde(rename = "FORCE_CLOSED")]
    ForceClosed,
}

impl ExitReason {
    pub const ALL: [ExitReason; 5] = [
        ExitReason::StopLoss,
        ExitReason::TakeProfit,
        ExitReason::TrailingStop,
        ExitReason::TimeExit,
        ExitReason::ForceClosed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "STOPPED_OUT",
            ExitReason::TakeProfit => "TOOK_PROFIT",
            ExitReason::TrailingStop => "TRAILING_STOPPED",
            ExitReason::TimeExit => "TIMED_OUT",
            ExitReason::ForceClosed => "FORCE_CLOSED",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A position between entry and exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: usize,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal_event_id: String,
    pub entry_type: SignalType,
    pub grade: Grade,
    pub market_regime: MarketRegime,
    pub score: u8,
    pub entry_ts: i64,
    /// Fill price, slippage included.
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub entry_fee: f64,
    pub running_high: f64,
    pub lowest_low: f64,
    pub bars_held: usize,
}

/// A pending exit decided on one bar, before slippage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitFill {
    pub ts: i64,
    pub raw_price: f64,
    pub reason: ExitReason,
}

impl OpenPosition {
    pub fn cost_basis(&self) -> f64 {
        self.entry_price * self.quantity
    }

    /// Capital at risk between entry and stop.
    pub fn initial_risk(&self) -> f64 {
        (self.entry_price - self.stop_loss) * self.quantity
    }

    /// Gross PnL if closed at `price` (no exit costs).
    pub fn unrealized(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity
    }

    /// Advance one bar and decide whether it exits.
    ///
    /// Priority is fixed: stop-loss, take-profit, trailing stop, time. A bar that
    /// opens through the stop (or target) fills at its open.
    pub fn on_bar(
        &mut self,
        bar: &Candle,
        trailing_stop_pct: Option<f64>,
        max_hold_bars: usize,
    ) -> Option<ExitFill> {
        self.bars_held += 1;
        self.running_high = self.running_high.max(bar.high);
        self.lowest_low = self.lowest_low.min(bar.low);

        let fill = |raw_price: f64, reason: ExitReason| {
            Some(ExitFill {
                ts: bar.ts,
                raw_price,
                reason,
            })
        };

        if bar.low <= self.stop_loss {
            return fill(bar.open.min(self.stop_loss), ExitReason::StopLoss);
        }
        if let Some(tp) = self.take_profit {
            if bar.high >= tp {
                return fill(bar.open.max(tp), ExitReason::TakeProfit);
            }
        }
        if let Some(pct) = trailing_stop_pct {
            let trail = self.running_high * (1.0 - pct / 100.0);
            if bar.close <= trail && bar.close > self.entry_price {
                return fill(bar.close, ExitReason::TrailingStop);
            }
        }
        if max_hold_bars > 0 && self.bars_held >= max_hold_bars {
            return fill(bar.close, ExitReason::TimeExit);
        }
        None
    }

    /// Close at `exit_price` (slippage already applied).
    pub fn close(
        self,
        exit_ts: i64,
        exit_price: f64,
        exit_fee: f64,
        reason: ExitReason,
        capital_before: f64,
    ) -> Trade {
        let pnl_gross = (exit_price - self.entry_price) * self.quantity;
        let fees_paid = self.entry_fee + exit_fee;
        let pnl_net = pnl_gross - fees_paid;
        let risk = self.initial_risk();
        let r_multiple = if risk > 0.0 { pnl_net / risk } else { 0.0 };
        let pct = |price: f64| (price - self.entry_price) / self.entry_price * 100.0;
        Trade {
            id: self.id,
            r_multiple,
            mae_pct: pct(self.lowest_low).min(0.0),
            mfe_pct: pct(self.running_high).max(0.0),
            symbol: self.symbol,
            timeframe: self.timeframe,
            signal_event_id: self.signal_event_id,
            entry_type: self.entry_type,
            grade: self.grade,
            market_regime: self.market_regime,
            score: self.score,
            entry_ts: self.entry_ts,
            entry_price: self.entry_price,
            quantity: self.quantity,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            exit_ts,
            exit_price,
            exit_reason: reason,
            fees_paid,
            pnl_gross,
            pnl_net,
            capital_before,
            capital_after: capital_before + pnl_net,
            bars_held: self.bars_held,
        }
    }
}

/// A closed simulated trade. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: usize,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal_event_id: String,
    pub entry_type: SignalType,
    pub grade: Grade,
    pub market_regime: MarketRegime,
    pub score: u8,
    pub entry_ts: i64,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub take_profit: Option<f64>,
    pub exit_ts: i64,
    pub exit_price: f64,
    pub exit_reason: ExitReason,
    pub fees_paid: f64,
    pub pnl_gross: f64,
    pub pnl_net: f64,
    pub capital_before: f64,
    pub capital_after: f64,
    /// Net PnL over initial risk.
    pub r_multiple: f64,
    /// Worst excursion below entry, percent (<= 0).
    pub mae_pct: f64,
    /// Best excursion above entry, percent (>= 0).
    pub mfe_pct: f64,
    pub bars_held: usize,
}

impl Trade {
    pub fn is_winner(&self) -> bool {
        self.pnl_net > 0.0
    }

    pub fn return_pct(&self) -> f64 {
        let basis = self.entry_price * self.quantity;
        if basis > 0.0 {
            self.pnl_net / basis * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_position() -> OpenPosition {
    use vcpscan_core::domain::BenchmarkRegime;
    OpenPosition {
        id: 1,
        symbol: "SOLUSDT".into(),
        timeframe: Timeframe::H4,
        signal_event_id: "ev".into(),
        entry_type: SignalType::Breakout,
        grade: Grade::A,
        market_regime: MarketRegime::new(BenchmarkRegime::Up, Grade::A),
        score: 80,
        entry_ts: 0,
        entry_price: 100.0,
        quantity: 10.0,
        stop_loss: 95.0,
        take_profit: Some(110.0),
        entry_fee: 1.0,
        running_high: 100.0,
        lowest_low: 100.0,
        bars_held: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            ts,
            open,
            high,
            low,
            close,
            volume: 1_000.0,
        }
    }

    #[test]
    fn stop_has_priority_over_target() {
        let mut p = sample_position();
        let exit = p.on_bar(&bar(1, 100.0, 111.0, 94.0, 105.0), None, 0).unwrap();
        assert_eq!(exit.reason, ExitReason::StopLoss);
        assert_eq!(exit.raw_price, 95.0);
    }

    #[test]
    fn gap_below_stop_fills_at_open() {
        let mut p = sample_position();
        let exit = p.on_bar(&bar(1, 92.0, 93.0, 90.0, 91.0), None, 0).unwrap();
        assert_eq!(exit.raw_price, 92.0);
    }

    #[test]
    fn take_profit_fills_at_target() {
        let mut p = sample_position();
        let exit = p.on_bar(&bar(1, 105.0, 112.0, 104.0, 108.0), None, 0).unwrap();
        assert_eq!(exit.reason, ExitReason::TakeProfit);
        assert_eq!(exit.raw_price, 110.0);
    }

    #[test]
    fn trailing_stop_never_exits_at_a_loss() {
        let mut p = sample_position();
        p.take_profit = None;
        // Run up to 108, then close at 99: below the 5% trail but below entry.
        assert!(p.on_bar(&bar(1, 100.0, 108.0, 99.5, 107.0), Some(5.0), 0).is_none());
        assert!(p.on_bar(&bar(2, 107.0, 107.0, 98.0, 99.0), Some(5.0), 0).is_none());
        // Close at 102: below trail (102.6) and above entry.
        let exit = p.on_bar(&bar(3, 99.0, 103.0, 98.5, 102.0), Some(5.0), 0).unwrap();
        assert_eq!(exit.reason, ExitReason::TrailingStop);
        assert_eq!(exit.raw_price, 102.0);
    }

    #[test]
    fn time_exit_after_max_hold() {
        let mut p = sample_position();
        assert!(p.on_bar(&bar(1, 100.0, 101.0, 99.0, 100.5), None, 2).is_none());
        let exit = p.on_bar(&bar(2, 100.5, 101.0, 99.0, 100.2), None, 2).unwrap();
        assert_eq!(exit.reason, ExitReason::TimeExit);
        assert_eq!(exit.raw_price, 100.2);
    }

    #[test]
    fn close_accounts_fees_and_r() {
        let mut p = sample_position();
        p.running_high = 108.0;
        p.lowest_low = 97.0;
        let trade = p.close(5, 105.0, 1.05, ExitReason::TakeProfit, 10_000.0);
        assert!((trade.pnl_gross - 50.0).abs() < 1e-9);
        assert!((trade.fees_paid - 2.05).abs() < 1e-9);
        assert!((trade.pnl_net - 47.95).abs() < 1e-9);
        assert!((trade.capital_after - 10_047.95).abs() < 1e-9);
        assert!((trade.r_multiple - 47.95 / 50.0).abs() < 1e-9);
        assert!((trade.mae_pct + 3.0).abs() < 1e-9);
        assert!((trade.mfe_pct - 8.0).abs() < 1e-9);
        assert!(trade.is_winner());
    }
}
