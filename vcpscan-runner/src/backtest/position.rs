//! Position manager: at most one open position per symbol, closed trades appended.

use std::collections::BTreeMap;

use vcpscan_core::domain::{Candle, SignalEvent};

use super::config::{BacktestConfig, EntryRejection, SizingMode, StopMode};
use super::trade::{ExitReason, OpenPosition, Trade};

/// Smallest notional worth opening.
const MIN_ALLOCATION: f64 = 1e-6;

/// Owns open positions, the closed-trade list and realized capital.
#[derive(Debug, Clone)]
pub struct PositionManager {
    config: BacktestConfig,
    capital: f64,
    open: BTreeMap<String, OpenPosition>,
    closed: Vec<Trade>,
    next_id: usize,
}

impl PositionManager {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            capital: config.initial_capital,
            config,
            open: BTreeMap::new(),
            closed: Vec::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Realized capital: initial capital plus net PnL of closed trades.
    pub fn capital(&self) -> f64 {
        self.capital
    }

    pub fn open_positions(&self) -> &BTreeMap<String, OpenPosition> {
        &self.open
    }

    pub fn closed_trades(&self) -> &[Trade] {
        &self.closed
    }

    pub fn into_closed_trades(self) -> Vec<Trade> {
        self.closed
    }

    pub fn has_open(&self, symbol: &str) -> bool {
        self.open.contains_key(symbol)
    }

    /// Capital tied up in open positions at cost.
    pub fn committed(&self) -> f64 {
        self.open.values().map(OpenPosition::cost_basis).sum()
    }

    /// Capital available for a new entry, net of the entry fee it will pay.
    pub fn available(&self) -> f64 {
        (self.capital - self.committed()).max(0.0)
    }

    /// Mark-to-market equity. Positions without a mark are valued at cost.
    pub fn equity(&self, marks: &BTreeMap<String, f64>) -> f64 {
        self.capital
            + self
                .open
                .values()
                .map(|p| {
                    let mark = marks.get(&p.symbol).copied().unwrap_or(p.entry_price);
                    p.unrealized(mark) - p.entry_fee
                })
                .sum::<f64>()
    }

    /// Stop-loss for a fill at `entry_price`.
    pub fn stop_for(&self, event: &SignalEvent, entry_price: f64) -> f64 {
        match self.config.stop_mode {
            StopMode::PivotBased => event.pivot() * (1.0 - self.config.stop_pct / 100.0),
            StopMode::AtrMult => {
                let atr = event.setup.atr_pct / 100.0 * entry_price;
                entry_price - atr * self.config.atr_stop_mult
            }
            StopMode::FixedPct => entry_price * (1.0 - self.config.fixed_stop_pct / 100.0),
        }
    }

    /// Notional for a new position, before the available-capital cap.
    pub fn allocation_for(&self, event: &SignalEvent) -> f64 {
        let base = self.capital / self.config.max_concurrent_positions as f64;
        let scaled = match self.config.sizing {
            SizingMode::Equal => base,
            SizingMode::ScoreWeighted => base * (0.5 + f64::from(event.score) / 100.0),
            SizingMode::Volatility => {
                let atr = event.setup.atr_pct;
                let scale = if atr > 0.0 {
                    (self.config.target_atr_pct / atr).clamp(0.25, 1.0)
                } else {
                    1.0
                };
                base * scale
            }
        };
        scaled.min(self.capital * self.config.max_position_pct / 100.0)
    }

    /// Try to open a position for `event` at `raw_price` (the signal close).
    pub fn try_open(&mut self, event: &SignalEvent, raw_price: f64) -> Result<(), EntryRejection> {
        if let Some(reason) = self.config.entry_rejection(event) {
            return Err(reason);
        }
        if self.has_open(&event.symbol) {
            return Err(EntryRejection::PositionAlreadyOpen);
        }
        if self.open.len() >= self.config.max_concurrent_positions {
            return Err(EntryRejection::MaxPositions);
        }

        let entry_price = raw_price * (1.0 + self.config.slippage_pct / 100.0);
        let stop_loss = self.stop_for(event, entry_price);
        if !(stop_loss > 0.0 && stop_loss < entry_price) {
            return Err(EntryRejection::InvalidStop);
        }

        let cost_rate = self.config.side_cost_rate();
        let notional = self
            .allocation_for(event)
            .min(self.available() / (1.0 + cost_rate));
        if notional < MIN_ALLOCATION {
            return Err(EntryRejection::InsufficientCapital);
        }
        let quantity = notional / entry_price;

        let position = OpenPosition {
            id: self.next_id,
            symbol: event.symbol.clone(),
            timeframe: event.timeframe,
            signal_event_id: event.event_id.clone(),
            entry_type: event.signal_type(),
            grade: event.setup.grade(),
            market_regime: event.setup.regime,
            score: event.score,
            entry_ts: event.ts,
            entry_price,
            quantity,
            stop_loss,
            take_profit: self
                .config
                .take_profit_pct
                .map(|pct| entry_price * (1.0 + pct / 100.0)),
            entry_fee: entry_price * quantity * cost_rate,
            running_high: entry_price,
            lowest_low: entry_price,
            bars_held: 0,
        };
        self.next_id += 1;
        self.open.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Apply one bar to `symbol`'s open position; returns the closed trade if it exited.
    pub fn on_bar(&mut self, symbol: &str, bar: &Candle) -> Option<&Trade> {
        let position = self.open.get_mut(symbol)?;
        if bar.ts <= position.entry_ts {
            return None;
        }
        let fill = position.on_bar(bar, self.config.trailing_stop_pct, self.config.max_hold_bars)?;
        self.close(symbol, fill.ts, fill.raw_price, fill.reason)
    }

    /// Close `symbol` at `raw_price` less slippage.
    pub fn close(
        &mut self,
        symbol: &str,
        ts: i64,
        raw_price: f64,
        reason: ExitReason,
    ) -> Option<&Trade> {
        let position = self.open.remove(symbol)?;
        let exit_price = raw_price * (1.0 - self.config.slippage_pct / 100.0);
        let exit_fee = exit_price * position.quantity * self.config.side_cost_rate();
        let trade = position.close(ts, exit_price, exit_fee, reason, self.capital);
        self.capital = trade.capital_after;
        self.closed.push(trade);
        self.closed.last()
    }

    /// Force-close every open position at its last known price.
    pub fn force_close_all(&mut self, last: &BTreeMap<String, Candle>) {
        let symbols: Vec<String> = self.open.keys().cloned().collect();
        for symbol in symbols {
            let (ts, price) = match (last.get(&symbol), self.open.get(&symbol)) {
                (Some(c), _) => (c.ts, c.close),
                (None, Some(p)) => (p.entry_ts, p.entry_price),
                (None, None) => continue,
            };
            self.close(&symbol, ts, price, ExitReason::ForceClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::*;

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

    fn frictionless() -> BacktestConfig {
        BacktestConfig {
            commission_pct: 0.0,
            slippage_pct: 0.0,
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn one_position_per_symbol() {
        let mut pm = PositionManager::new(BacktestConfig::default());
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        pm.try_open(&ev, 101.5).unwrap();
        assert_eq!(
            pm.try_open(&ev, 101.5),
            Err(EntryRejection::PositionAlreadyOpen)
        );
        assert_eq!(pm.open_positions().len(), 1);
    }

    #[test]
    fn max_concurrent_positions_enforced() {
        let mut pm = PositionManager::new(BacktestConfig {
            max_concurrent_positions: 2,
            ..BacktestConfig::default()
        });
        for (i, sym) in ["AUSDT", "BUSDT"].iter().enumerate() {
            pm.try_open(&breakout(sym, DAY0 + i as i64, 100.0, 80), 101.0)
                .unwrap();
        }
        assert_eq!(
            pm.try_open(&breakout("CUSDT", DAY0, 100.0, 80), 101.0),
            Err(EntryRejection::MaxPositions)
        );
    }

    #[test]
    fn equal_sizing_capped_by_max_position_pct() {
        let pm = PositionManager::new(BacktestConfig {
            max_concurrent_positions: 2,
            max_position_pct: 25.0,
            ..frictionless()
        });
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        // 10_000 / 2 = 5_000, capped to 2_500.
        assert!((pm.allocation_for(&ev) - 2_500.0).abs() < 1e-9);
    }

    #[test]
    fn score_and_volatility_sizing() {
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        let score = PositionManager::new(BacktestConfig {
            sizing: SizingMode::ScoreWeighted,
            max_position_pct: 100.0,
            ..frictionless()
        });
        assert!((score.allocation_for(&ev) - 2_000.0 * 1.3).abs() < 1e-9);

        let mut volatile = ev.clone();
        volatile.setup.atr_pct = 6.0;
        let vol = PositionManager::new(BacktestConfig {
            sizing: SizingMode::Volatility,
            target_atr_pct: 3.0,
            max_position_pct: 100.0,
            ..frictionless()
        });
        assert!((vol.allocation_for(&volatile) - 1_000.0).abs() < 1e-9);
        assert!((vol.allocation_for(&ev) - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn stop_modes() {
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        let pm = |stop_mode| {
            PositionManager::new(BacktestConfig {
                stop_mode,
                ..frictionless()
            })
        };
        assert!((pm(StopMode::PivotBased).stop_for(&ev, 101.5) - 97.0).abs() < 1e-9);
        // ATR 2% of 100 = 2, times 2.
        assert!((pm(StopMode::AtrMult).stop_for(&ev, 100.0) - 96.0).abs() < 1e-9);
        assert!((pm(StopMode::FixedPct).stop_for(&ev, 100.0) - 95.0).abs() < 1e-9);
    }

    #[test]
    fn fees_and_slippage_per_side() {
        let config = BacktestConfig {
            commission_pct: 0.1,
            slippage_pct: 0.1,
            take_profit_pct: None,
            trailing_stop_pct: None,
            ..BacktestConfig::default()
        };
        let mut pm = PositionManager::new(config);
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        pm.try_open(&ev, 100.0).unwrap();
        let pos = pm.open_positions()["SOLUSDT"].clone();
        assert!((pos.entry_price - 100.1).abs() < 1e-9);
        assert!((pos.entry_fee - pos.cost_basis() * 0.002).abs() < 1e-9);

        let trade = pm
            .close("SOLUSDT", DAY0 + HOUR, 110.0, ExitReason::TimeExit)
            .unwrap()
            .clone();
        assert!((trade.exit_price - 109.89).abs() < 1e-9);
        let exit_fee = trade.exit_price * trade.quantity * 0.002;
        assert!((trade.fees_paid - (pos.entry_fee + exit_fee)).abs() < 1e-9);
        assert!((trade.pnl_net - (trade.pnl_gross - trade.fees_paid)).abs() < 1e-9);
        assert!((pm.capital() - trade.capital_after).abs() < 1e-9);
    }

    #[test]
    fn entry_bar_does_not_exit() {
        let mut pm = PositionManager::new(frictionless());
        let ev = breakout("SOLUSDT", DAY0, 100.0, 80);
        pm.try_open(&ev, 101.5).unwrap();
        assert!(pm.on_bar("SOLUSDT", &bar(DAY0, 99.0, 102.0, 90.0, 101.5)).is_none());
        let trade = pm
            .on_bar("SOLUSDT", &bar(DAY0 + HOUR, 101.0, 101.0, 96.0, 96.5))
            .unwrap();
        assert_eq!(trade.exit_reason, ExitReason::StopLoss);
        assert!((trade.exit_price - 97.0).abs() < 1e-9);
    }

    #[test]
    fn force_close_empties_book() {
        let mut pm = PositionManager::new(frictionless());
        pm.try_open(&breakout("AUSDT", DAY0, 100.0, 80), 101.0).unwrap();
        pm.try_open(&breakout("BUSDT", DAY0, 100.0, 80), 101.0).unwrap();
        let mut last = BTreeMap::new();
        last.insert("AUSDT".to_string(), bar(DAY0 + HOUR, 101.0, 105.0, 100.0, 104.0));
        pm.force_close_all(&last);
        assert!(pm.open_positions().is_empty());
        assert_eq!(pm.closed_trades().len(), 2);
        assert!(pm
            .closed_trades()
            .iter()
            .all(|t| t.exit_reason == ExitReason::ForceClosed));
    }
}
