//! vcpscan runner: scan orchestration, signal persistence, backtesting.
//!
//! This crate builds on `vcpscan-core` to provide:
//! - Durable dedup/cooldown store and published-signal log (SQLite)
//! - Publish gate with tagging and retrying writes
//! - Scanner pipeline: universe → fetch pool → detection → publish → report
//! - Position manager and chronological trade simulator
//! - Backtest metrics with per-regime and per-grade breakdowns
//! - Look-ahead-free signal replay
//! - Walk-forward validation over rolling calendar windows
//! - JSON / CSV / Markdown export

pub mod backtest;
pub mod export;
pub mod metrics;
pub mod publish;
pub mod replay;
pub mod scanner;
pub mod store;
pub mod walk_forward;

pub use backtest::{
    simulate, BacktestConfig, BacktestResult, EntryRejection, EntryTrigger, EquityPoint,
    ExitReason, GateColor, GatePreset, PositionManager, SimulationError, SimulationInput,
    SizingMode, StopMode, Trade,
};
pub use metrics::{BacktestMetrics, BreakdownStats};
pub use publish::{GateDecision, GateRejection, PublishError, PublishOutcome, Publisher};
pub use replay::{ReplayError, ReplayInput, ReplayResult, SignalReplay};
pub use scanner::{ScanError, ScanReport, Scanner, TopSignal};
pub use store::{DuplicateReason, SignalStore, StoreError, StoreOutcome, StoredSignal};
pub use walk_forward::{
    create_windows, run_walk_forward, WalkForwardConfig, WalkForwardError, WalkForwardInput,
    WalkForwardResult, WalkForwardWindow, WindowSpec,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn results_are_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<ReplayResult>();
        assert_sync::<ReplayResult>();
        assert_send::<WalkForwardResult>();
        assert_sync::<WalkForwardResult>();
        assert_send::<ScanReport>();
        assert_sync::<ScanReport>();
    }

    #[test]
    fn engines_are_send_sync() {
        assert_send::<SignalReplay>();
        assert_sync::<SignalReplay>();
        assert_send::<Publisher>();
        assert_sync::<Publisher>();
        assert_send::<Scanner>();
        assert_sync::<Scanner>();
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
    }

    #[test]
    fn store_moves_between_threads() {
        assert_send::<SignalStore>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<StoreError>();
        assert_sync::<StoreError>();
        assert_send::<ScanError>();
        assert_sync::<ScanError>();
        assert_send::<WalkForwardError>();
        assert_sync::<WalkForwardError>();
    }
}
