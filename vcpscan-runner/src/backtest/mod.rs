//! Backtest simulator: signal stream in, trades and metrics out.

pub mod config;
pub mod position;
pub mod simulator;
pub mod trade;

pub use config::{
    BacktestConfig, EntryRejection, EntryTrigger, GateColor, GatePreset, SizingMode, StopMode,
};
pub use position::PositionManager;
pub use simulator::{simulate, BacktestResult, EquityPoint, SimulationError, SimulationInput};
pub use trade::{ExitReason, OpenPosition, Trade};
