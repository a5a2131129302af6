//! Domain types for the VCP scanner

pub mod candle;
pub mod ids;
pub mod regime;
pub mod setup;
pub mod signal;

pub use candle::{last_index_at_or_before, ms_to_datetime, Candle, Timeframe};
pub use ids::{dedupe_key, event_id, format_pivot};
pub use regime::{BenchmarkRegime, Grade, LiquidityBucket, MarketRegime};
pub use setup::SetupCandidate;
pub use signal::{ScoreBreakdown, SignalEvent, SignalType, TriggerDetail, TriggerEvent};

/// Symbol type alias
pub type Symbol = String;
