//! vcpscan core: domain types, indicators, candle sources, VCP detection,
//! triggers and scoring.
//!
//! This crate is pure computation plus the candle-source boundary:
//! - Domain types (candles, setups, signal events, regimes, identities)
//! - Indicator library (EMA, SMA, ATR, wick ratio)
//! - Candle sources (Binance REST, synthetic), validation, universe, fetch pool
//! - Tiered pattern detector, breakout/retest triggers, composite scorer
//! - Scanner configuration

pub mod analysis;
pub mod config;
pub mod data;
pub mod detect;
pub mod domain;
pub mod indicators;
pub mod scoring;

pub use analysis::{analyze_symbol, SymbolAnalysis};
pub use config::{ConfigError, PublishConfig, ScannerConfig, ScoringWeights, TimeframeParams};
pub use scoring::Scorer;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types crossing the fetch pool and rayon boundaries are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::Candle>();
        require_sync::<domain::Candle>();
        require_send::<domain::SetupCandidate>();
        require_sync::<domain::SetupCandidate>();
        require_send::<domain::SignalEvent>();
        require_sync::<domain::SignalEvent>();
        require_send::<data::DataError>();
        require_sync::<data::DataError>();
        require_send::<data::FetchOutcome>();
        require_send::<data::BinanceSource>();
        require_sync::<data::BinanceSource>();
        require_send::<data::SyntheticSource>();
        require_sync::<data::SyntheticSource>();
        require_send::<config::ScannerConfig>();
        require_sync::<config::ScannerConfig>();
        require_send::<Scorer>();
        require_sync::<Scorer>();
    }

    #[test]
    fn send_sync_compiles() {
        assert_send_sync();
    }
}
