//! Market data: candle sources, validation, universe construction and the fetch pool.

pub mod binance;
pub mod circuit_breaker;
pub mod fetcher;
pub mod provider;
pub mod synthetic;
pub mod universe;
pub mod validate;

pub use binance::BinanceSource;
pub use circuit_breaker::CircuitBreaker;
pub use fetcher::{FetchJob, FetchOutcome, FetchPool, FetchStats};
pub use provider::{CandleSource, DataError, DataSource, Ticker};
pub use synthetic::SyntheticSource;
pub use universe::{Universe, UniverseMember};
pub use validate::validate_series;
