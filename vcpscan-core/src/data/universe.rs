//! Universe construction: which symbols get scanned.
//!
//! Tickers are filtered to the quote asset, stripped of stablecoin and
//! leveraged-token bases, floored by 24h quote volume, ranked by that volume
//! and cut to `top_n`. Each member carries its liquidity bucket.

use serde::{Deserialize, Serialize};

use super::provider::Ticker;
use crate::config::UniverseConfig;
use crate::domain::LiquidityBucket;

/// One scannable symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniverseMember {
    pub symbol: String,
    pub base: String,
    pub quote_volume: f64,
    pub bucket: LiquidityBucket,
}

/// Ranked universe, highest quote volume first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub members: Vec<UniverseMember>,
}

impl Universe {
    /// Rank `tickers` into a universe.
    pub fn from_tickers(tickers: &[Ticker], quote_asset: &str, config: &UniverseConfig) -> Self {
        let mut members: Vec<UniverseMember> = tickers
            .iter()
            .filter_map(|t| {
                let base = t.symbol.strip_suffix(quote_asset)?;
                if base.is_empty() || is_excluded(base, config) {
                    return None;
                }
                if !t.quote_volume.is_finite() || t.quote_volume < config.min_quote_volume {
                    return None;
                }
                Some(UniverseMember {
                    symbol: t.symbol.clone(),
                    base: base.to_string(),
                    quote_volume: t.quote_volume,
                    bucket: config.bucket_for(t.quote_volume),
                })
            })
            .collect();

        members.sort_by(|a, b| {
            b.quote_volume
                .total_cmp(&a.quote_volume)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        members.truncate(config.top_n);
        Self { members }
    }

    /// Universe from an explicit symbol list, all in the same bucket.
    pub fn from_symbols(symbols: &[String], quote_asset: &str, bucket: LiquidityBucket) -> Self {
        let members = symbols
            .iter()
            .map(|symbol| UniverseMember {
                symbol: symbol.clone(),
                base: symbol
                    .strip_suffix(quote_asset)
                    .unwrap_or(symbol)
                    .to_string(),
                quote_volume: 0.0,
                bucket,
            })
            .collect();
        Self { members }
    }

    pub fn symbols(&self) -> Vec<&str> {
        self.members.iter().map(|m| m.symbol.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members.iter().any(|m| m.symbol == symbol)
    }

    /// Liquidity bucket of a member; symbols outside the universe are bucket C.
    pub fn bucket_of(&self, symbol: &str) -> LiquidityBucket {
        self.members
            .iter()
            .find(|m| m.symbol == symbol)
            .map(|m| m.bucket)
            .unwrap_or(LiquidityBucket::C)
    }
}

fn is_excluded(base: &str, config: &UniverseConfig) -> bool {
    if config.excluded_bases.iter().any(|b| b == base) {
        return true;
    }
    config
        .excluded_suffixes
        .iter()
        .any(|suffix| base.len() > suffix.len() && base.ends_with(suffix.as_str()))
}
