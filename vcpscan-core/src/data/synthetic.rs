//! Deterministic synthetic candles.
//!
//! Used by tests, benchmarks and the CLI's offline mode. Paths are built from
//! straight-line legs so swing structure is exact: a rising leg has strictly
//! rising highs, a falling leg strictly falling highs, and turning points are
//! the only swing highs/lows.

use chrono::{TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{CandleSource, DataError, DataSource, Ticker};
use crate::domain::{Candle, Timeframe};

/// Wick added above the body high and below the body low, as a fraction of price.
pub const WICK_FRAC: f64 = 0.004;

/// Volume of an ordinary synthetic candle.
pub const BASE_VOLUME: f64 = 1_000.0;

// ─── Path building ───────────────────────────────────────────────────

/// Builds a close-price path from linear legs.
#[derive(Debug, Clone)]
pub struct PathBuilder {
    closes: Vec<f64>,
}

impl PathBuilder {
    pub fn new(start: f64) -> Self {
        Self {
            closes: vec![start],
        }
    }

    pub fn last(&self) -> f64 {
        *self.closes.last().unwrap_or(&0.0)
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Move linearly to `target` over `bars` candles (the last one closes at `target`).
    pub fn leg(mut self, target: f64, bars: usize) -> Self {
        let from = self.last();
        let bars = bars.max(1);
        for i in 1..=bars {
            let t = i as f64 / bars as f64;
            self.closes.push(from + (target - from) * t);
        }
        self
    }

    pub fn build(self) -> Vec<f64> {
        self.closes
    }
}

/// Close level whose candle high equals `high`.
pub fn close_for_high(high: f64) -> f64 {
    high / (1.0 + WICK_FRAC)
}

/// Close level whose candle low equals `low`.
pub fn close_for_low(low: f64) -> f64 {
    low / (1.0 - WICK_FRAC)
}

/// Turn a close path into candles: open = previous close, constant wick fraction.
pub fn candles_from_closes(
    closes: &[f64],
    volumes: &[f64],
    start_ts: i64,
    timeframe: Timeframe,
) -> Vec<Candle> {
    let step = timeframe.duration_ms();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                ts: start_ts + i as i64 * step,
                open,
                high: open.max(close) * (1.0 + WICK_FRAC),
                low: open.min(close) * (1.0 - WICK_FRAC),
                close,
                volume: volumes.get(i).copied().unwrap_or(BASE_VOLUME),
            }
        })
        .collect()
}

// ─── Scenarios ───────────────────────────────────────────────────────

/// A textbook three-contraction base ending in a breakout candle.
#[derive(Debug, Clone, PartialEq)]
pub struct VcpScenario {
    pub timeframe: Timeframe,
    pub start_ts: i64,
    pub total_bars: usize,
    pub start_price: f64,
    /// Close where the prior trend ends and the final advance into the pivot begins.
    pub prior_trend_end: f64,
    /// High of the first contraction; becomes the pivot.
    pub pivot_high: f64,
    /// Swing highs of the second and third contractions.
    pub later_highs: [f64; 2],
    /// Contraction depths in percent, oldest first.
    pub contractions: [f64; 3],
    /// Breakout candle close above the pivot, percent.
    pub breakout_pct: f64,
    /// Breakout candle volume over the base volume.
    pub breakout_vol_ratio: f64,
}

impl Default for VcpScenario {
    fn default() -> Self {
        Self {
            timeframe: Timeframe::H4,
            start_ts: Utc
                .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
                .single()
                .map(|d| d.timestamp_millis())
                .unwrap_or(0),
            total_bars: 300,
            start_price: 40.0,
            prior_trend_end: 75.0,
            pivot_high: 100.0,
            later_highs: [99.0, 98.0],
            contractions: [12.0, 7.0, 3.0],
            breakout_pct: 1.5,
            breakout_vol_ratio: 2.0,
        }
    }
}

impl VcpScenario {
    /// Bars of the fixed-length base legs (three drops, two recoveries).
    const BASE_LEGS: [usize; 5] = [14, 16, 12, 12, 10];
    /// Bars of the final recovery toward the pivot.
    const APPROACH_BARS: usize = 33;
    /// Bars of the advance into the first swing high.
    const ADVANCE_BARS: usize = 50;

    /// Index of the first contraction's swing high.
    pub fn pivot_index(&self) -> usize {
        let base: usize = Self::BASE_LEGS.iter().sum();
        self.total_bars - 2 - Self::APPROACH_BARS - base
    }

    /// The close-price path before the breakout candle.
    fn base_path(&self) -> Vec<f64> {
        let [c1, c2, c3] = self.contractions;
        let [h2, h3] = self.later_highs;
        let h1 = self.pivot_high;
        let lows = [h1 * (1.0 - c1 / 100.0), h2 * (1.0 - c2 / 100.0), h3 * (1.0 - c3 / 100.0)];
        let [d1, u1, d2, u2, d3] = Self::BASE_LEGS;

        let prior_bars = self.pivot_index() - Self::ADVANCE_BARS;
        // Recover to just under the third high's level without making a new swing high.
        let approach_close = close_for_high(h3 + (h1 - h3) * 0.5);

        PathBuilder::new(self.start_price)
            .leg(self.prior_trend_end, prior_bars)
            .leg(close_for_high(h1), Self::ADVANCE_BARS)
            .leg(close_for_low(lows[0]), d1)
            .leg(close_for_high(h2), u1)
            .leg(close_for_low(lows[1]), d2)
            .leg(close_for_high(h3), u2)
            .leg(close_for_low(lows[2]), d3)
            .leg(approach_close, Self::APPROACH_BARS)
            .build()
    }

    /// Full series: base path plus the breakout candle.
    pub fn series(&self) -> Vec<Candle> {
        let mut closes = self.base_path();
        closes.push(self.pivot_high * (1.0 + self.breakout_pct / 100.0));
        let mut volumes = vec![BASE_VOLUME; closes.len()];
        if let Some(last) = volumes.last_mut() {
            *last = BASE_VOLUME * self.breakout_vol_ratio;
        }
        candles_from_closes(&closes, &volumes, self.start_ts, self.timeframe)
    }

    /// Series truncated before the breakout candle (an APPROACHING-or-nothing state).
    pub fn series_without_breakout(&self) -> Vec<Candle> {
        let closes = self.base_path();
        let volumes = vec![BASE_VOLUME; closes.len()];
        candles_from_closes(&closes, &volumes, self.start_ts, self.timeframe)
    }
}

/// The default three-contraction breakout series (300 bars, 4h).
pub fn vcp_breakout_series() -> Vec<Candle> {
    VcpScenario::default().series()
}

/// Steady trend: `drift_pct` percent per bar from `start_price`.
pub fn trending_series(
    start_ts: i64,
    timeframe: Timeframe,
    bars: usize,
    start_price: f64,
    drift_pct: f64,
) -> Vec<Candle> {
    let closes: Vec<f64> = (0..bars)
        .map(|i| start_price * (1.0 + drift_pct / 100.0).powi(i as i32))
        .collect();
    let volumes = vec![BASE_VOLUME; bars];
    candles_from_closes(&closes, &volumes, start_ts, timeframe)
}

// ─── Seeded market simulation ────────────────────────────────────────

/// Deterministic RNG seeded from a symbol name.
pub fn rng_for(symbol: &str) -> StdRng {
    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    StdRng::from_seed(seed)
}

/// Repeating cycles of advance, three-contraction base, breakout, follow-through
/// and correction. Roughly half of the breakouts fail.
pub fn cyclic_vcp_market(rng: &mut StdRng, bars: usize, start_price: f64) -> (Vec<f64>, Vec<f64>) {
    let mut path = PathBuilder::new(start_price);
    let mut volumes = vec![BASE_VOLUME];
    fn push_volumes(volumes: &mut Vec<f64>, n: usize, rng: &mut StdRng) {
        for _ in 0..n {
            volumes.push(BASE_VOLUME * rng.gen_range(0.8..1.2));
        }
    }

    while path.len() < bars {
        let before = path.len();
        let advance = rng.gen_range(1.25..1.6);
        let h1 = path.last() * advance * (1.0 + WICK_FRAC);
        let c1 = rng.gen_range(10.0..16.0);
        let c2 = c1 / rng.gen_range(1.4..1.9);
        let c3 = c2 / rng.gen_range(1.4..2.2);
        let h2 = h1 * (1.0 - rng.gen_range(0.005..0.015));
        let h3 = h2 * (1.0 - rng.gen_range(0.005..0.015));
        let l1 = h1 * (1.0 - c1 / 100.0);
        let l2 = h2 * (1.0 - c2 / 100.0);
        let l3 = h3 * (1.0 - c3 / 100.0);

        path = path
            .leg(close_for_high(h1), rng.gen_range(60..120))
            .leg(close_for_low(l1), rng.gen_range(10..18))
            .leg(close_for_high(h2), rng.gen_range(10..18))
            .leg(close_for_low(l2), rng.gen_range(8..14))
            .leg(close_for_high(h3), rng.gen_range(8..14))
            .leg(close_for_low(l3), rng.gen_range(6..10))
            .leg(close_for_high((h1 + h3) / 2.0), rng.gen_range(10..20));
        push_volumes(&mut volumes, path.len() - before, rng);

        // Breakout candle with a volume spike.
        path = path.leg(h1 * (1.0 + rng.gen_range(0.8..2.5) / 100.0), 1);
        volumes.push(BASE_VOLUME * rng.gen_range(1.5..3.0));

        let before_follow = path.len();
        let follow = if rng.gen_bool(0.55) {
            path.last() * rng.gen_range(1.08..1.25)
        } else {
            path.last() * rng.gen_range(0.85..0.95)
        };
        let correction = follow * rng.gen_range(0.7..0.85);
        path = path
            .leg(follow, rng.gen_range(15..40))
            .leg(correction, rng.gen_range(40..80));
        push_volumes(&mut volumes, path.len() - before_follow, rng);
    }

    let mut closes = path.build();
    closes.truncate(bars);
    volumes.truncate(bars);
    (closes, volumes)
}

// ─── Offline source ──────────────────────────────────────────────────

/// Fixed origin every synthetic series starts from, so range queries agree.
pub const SYNTHETIC_ORIGIN_MS: i64 = 1_577_836_800_000; // 2020-01-01T00:00:00Z

/// Offline `CandleSource` producing seeded cyclic VCP markets per symbol.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    symbols: Vec<String>,
    /// Wall clock the source pretends it is; `fetch_candles` ends at the last
    /// candle closed by then.
    now_ms: i64,
}

impl SyntheticSource {
    pub fn new(symbols: Vec<String>, now_ms: i64) -> Self {
        Self { symbols, now_ms }
    }

    /// Default offline universe.
    pub fn default_universe(now_ms: i64) -> Self {
        let symbols = [
            "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "ADAUSDT", "AVAXUSDT",
            "LINKUSDT", "DOTUSDT", "NEARUSDT", "ATOMUSDT", "INJUSDT",
        ];
        Self::new(symbols.iter().map(|s| s.to_string()).collect(), now_ms)
    }

    fn knows(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }

    /// Full series from the origin through `end_ms` (inclusive open times).
    fn series_until(&self, symbol: &str, timeframe: Timeframe, end_ms: i64) -> Vec<Candle> {
        let step = timeframe.duration_ms();
        if end_ms < SYNTHETIC_ORIGIN_MS {
            return Vec::new();
        }
        let bars = ((end_ms - SYNTHETIC_ORIGIN_MS) / step + 1) as usize;
        let mut rng = rng_for(&format!("{symbol}:{timeframe}"));
        let start_price = rng.gen_range(5.0..500.0);
        let (closes, volumes) = cyclic_vcp_market(&mut rng, bars, start_price);
        candles_from_closes(&closes, &volumes, SYNTHETIC_ORIGIN_MS, timeframe)
    }
}

impl CandleSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn source(&self) -> DataSource {
        DataSource::Synthetic
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, DataError> {
        if !self.knows(symbol) {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let last_closed = self.now_ms - timeframe.duration_ms();
        let mut candles = self.series_until(symbol, timeframe, last_closed);
        let skip = candles.len().saturating_sub(limit);
        candles.drain(..skip);
        Ok(candles)
    }

    fn fetch_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, DataError> {
        if !self.knows(symbol) {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        Ok(self
            .series_until(symbol, timeframe, end_ms)
            .into_iter()
            .filter(|c| c.ts >= start_ms)
            .collect())
    }

    fn tickers(&self) -> Result<Vec<Ticker>, DataError> {
        Ok(self
            .symbols
            .iter()
            .map(|symbol| {
                let mut rng = rng_for(symbol);
                Ticker {
                    symbol: symbol.clone(),
                    last_price: rng.gen_range(1.0..1_000.0),
                    quote_volume: rng.gen_range(2_000_000.0..400_000_000.0),
                }
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        true
    }
}
