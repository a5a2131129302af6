//! Scanner configuration.
//!
//! Loaded from TOML; every section has defaults so a partial file (or none at
//! all) yields a working configuration. Scoring weights and normalisation
//! bounds are policy, so they live here rather than as constants in the scorer.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detect::MIN_HISTORY_BARS;
use crate::domain::{LiquidityBucket, SignalType, Timeframe};

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 32;
/// Upper bound on store write attempts per signal.
pub const MAX_WRITE_RETRIES: u32 = 10;

// ─── Scanner ─────────────────────────────────────────────────────────

/// Top-level configuration for one scan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Exchange id used in event ids and dedupe keys.
    pub exchange: String,
    pub quote_asset: String,
    /// Symbol whose trend defines the benchmark regime.
    pub benchmark_symbol: String,
    pub universe: UniverseConfig,
    pub timeframes: Vec<Timeframe>,
    /// Candles requested per symbol and timeframe.
    pub candle_limit: usize,
    /// Concurrent fetch workers. Clamped to 1..=32.
    pub concurrency: usize,
    /// Bounded channel between fetch workers and detection.
    pub channel_capacity: usize,
    /// Per-timeframe overrides; missing timeframes use `TimeframeParams::for_timeframe`.
    pub params: BTreeMap<Timeframe, TimeframeParams>,
    pub weights: ScoringWeights,
    pub publish: PublishConfig,
    /// SQLite file backing the dedup and signal tables.
    pub store_path: String,
    /// Number of top signals included in the scan report.
    pub report_top_n: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            exchange: "binance".into(),
            quote_asset: "USDT".into(),
            benchmark_symbol: "BTCUSDT".into(),
            universe: UniverseConfig::default(),
            timeframes: vec![Timeframe::H4, Timeframe::D1],
            candle_limit: 500,
            concurrency: 8,
            channel_capacity: 64,
            params: BTreeMap::new(),
            weights: ScoringWeights::default(),
            publish: PublishConfig::default(),
            store_path: "vcpscan.sqlite".into(),
            report_top_n: 10,
        }
    }
}

impl ScannerConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.concurrency = config.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
        config.validate()?;
        Ok(config)
    }

    /// Resolved parameters for a timeframe (override or built-in default).
    pub fn params_for(&self, timeframe: Timeframe) -> TimeframeParams {
        self.params
            .get(&timeframe)
            .cloned()
            .unwrap_or_else(|| TimeframeParams::for_timeframe(timeframe))
    }

    /// Effective fetch concurrency.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.trim().is_empty() {
            return Err(ConfigError::Invalid("exchange must not be empty".into()));
        }
        if self.benchmark_symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("benchmark_symbol must not be empty".into()));
        }
        if self.timeframes.is_empty() {
            return Err(ConfigError::Invalid("at least one timeframe is required".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        if self.candle_limit < MIN_HISTORY_BARS {
            return Err(ConfigError::Invalid(format!(
                "candle_limit {} is below the {MIN_HISTORY_BARS} bars detection needs",
                self.candle_limit
            )));
        }
        for tf in &self.timeframes {
            self.params_for(*tf).validate(*tf)?;
        }
        self.universe.validate()?;
        self.publish.validate()?;
        Ok(())
    }
}

// ─── Universe ────────────────────────────────────────────────────────

/// Universe construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Number of symbols kept after ranking by quote volume.
    pub top_n: usize,
    /// 24h quote volume floor.
    pub min_quote_volume: f64,
    /// Quote volume at or above which a symbol is bucket A.
    pub bucket_a_min_volume: f64,
    /// Quote volume at or above which a symbol is bucket B (otherwise C).
    pub bucket_b_min_volume: f64,
    /// Base assets never scanned (stablecoins, wrapped fiat).
    pub excluded_bases: Vec<String>,
    /// Leveraged-token suffixes (e.g. "UP", "DOWN", "BULL", "BEAR").
    pub excluded_suffixes: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            top_n: 100,
            min_quote_volume: 5_000_000.0,
            bucket_a_min_volume: 50_000_000.0,
            bucket_b_min_volume: 10_000_000.0,
            excluded_bases: ["USDC", "FDUSD", "TUSD", "BUSD", "DAI", "USDP", "EUR", "EURI", "AEUR"]
                .into_iter()
                .map(String::from)
                .collect(),
            excluded_suffixes: ["UP", "DOWN", "BULL", "BEAR"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl UniverseConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_n == 0 {
            return Err(ConfigError::Invalid("universe.top_n must be > 0".into()));
        }
        if self.bucket_a_min_volume < self.bucket_b_min_volume {
            return Err(ConfigError::Invalid(
                "universe.bucket_a_min_volume must be >= bucket_b_min_volume".into(),
            ));
        }
        Ok(())
    }

    /// Liquidity bucket for a 24h quote volume.
    pub fn bucket_for(&self, quote_volume: f64) -> LiquidityBucket {
        if quote_volume >= self.bucket_a_min_volume {
            LiquidityBucket::A
        } else if quote_volume >= self.bucket_b_min_volume {
            LiquidityBucket::B
        } else {
            LiquidityBucket::C
        }
    }
}

// ─── Timeframe parameters ────────────────────────────────────────────

/// Detection, trigger and scoring bounds for one timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeframeParams {
    /// Bars on each side a swing high/low must dominate.
    pub swing_width: usize,
    /// Bars (before the evaluated candle) searched for the base.
    pub base_lookback: usize,
    pub min_r12: f64,
    pub min_r23: f64,
    pub atr_pct_min: f64,
    pub atr_pct_max: f64,
    pub breakout_min_pct: f64,
    pub breakout_max_pct: f64,
    /// Closes at most this far below the pivot are APPROACHING.
    pub approaching_pct: f64,
    /// Half-width of the band around the pivot a retest dip must touch.
    pub retest_tol_pct: f64,
    pub max_bars_after_breakout: usize,
    /// Scoring: c3 at or below `c3_tight` scores full, at `c3_loose` zero.
    pub c3_tight: f64,
    pub c3_loose: f64,
    pub atr_score_low: f64,
    pub atr_score_high: f64,
    pub ema_sep_low: f64,
    pub ema_sep_high: f64,
    /// Width of the retest depth band used by the scorer.
    pub retest_band_pct: f64,
}

impl TimeframeParams {
    /// Built-in defaults for a timeframe.
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        match timeframe {
            Timeframe::H1 => Self {
                swing_width: 3,
                base_lookback: 120,
                min_r12: 1.2,
                min_r23: 1.1,
                atr_pct_min: 0.3,
                atr_pct_max: 4.0,
                breakout_min_pct: 0.3,
                breakout_max_pct: 2.5,
                approaching_pct: 2.0,
                retest_tol_pct: 1.0,
                max_bars_after_breakout: 24,
                c3_tight: 1.5,
                c3_loose: 6.0,
                atr_score_low: 0.5,
                atr_score_high: 4.0,
                ema_sep_low: 0.0,
                ema_sep_high: 10.0,
                retest_band_pct: 2.0,
            },
            Timeframe::H4 => Self {
                swing_width: 3,
                base_lookback: 120,
                min_r12: 1.2,
                min_r23: 1.1,
                atr_pct_min: 0.5,
                atr_pct_max: 8.0,
                breakout_min_pct: 0.5,
                breakout_max_pct: 3.0,
                approaching_pct: 2.0,
                retest_tol_pct: 1.5,
                max_bars_after_breakout: 18,
                c3_tight: 2.0,
                c3_loose: 8.0,
                atr_score_low: 1.0,
                atr_score_high: 6.0,
                ema_sep_low: 0.0,
                ema_sep_high: 15.0,
                retest_band_pct: 3.0,
            },
            Timeframe::D1 => Self {
                swing_width: 3,
                base_lookback: 120,
                min_r12: 1.2,
                min_r23: 1.1,
                atr_pct_min: 1.0,
                atr_pct_max: 12.0,
                breakout_min_pct: 0.8,
                breakout_max_pct: 5.0,
                approaching_pct: 2.0,
                retest_tol_pct: 2.0,
                max_bars_after_breakout: 10,
                c3_tight: 3.0,
                c3_loose: 12.0,
                atr_score_low: 2.0,
                atr_score_high: 8.0,
                ema_sep_low: 0.0,
                ema_sep_high: 25.0,
                retest_band_pct: 4.0,
            },
        }
    }

    pub fn validate(&self, timeframe: Timeframe) -> Result<(), ConfigError> {
        let bad = |what: &str| ConfigError::Invalid(format!("{timeframe}: {what}"));
        if self.swing_width == 0 {
            return Err(bad("swing_width must be > 0"));
        }
        if self.base_lookback < 4 * self.swing_width + 4 {
            return Err(bad("base_lookback too short for three swings"));
        }
        if self.min_r12 < 1.0 || self.min_r23 < 1.0 {
            return Err(bad("contraction ratios must be >= 1.0"));
        }
        if self.atr_pct_min >= self.atr_pct_max {
            return Err(bad("atr_pct_min must be < atr_pct_max"));
        }
        if self.breakout_min_pct >= self.breakout_max_pct {
            return Err(bad("breakout_min_pct must be < breakout_max_pct"));
        }
        if self.c3_tight >= self.c3_loose
            || self.atr_score_low >= self.atr_score_high
            || self.ema_sep_low >= self.ema_sep_high
        {
            return Err(bad("scoring bounds must be strictly increasing"));
        }
        if self.retest_tol_pct <= 0.0 || self.retest_band_pct <= 0.0 {
            return Err(bad("retest tolerances must be > 0"));
        }
        Ok(())
    }
}

// ─── Scoring weights ─────────────────────────────────────────────────

/// Component points and normalisation bounds of the composite score.
///
/// Component maxima sum to 100; the sub-weights inside each component sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub contraction_points: f64,
    pub trend_points: f64,
    pub trigger_points: f64,
    pub risk_points: f64,

    pub contraction_ratio_weight: f64,
    pub contraction_c3_weight: f64,
    pub contraction_atr_weight: f64,
    pub r12_low: f64,
    pub r12_high: f64,
    pub r23_low: f64,
    pub r23_high: f64,

    pub trend_above_weight: f64,
    pub trend_sep_weight: f64,
    pub above_ratio_low: f64,
    pub above_ratio_high: f64,

    pub breakout_extension_weight: f64,
    pub breakout_volume_weight: f64,
    /// Position of the goldilocks peak inside the breakout range.
    pub breakout_peak_frac: f64,
    pub vol_ratio_low: f64,
    pub vol_ratio_high: f64,

    pub retest_depth_weight: f64,
    pub retest_confirm_weight: f64,
    pub retest_volume_weight: f64,
    pub retest_peak_frac: f64,
    pub retest_vol_low: f64,
    pub retest_vol_high: f64,

    pub risk_wick_weight: f64,
    pub risk_liquidity_weight: f64,
    pub risk_regime_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            contraction_points: 40.0,
            trend_points: 25.0,
            trigger_points: 25.0,
            risk_points: 10.0,

            contraction_ratio_weight: 0.45,
            contraction_c3_weight: 0.35,
            contraction_atr_weight: 0.20,
            r12_low: 1.1,
            r12_high: 1.8,
            r23_low: 1.05,
            r23_high: 1.6,

            trend_above_weight: 0.65,
            trend_sep_weight: 0.35,
            above_ratio_low: 0.55,
            above_ratio_high: 0.85,

            breakout_extension_weight: 0.55,
            breakout_volume_weight: 0.45,
            breakout_peak_frac: 0.55,
            vol_ratio_low: 1.2,
            vol_ratio_high: 2.5,

            retest_depth_weight: 0.45,
            retest_confirm_weight: 0.35,
            retest_volume_weight: 0.20,
            retest_peak_frac: 0.65,
            retest_vol_low: 0.5,
            retest_vol_high: 1.5,

            risk_wick_weight: 0.50,
            risk_liquidity_weight: 0.35,
            risk_regime_weight: 0.15,
        }
    }
}

// ─── Publish ─────────────────────────────────────────────────────────

/// Publish gate and cooldown settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub min_score_1h: u8,
    pub min_score_4h: u8,
    pub min_score_1d: u8,
    pub allowed_buckets: Vec<LiquidityBucket>,
    /// Scores strictly above this publish regardless of liquidity bucket.
    pub liquidity_exception_score: u8,
    pub breakout_cooldown_hours: u32,
    pub retest_cooldown_hours: u32,
    /// Attempts for a store write that hits SQLITE_BUSY/LOCKED.
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            min_score_1h: 70,
            min_score_4h: 65,
            min_score_1d: 60,
            allowed_buckets: vec![LiquidityBucket::A, LiquidityBucket::B],
            liquidity_exception_score: 85,
            breakout_cooldown_hours: 24,
            retest_cooldown_hours: 48,
            write_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl PublishConfig {
    pub fn min_score(&self, timeframe: Timeframe) -> u8 {
        match timeframe {
            Timeframe::H1 => self.min_score_1h,
            Timeframe::H4 => self.min_score_4h,
            Timeframe::D1 => self.min_score_1d,
        }
    }

    /// Cooldown in hours for a signal type. APPROACHING never publishes.
    pub fn cooldown_hours(&self, signal_type: SignalType) -> u32 {
        match signal_type {
            SignalType::Breakout => self.breakout_cooldown_hours,
            SignalType::RetestOk => self.retest_cooldown_hours,
            SignalType::Approaching => 0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for score in [
            self.min_score_1h,
            self.min_score_4h,
            self.min_score_1d,
            self.liquidity_exception_score,
        ] {
            if score > 100 {
                return Err(ConfigError::Invalid(format!(
                    "publish score threshold {score} exceeds 100"
                )));
            }
        }
        if self.write_retries == 0 || self.write_retries > MAX_WRITE_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "publish.write_retries must be in 1..={MAX_WRITE_RETRIES}, got {}",
                self.write_retries
            )));
        }
        Ok(())
    }
}
