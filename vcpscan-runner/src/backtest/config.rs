//! Backtest configuration: named presets, gate-color presets and entry gating.

use std::path::Path;

use serde::{Deserialize, Serialize};

use vcpscan_core::domain::{BenchmarkRegime, Grade, SignalEvent, SignalType};
use vcpscan_core::ConfigError;

/// Which trigger types open positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryTrigger {
    Breakout,
    Retest,
    Both,
}

impl EntryTrigger {
    pub fn accepts(&self, signal_type: SignalType) -> bool {
        match (self, signal_type) {
            (_, SignalType::Approaching) => false,
            (EntryTrigger::Both, _) => true,
            (EntryTrigger::Breakout, SignalType::Breakout) => true,
            (EntryTrigger::Retest, SignalType::RetestOk) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingMode {
    /// capital / max_concurrent_positions.
    Equal,
    /// Equal allocation scaled by 0.5 + score / 100.
    ScoreWeighted,
    /// Equal allocation scaled down as ATR% rises above the target.
    Volatility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopMode {
    /// pivot × (1 − stop_pct).
    PivotBased,
    /// entry − ATR × atr_stop_mult.
    AtrMult,
    /// entry × (1 − fixed_stop_pct).
    FixedPct,
}

/// External regime gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateColor {
    Green,
    Yellow,
    Red,
}

impl std::str::FromStr for GateColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(GateColor::Green),
            "yellow" => Ok(GateColor::Yellow),
            "red" => Ok(GateColor::Red),
            other => Err(format!("unknown gate color '{other}' (expected green, yellow or red)")),
        }
    }
}

/// Parameters a gate color pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePreset {
    pub min_score: u8,
    pub min_grade: Grade,
    pub entry_trigger: EntryTrigger,
    pub max_concurrent_positions: usize,
}

impl GateColor {
    /// Pure mapping from color to preset.
    pub fn preset(&self) -> GatePreset {
        match self {
            GateColor::Green => GatePreset {
                min_score: 60,
                min_grade: Grade::C,
                entry_trigger: EntryTrigger::Both,
                max_concurrent_positions: 5,
            },
            GateColor::Yellow => GatePreset {
                min_score: 70,
                min_grade: Grade::B,
                entry_trigger: EntryTrigger::Retest,
                max_concurrent_positions: 3,
            },
            GateColor::Red => GatePreset {
                min_score: 80,
                min_grade: Grade::A,
                entry_trigger: EntryTrigger::Retest,
                max_concurrent_positions: 1,
            },
        }
    }
}

/// Why `should_take_signal` said no.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRejection {
    ScoreTooLow,
    TriggerNotEnabled,
    GradeTooLoose,
    RegimeNotAllowed,
    PositionAlreadyOpen,
    MaxPositions,
    InsufficientCapital,
    InvalidStop,
    NoPriceData,
}

impl EntryRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryRejection::ScoreTooLow => "score_too_low",
            EntryRejection::TriggerNotEnabled => "trigger_not_enabled",
            EntryRejection::GradeTooLoose => "grade_too_loose",
            EntryRejection::RegimeNotAllowed => "regime_not_allowed",
            EntryRejection::PositionAlreadyOpen => "position_already_open",
            EntryRejection::MaxPositions => "max_positions",
            EntryRejection::InsufficientCapital => "insufficient_capital",
            EntryRejection::InvalidStop => "invalid_stop",
            EntryRejection::NoPriceData => "no_price_data",
        }
    }
}

/// Complete backtest configuration. Presets are plain values; adjust with
/// struct update syntax or [`BacktestConfig::with_gate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub max_concurrent_positions: usize,
    /// Cap on one position's notional as % of capital.
    pub max_position_pct: f64,
    pub sizing: SizingMode,
    /// ATR% at which VOLATILITY sizing allocates the full equal share.
    pub target_atr_pct: f64,

    pub stop_mode: StopMode,
    /// Percent below the pivot for PIVOT_BASED stops.
    pub stop_pct: f64,
    pub atr_stop_mult: f64,
    pub fixed_stop_pct: f64,
    /// Percent above entry; `None` disables take-profit.
    pub take_profit_pct: Option<f64>,
    /// Percent below the running high; `None` disables the trailing stop.
    pub trailing_stop_pct: Option<f64>,
    /// Bars after entry before a time exit; 0 disables it.
    pub max_hold_bars: usize,

    /// Per side, in percent.
    pub commission_pct: f64,
    /// Per side, in percent.
    pub slippage_pct: f64,

    pub min_score: u8,
    pub min_grade: Grade,
    pub entry_trigger: EntryTrigger,
    pub allow_side_regime: bool,
    pub allow_down_regime: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            max_concurrent_positions: 5,
            max_position_pct: 25.0,
            sizing: SizingMode::Equal,
            target_atr_pct: 3.0,
            stop_mode: StopMode::PivotBased,
            stop_pct: 3.0,
            atr_stop_mult: 2.0,
            fixed_stop_pct: 5.0,
            take_profit_pct: Some(15.0),
            trailing_stop_pct: Some(8.0),
            max_hold_bars: 60,
            commission_pct: 0.1,
            slippage_pct: 0.05,
            min_score: 65,
            min_grade: Grade::C,
            entry_trigger: EntryTrigger::Both,
            allow_side_regime: true,
            allow_down_regime: false,
        }
    }
}

impl BacktestConfig {
    /// Fewer, higher-quality trades with tighter risk.
    pub fn conservative() -> Self {
        Self {
            max_concurrent_positions: 3,
            max_position_pct: 15.0,
            sizing: SizingMode::Volatility,
            stop_pct: 2.0,
            take_profit_pct: Some(12.0),
            trailing_stop_pct: Some(6.0),
            max_hold_bars: 40,
            min_score: 75,
            min_grade: Grade::B,
            allow_side_regime: false,
            ..Self::default()
        }
    }

    /// More trades, wider stops, every regime.
    pub fn aggressive() -> Self {
        Self {
            max_concurrent_positions: 8,
            max_position_pct: 30.0,
            sizing: SizingMode::ScoreWeighted,
            stop_pct: 5.0,
            take_profit_pct: Some(25.0),
            trailing_stop_pct: Some(12.0),
            max_hold_bars: 90,
            min_score: 60,
            min_grade: Grade::D,
            allow_side_regime: true,
            allow_down_regime: true,
            ..Self::default()
        }
    }

    /// Named preset lookup: `default`, `conservative`, `aggressive`.
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" => Some(Self::default()),
            "conservative" => Some(Self::conservative()),
            "aggressive" => Some(Self::aggressive()),
            _ => None,
        }
    }

    /// Copy with the gate color's preset applied.
    pub fn with_gate(&self, gate: GateColor) -> Self {
        let p = gate.preset();
        Self {
            min_score: p.min_score,
            min_grade: p.min_grade,
            entry_trigger: p.entry_trigger,
            max_concurrent_positions: p.max_concurrent_positions,
            ..self.clone()
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !(self.initial_capital > 0.0) {
            return invalid(format!("initial_capital must be > 0, got {}", self.initial_capital));
        }
        if self.max_concurrent_positions == 0 {
            return invalid("max_concurrent_positions must be >= 1".into());
        }
        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 100.0) {
            return invalid(format!(
                "max_position_pct must be in (0, 100], got {}",
                self.max_position_pct
            ));
        }
        for (name, value) in [
            ("stop_pct", self.stop_pct),
            ("fixed_stop_pct", self.fixed_stop_pct),
        ] {
            if !(value > 0.0 && value < 100.0) {
                return invalid(format!("{name} must be in (0, 100), got {value}"));
            }
        }
        if !(self.atr_stop_mult > 0.0) || !(self.target_atr_pct > 0.0) {
            return invalid("atr_stop_mult and target_atr_pct must be > 0".into());
        }
        if let Some(tp) = self.take_profit_pct {
            if !(tp > 0.0) {
                return invalid(format!("take_profit_pct must be > 0, got {tp}"));
            }
        }
        if let Some(trail) = self.trailing_stop_pct {
            if !(trail > 0.0 && trail < 100.0) {
                return invalid(format!("trailing_stop_pct must be in (0, 100), got {trail}"));
            }
        }
        if self.commission_pct < 0.0 || self.slippage_pct < 0.0 {
            return invalid("commission_pct and slippage_pct must be >= 0".into());
        }
        if self.min_score > 100 {
            return invalid(format!("min_score {} exceeds 100", self.min_score));
        }
        Ok(())
    }

    /// UP always trades; SIDE and DOWN only when enabled.
    pub fn should_trade_in_regime(&self, regime: BenchmarkRegime) -> bool {
        match regime {
            BenchmarkRegime::Up => true,
            BenchmarkRegime::Side => self.allow_side_regime,
            BenchmarkRegime::Down => self.allow_down_regime,
        }
    }

    /// First failing signal-level check, if any.
    pub fn entry_rejection(&self, event: &SignalEvent) -> Option<EntryRejection> {
        if event.score < self.min_score {
            return Some(EntryRejection::ScoreTooLow);
        }
        if !self.entry_trigger.accepts(event.signal_type()) {
            return Some(EntryRejection::TriggerNotEnabled);
        }
        if !event.setup.grade().meets(self.min_grade) {
            return Some(EntryRejection::GradeTooLoose);
        }
        if !self.should_trade_in_regime(event.setup.regime.benchmark) {
            return Some(EntryRejection::RegimeNotAllowed);
        }
        None
    }

    pub fn should_take_signal(&self, event: &SignalEvent) -> bool {
        self.entry_rejection(event).is_none()
    }

    /// Per-side cost rate as a fraction.
    pub fn side_cost_rate(&self) -> f64 {
        (self.commission_pct + self.slippage_pct) / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::*;
    use vcpscan_core::domain::TriggerDetail;

    #[test]
    fn presets_validate() {
        for config in [
            BacktestConfig::default(),
            BacktestConfig::conservative(),
            BacktestConfig::aggressive(),
        ] {
            config.validate().unwrap();
        }
        assert_eq!(
            BacktestConfig::preset("Conservative"),
            Some(BacktestConfig::conservative())
        );
        assert!(BacktestConfig::preset("yolo").is_none());
    }

    #[test]
    fn gate_presets_are_pure() {
        assert_eq!(GateColor::Red.preset(), GateColor::Red.preset());
        let cfg = BacktestConfig::aggressive().with_gate(GateColor::Yellow);
        assert_eq!(cfg.min_score, 70);
        assert_eq!(cfg.min_grade, Grade::B);
        assert_eq!(cfg.entry_trigger, EntryTrigger::Retest);
        assert_eq!(cfg.max_concurrent_positions, 3);
        // Everything else comes from the base preset.
        assert_eq!(cfg.sizing, SizingMode::ScoreWeighted);
        assert_eq!("RED".parse::<GateColor>().unwrap(), GateColor::Red);
    }

    #[test]
    fn toml_overrides() {
        let cfg = BacktestConfig::from_toml(
            r#"
            initial_capital = 50000.0
            sizing = "VOLATILITY"
            stop_mode = "ATR_MULT"
            min_grade = "B"
            entry_trigger = "RETEST"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.initial_capital, 50_000.0);
        assert_eq!(cfg.sizing, SizingMode::Volatility);
        assert_eq!(cfg.stop_mode, StopMode::AtrMult);
        assert_eq!(cfg.min_grade, Grade::B);
        assert_eq!(cfg.take_profit_pct, Some(15.0));
    }

    #[test]
    fn invalid_toml_values_rejected() {
        assert!(matches!(
            BacktestConfig::from_toml("initial_capital = -1.0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BacktestConfig::from_toml("max_concurrent_positions = \"x\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn regime_permissions() {
        let cfg = BacktestConfig::default();
        assert!(cfg.should_trade_in_regime(BenchmarkRegime::Up));
        assert!(cfg.should_trade_in_regime(BenchmarkRegime::Side));
        assert!(!cfg.should_trade_in_regime(BenchmarkRegime::Down));
        let conservative = BacktestConfig::conservative();
        assert!(!conservative.should_trade_in_regime(BenchmarkRegime::Side));
    }

    #[test]
    fn should_take_signal_checks_in_order() {
        let cfg = BacktestConfig::default().with_gate(GateColor::Red);
        let mut ev = breakout("SOLUSDT", DAY0, 100.0, 79);
        assert_eq!(cfg.entry_rejection(&ev), Some(EntryRejection::ScoreTooLow));
        ev.score = 90;
        assert_eq!(
            cfg.entry_rejection(&ev),
            Some(EntryRejection::TriggerNotEnabled)
        );
        ev.detail = TriggerDetail::RetestOk {
            retest_depth_pct: 1.0,
            retest_vol_ratio: 0.8,
            confirm_close_above: true,
            breakout_ts: DAY0 - HOUR,
        };
        assert!(cfg.should_take_signal(&ev));
        ev.setup.regime.grade = Grade::B;
        assert_eq!(cfg.entry_rejection(&ev), Some(EntryRejection::GradeTooLoose));
        ev.setup.regime.grade = Grade::A;
        ev.setup.regime.benchmark = BenchmarkRegime::Down;
        assert_eq!(
            cfg.entry_rejection(&ev),
            Some(EntryRejection::RegimeNotAllowed)
        );
    }

    #[test]
    fn entry_trigger_matrix() {
        assert!(EntryTrigger::Both.accepts(SignalType::RetestOk));
        assert!(!EntryTrigger::Both.accepts(SignalType::Approaching));
        assert!(EntryTrigger::Breakout.accepts(SignalType::Breakout));
        assert!(!EntryTrigger::Breakout.accepts(SignalType::RetestOk));
    }
}
