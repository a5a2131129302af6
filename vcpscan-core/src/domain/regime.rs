//! Grade, benchmark regime and liquidity classifications.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Detection strictness tier. `A` is the cleanest trend + pattern, `D` the loosest.
///
/// Ordering follows strictness: `A < B < C < D`. A grade "meets" a minimum when it
/// is at least as strict, i.e. `grade <= min_grade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::A, Grade::B, Grade::C, Grade::D];

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        }
    }

    /// True when this grade is as strict as or stricter than `min_grade`.
    pub fn meets(&self, min_grade: Grade) -> bool {
        *self <= min_grade
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(Grade::A),
            "B" => Ok(Grade::B),
            "C" => Ok(Grade::C),
            "D" => Ok(Grade::D),
            other => Err(format!("unknown grade '{other}'")),
        }
    }
}

/// Benchmark (e.g. BTC) trend state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BenchmarkRegime {
    Up,
    Side,
    Down,
}

impl BenchmarkRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkRegime::Up => "BTC_UP",
            BenchmarkRegime::Side => "BTC_SIDE",
            BenchmarkRegime::Down => "BTC_DOWN",
        }
    }
}

impl fmt::Display for BenchmarkRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BenchmarkRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BTC_UP" | "UP" => Ok(BenchmarkRegime::Up),
            "BTC_SIDE" | "SIDE" => Ok(BenchmarkRegime::Side),
            "BTC_DOWN" | "DOWN" => Ok(BenchmarkRegime::Down),
            other => Err(format!("unknown benchmark regime '{other}'")),
        }
    }
}

/// Composite regime carried by every setup: benchmark trend state + detected grade.
///
/// Renders as the legacy `"BTC_UP|A"` string in reports; parsing accepts the same form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketRegime {
    pub benchmark: BenchmarkRegime,
    pub grade: Grade,
}

impl MarketRegime {
    pub fn new(benchmark: BenchmarkRegime, grade: Grade) -> Self {
        Self { benchmark, grade }
    }
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.benchmark, self.grade)
    }
}

impl FromStr for MarketRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (bench, grade) = s
            .split_once('|')
            .ok_or_else(|| format!("market regime '{s}' is missing the '|' separator"))?;
        Ok(Self {
            benchmark: bench.parse()?,
            grade: grade.parse()?,
        })
    }
}

/// Liquidity bucket assigned by the universe builder from recent quote volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LiquidityBucket {
    A,
    B,
    C,
}

impl LiquidityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            LiquidityBucket::A => "A",
            LiquidityBucket::B => "B",
            LiquidityBucket::C => "C",
        }
    }
}

impl fmt::Display for LiquidityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiquidityBucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(LiquidityBucket::A),
            "B" => Ok(LiquidityBucket::B),
            "C" => Ok(LiquidityBucket::C),
            other => Err(format!("unknown liquidity bucket '{other}'")),
        }
    }
}
