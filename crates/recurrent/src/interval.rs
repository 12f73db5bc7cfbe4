//! Interval policy: canonical millisecond intervals from (magnitude, unit).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Unit of a fixed repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
}

impl IntervalUnit {
    /// Milliseconds in one unit.
    pub const fn millis(self) -> u64 {
        match self {
            IntervalUnit::Seconds => 1_000,
            IntervalUnit::Minutes => 60 * 1_000,
            IntervalUnit::Hours => 60 * 60 * 1_000,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            IntervalUnit::Seconds => "seconds",
            IntervalUnit::Minutes => "minutes",
            IntervalUnit::Hours => "hours",
        }
    }
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntervalUnit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Ok(IntervalUnit::Seconds),
            "m" | "min" | "minute" | "minutes" => Ok(IntervalUnit::Minutes),
            "h" | "hour" | "hours" => Ok(IntervalUnit::Hours),
            _ => Err(ConfigError::InvalidUnit(s.to_string())),
        }
    }
}

impl TryFrom<String> for IntervalUnit {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IntervalUnit> for String {
    fn from(unit: IntervalUnit) -> Self {
        unit.as_str().to_string()
    }
}

/// A fixed repeat interval, e.g. 5 minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntervalSpec {
    pub magnitude: u32,
    pub unit: IntervalUnit,
}

impl IntervalSpec {
    pub const fn new(magnitude: u32, unit: IntervalUnit) -> Self {
        Self { magnitude, unit }
    }

    pub const fn seconds(magnitude: u32) -> Self {
        Self::new(magnitude, IntervalUnit::Seconds)
    }

    pub const fn minutes(magnitude: u32) -> Self {
        Self::new(magnitude, IntervalUnit::Minutes)
    }

    pub const fn hours(magnitude: u32) -> Self {
        Self::new(magnitude, IntervalUnit::Hours)
    }

    /// Build a spec from an untyped unit name, as read from configuration.
    pub fn parse(magnitude: u32, unit: &str) -> Result<Self, ConfigError> {
        let spec = Self::new(magnitude, unit.parse()?);
        spec.to_millis()?;
        Ok(spec)
    }

    /// Canonical interval in milliseconds.
    pub fn to_millis(&self) -> Result<u64, ConfigError> {
        if self.magnitude == 0 {
            return Err(ConfigError::InvalidInterval(format!(
                "magnitude must be positive, got 0 {}",
                self.unit
            )));
        }
        u64::from(self.magnitude)
            .checked_mul(self.unit.millis())
            .ok_or_else(|| ConfigError::InvalidInterval(format!("{self} overflows")))
    }

    pub fn to_duration(&self) -> Result<Duration, ConfigError> {
        self.to_millis().map(Duration::from_millis)
    }
}

impl fmt::Display for IntervalSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.magnitude, self.unit)
    }
}
