//! Request timestamps.
//!
//! Every request carries the wall-clock time it was created at, written as
//! `<seconds>,<microseconds>` with the microseconds zero padded to six digits.
//! Timestamps order requests in the outgoing queue and decide which side goes
//! first when both peers send a request at the same time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const MICROS_PER_SEC: u32 = 1_000_000;

/// Errors from parsing a request timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    /// The text has no `,` or `.` between seconds and microseconds.
    #[error("missing separator in timestamp {0:?}")]
    MissingSeparator(String),

    /// The seconds part is not an integer.
    #[error("invalid seconds in timestamp {0:?}")]
    InvalidSeconds(String),

    /// The fractional part is not made of at most six digits.
    #[error("invalid microseconds in timestamp {0:?}")]
    InvalidMicros(String),
}

/// Time a request was issued, with microsecond resolution.
///
/// Ordering compares seconds first and microseconds second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RequestTime {
    secs: i64,
    micros: u32,
}

impl RequestTime {
    /// Creates a timestamp, carrying whole seconds out of `micros`.
    pub fn new(secs: i64, micros: u32) -> Self {
        Self {
            secs: secs + i64::from(micros / MICROS_PER_SEC),
            micros: micros % MICROS_PER_SEC,
        }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Converts a UTC datetime, dropping sub-microsecond precision.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(dt.timestamp(), dt.timestamp_subsec_micros())
    }

    /// Whole seconds since the Unix epoch.
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Microseconds within the second.
    pub fn micros(&self) -> u32 {
        self.micros
    }

    /// Parses `secs,micros` or `secs.fraction`.
    ///
    /// The fraction is read as a decimal fraction of a second, so `100.05`
    /// and `100,050000` are the same instant.
    pub fn parse(text: &str) -> Result<Self, TimeParseError> {
        let trimmed = text.trim();
        let (secs, frac) = trimmed
            .split_once([',', '.'])
            .ok_or_else(|| TimeParseError::MissingSeparator(text.to_string()))?;

        let secs: i64 = secs
            .parse()
            .map_err(|_| TimeParseError::InvalidSeconds(text.to_string()))?;

        if frac.is_empty() || frac.len() > 6 || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TimeParseError::InvalidMicros(text.to_string()));
        }
        let padded = format!("{frac:0<6}");
        let micros: u32 = padded
            .parse()
            .map_err(|_| TimeParseError::InvalidMicros(text.to_string()))?;

        Ok(Self { secs, micros })
    }
}

impl fmt::Display for RequestTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:06}", self.secs, self.micros)
    }
}

impl FromStr for RequestTime {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RequestTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RequestTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
