//! Duration parsing for workload files.
//!
//! Accepts a bare integer (milliseconds), a number with a short suffix
//! (`250ms`, `5s`, `2m`, `1h`, `10us`, `100ns`), or a number followed by a
//! unit word (`100 milliseconds`, `1 second`, `3 minutes`).

use crate::config::ConfigError;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// A duration read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct DurationSpec(pub Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<DurationSpec> for Duration {
    fn from(spec: DurationSpec) -> Self {
        spec.0
    }
}

/// Parse a duration string.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(ConfigError::InvalidDuration("empty duration string".to_string()));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);
    let num: u64 = num_str
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(format!("invalid duration value: {s}")))?;

    let duration = match unit.trim() {
        "" | "ms" | "millisecond" | "milliseconds" => Duration::from_millis(num),
        "ns" | "nanosecond" | "nanoseconds" => Duration::from_nanos(num),
        "us" | "microsecond" | "microseconds" => Duration::from_micros(num),
        "s" | "second" | "seconds" => Duration::from_secs(num),
        "m" | "minute" | "minutes" => Duration::from_secs(scaled(num, 60, s)?),
        "h" | "hour" | "hours" => Duration::from_secs(scaled(num, 3600, s)?),
        other => {
            return Err(ConfigError::InvalidDuration(format!(
                "unknown duration unit '{other}' in '{s}'"
            )))
        }
    };

    Ok(duration)
}

fn scaled(num: u64, factor: u64, s: &str) -> Result<u64, ConfigError> {
    num.checked_mul(factor)
        .ok_or_else(|| ConfigError::InvalidDuration(format!("duration out of range: {s}")))
}

impl<'de> Deserialize<'de> for DurationSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = DurationSpec;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number of milliseconds or a string like '100 milliseconds'")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(DurationSpec(Duration::from_millis(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u64::try_from(v)
                    .map(|ms| DurationSpec(Duration::from_millis(ms)))
                    .map_err(|_| E::custom(format!("negative duration: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_duration(v).map(DurationSpec).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
