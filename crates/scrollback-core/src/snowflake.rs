//! Message identifiers.
//!
//! Identifiers are 64-bit integers whose high bits encode the creation time in
//! milliseconds since the service epoch. They travel as decimal strings, which
//! do NOT sort correctly as strings ("99" > "100"), so all ordering goes
//! through the integer.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Service epoch (2015-01-01T00:00:00Z) in Unix milliseconds.
pub const SERVICE_EPOCH_MS: i64 = 1_420_070_400_000;

const TIMESTAMP_SHIFT: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Snowflake(pub u64);

impl Snowflake {
    /// Largest identifier the service accepts; anchors a backward walk "from now".
    pub const SENTINEL: Snowflake = Snowflake(i64::MAX as u64);

    /// Smallest identifier whose embedded time is `dt`.
    ///
    /// Instants before the service epoch clamp to zero.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let ms = dt.timestamp_millis() - SERVICE_EPOCH_MS;
        if ms <= 0 {
            return Snowflake(0);
        }
        Snowflake((ms as u64) << TIMESTAMP_SHIFT)
    }

    /// Creation time embedded in the identifier.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let ms = (self.0 >> TIMESTAMP_SHIFT) as i64 + SERVICE_EPOCH_MS;
        Utc.timestamp_millis_opt(ms).single()
    }

    pub fn is_sentinel(&self) -> bool {
        *self == Self::SENTINEL
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(Snowflake)
    }
}

impl From<u64> for Snowflake {
    fn from(value: u64) -> Self {
        Snowflake(value)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SnowflakeVisitor;

        impl Visitor<'_> for SnowflakeVisitor {
            type Value = Snowflake;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a snowflake as a decimal string or unsigned integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Snowflake, E> {
                Ok(Snowflake(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Snowflake, E> {
                u64::try_from(v)
                    .map(Snowflake)
                    .map_err(|_| E::custom(format!("negative snowflake: {v}")))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Snowflake, E> {
                v.parse::<Snowflake>()
                    .map_err(|e| E::custom(format!("invalid snowflake {v:?}: {e}")))
            }
        }

        deserializer.deserialize_any(SnowflakeVisitor)
    }
}
