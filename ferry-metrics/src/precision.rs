use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// The resolution timestamps are rounded down to when metrics are created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum Precision {
    /// Whole seconds.
    #[serde(rename = "s")]
    Seconds,
    /// Milliseconds.
    #[serde(rename = "ms")]
    Milliseconds,
    /// Microseconds.
    #[serde(rename = "us")]
    Microseconds,
    /// Nanoseconds, which keeps timestamps unchanged.
    #[default]
    #[serde(rename = "ns")]
    Nanoseconds,
}

impl Precision {
    fn unit_nanos(self) -> u32 {
        match self {
            Self::Seconds => 1_000_000_000,
            Self::Milliseconds => 1_000_000,
            Self::Microseconds => 1_000,
            Self::Nanoseconds => 1,
        }
    }

    /// Truncates the timestamp to this precision.
    pub fn truncate(self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let nanos = timestamp.nanosecond();
        let truncated = nanos - nanos % self.unit_nanos();
        timestamp.with_nanosecond(truncated).unwrap_or(timestamp)
    }
}
