use crate::timestamp::NormalizedTimestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix reserved for series keys
pub const SERIES_SUFFIX: &str = ":ts";

/// Store key of a sensor's series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey(String);

impl SeriesKey {
    /// Derive the series key for a sensor
    pub fn for_sensor(sensor_id: &str) -> Self {
        Self(format!("{sensor_id}{SERIES_SUFFIX}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// JSON rendering of a point, used for logging what was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub timestamp: String,
    pub unix_time: i64,
    pub value: f64,
}

/// A point ready to be appended to its series
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedPoint {
    pub key: SeriesKey,
    pub timestamp_ms: i64,
    pub value: f64,
    pub payload: PointPayload,
}

impl FormattedPoint {
    /// Serialize the payload for log output
    pub fn payload_json(&self) -> String {
        serde_json::to_string(&self.payload).unwrap_or_default()
    }
}

/// Combine a sensor id, its normalized timestamp and value into a store write
pub fn format_point(sensor_id: &str, timestamp: &NormalizedTimestamp, value: f64) -> FormattedPoint {
    FormattedPoint {
        key: SeriesKey::for_sensor(sensor_id),
        timestamp_ms: timestamp.epoch_millis,
        value,
        payload: PointPayload {
            timestamp: timestamp.canonical.clone(),
            unix_time: timestamp.epoch_millis,
            value,
        },
    }
}
