//! Normalized sensor observation record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized sensor observation.
///
/// Immutable once appended to a [`ReadingStore`](crate::store::ReadingStore);
/// serializes to one row of the backing file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Observation time (ingestion time when the source omitted it)
    pub timestamp: DateTime<Utc>,
    /// Light state ("on", "off", ...); `"unknown"` when the source gave none
    pub light: String,
    /// Temperature in °C, absent when the source omitted the field
    pub temperature: Option<f64>,
    /// Relative humidity in %, absent when the source omitted the field
    pub humidity: Option<f64>,
}

impl Reading {
    /// Sentinel light state for missing or malformed values.
    pub const LIGHT_UNKNOWN: &'static str = "unknown";

    /// Create a reading stamped with the current time.
    pub fn now(light: impl Into<String>, temperature: Option<f64>, humidity: Option<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            light: light.into(),
            temperature,
            humidity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_stamps_current_time() {
        let before = Utc::now();
        let reading = Reading::now("on", Some(21.5), None);
        let after = Utc::now();

        assert!(reading.timestamp >= before && reading.timestamp <= after);
        assert_eq!(reading.light, "on");
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn test_json_round_trip() {
        let reading = Reading::now(Reading::LIGHT_UNKNOWN, None, Some(60.0));
        let json = serde_json::to_string(&reading).unwrap();
        let back: Reading = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reading);
    }
}
