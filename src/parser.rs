//! Payload normalization: broker messages into [`Reading`] records.
//!
//! Accepts either raw payload bytes or a JSON value the subscriber already
//! decoded. A malformed payload never escapes as an error: every failure
//! path collapses to `None` plus a log line.

use chrono::{DateTime, NaiveDateTime, Utc};
use log::debug;
use serde_json::Value;

use crate::reading::Reading;

/// Inbound payload, raw or already decoded by the subscriber.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// Raw bytes as delivered by the broker
    Raw(&'a [u8]),
    /// A JSON value the caller already decoded
    Decoded(&'a Value),
}

/// Parse a payload into a normalized [`Reading`].
///
/// Field rules:
/// - `timestamp`: ISO-8601-parseable string, else the ingestion time
/// - `light`: string passthrough, defaulting to `"unknown"`
/// - `temperature`, `humidity`: numeric passthrough, `None` when absent
///
/// Returns `None` when the payload is not a JSON object.
pub fn parse(payload: Payload<'_>) -> Option<Reading> {
    match payload {
        Payload::Raw(bytes) => match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => from_value(&value),
            Err(e) => {
                debug!("payload is not valid JSON: {}", e);
                None
            }
        },
        Payload::Decoded(value) => from_value(value),
    }
}

fn from_value(value: &Value) -> Option<Reading> {
    let Some(fields) = value.as_object() else {
        debug!("payload is not a JSON object: {}", value);
        return None;
    };

    let timestamp = fields
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
        .unwrap_or_else(Utc::now);
    let light = fields
        .get("light")
        .and_then(Value::as_str)
        .unwrap_or(Reading::LIGHT_UNKNOWN)
        .to_owned();

    Some(Reading {
        timestamp,
        light,
        temperature: fields.get("temperature").and_then(Value::as_f64),
        humidity: fields.get("humidity").and_then(Value::as_f64),
    })
}

/// Parse an ISO-8601 timestamp; forms without an offset are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    debug!("unparsable timestamp {:?}", raw);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_full_payload() {
        let json =
            br#"{"timestamp":"2024-05-01T12:30:00Z","light":"on","temperature":21.5,"humidity":60.2}"#;
        let reading = parse(Payload::Raw(json)).unwrap();

        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
        );
        assert_eq!(reading.light, "on");
        assert_eq!(reading.temperature, Some(21.5));
        assert_eq!(reading.humidity, Some(60.2));
    }

    #[test]
    fn test_missing_light_defaults_to_unknown() {
        let reading = parse(Payload::Raw(br#"{"temperature":19.0}"#)).unwrap();
        assert_eq!(reading.light, Reading::LIGHT_UNKNOWN);
        assert_eq!(reading.temperature, Some(19.0));
    }

    #[test]
    fn test_invalid_json_yields_none() {
        assert!(parse(Payload::Raw(b"not json at all")).is_none());
    }

    #[test]
    fn test_non_object_yields_none() {
        assert!(parse(Payload::Raw(b"42")).is_none());
        assert!(parse(Payload::Raw(b"[1,2,3]")).is_none());
        assert!(parse(Payload::Raw(b"\"light\"")).is_none());
    }

    #[test]
    fn test_missing_numerics_are_none() {
        let reading = parse(Payload::Raw(br#"{"light":"off"}"#)).unwrap();
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn test_empty_object_yields_defaults() {
        let before = Utc::now();
        let reading = parse(Payload::Raw(b"{}")).unwrap();
        let after = Utc::now();

        assert!(reading.timestamp >= before && reading.timestamp <= after);
        assert_eq!(reading.light, Reading::LIGHT_UNKNOWN);
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, None);
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_ingestion_time() {
        let before = Utc::now();
        let reading = parse(Payload::Raw(br#"{"timestamp":"half past nine"}"#)).unwrap();
        let after = Utc::now();
        assert!(reading.timestamp >= before && reading.timestamp <= after);
    }

    #[test]
    fn test_naive_timestamp_taken_as_utc() {
        let reading = parse(Payload::Raw(br#"{"timestamp":"2024-05-01 08:15:00"}"#)).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_offset_timestamp_converts_to_utc() {
        let reading =
            parse(Payload::Raw(br#"{"timestamp":"2024-05-01T10:00:00+02:00"}"#)).unwrap();
        assert_eq!(
            reading.timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decoded_value_input() {
        let value = serde_json::json!({"light": "off", "temperature": 18, "humidity": 71.4});
        let reading = parse(Payload::Decoded(&value)).unwrap();
        assert_eq!(reading.light, "off");
        assert_eq!(reading.temperature, Some(18.0));
        assert_eq!(reading.humidity, Some(71.4));
    }

    #[test]
    fn test_non_string_light_normalizes_to_unknown() {
        let reading = parse(Payload::Raw(br#"{"light":1,"temperature":20.0}"#)).unwrap();
        assert_eq!(reading.light, Reading::LIGHT_UNKNOWN);
    }
}
