//! Tolerant serde helpers for backend payloads.
//!
//! The backend is inconsistent about numeric encoding: the same field may
//! arrive as `42`, `42.0` or `"42"` depending on the endpoint. These helpers
//! accept all three forms.

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use tracing::warn;

/// Radius used when the backend sends an unparseable radius string.
const FALLBACK_RADIUS_KM: f64 = 1.0;

#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Numeric {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Int(v) => Some(*v as f64),
            Numeric::Float(v) => Some(*v),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Numeric::Int(v) => Some(*v),
            Numeric::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            Numeric::Float(_) => None,
            Numeric::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            }
        }
    }
}

/// Integer encoded as a JSON number or a numeric string.
pub fn i64_from_number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Numeric::deserialize(deserializer)?;
    raw.as_i64()
        .ok_or_else(|| de::Error::custom("expected an integer or an integer string"))
}

/// Float encoded as a JSON number or a numeric string.
pub fn f64_from_number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Numeric::deserialize(deserializer)?;
    raw.as_f64()
        .ok_or_else(|| de::Error::custom("expected a number or a numeric string"))
}

/// Geofence radius in km. Numbers decode as-is; a string that does not parse
/// falls back to 1 km instead of rejecting the whole geofence.
pub fn radius_km<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Numeric::deserialize(deserializer)? {
        Numeric::Text(s) => Ok(s.trim().parse().unwrap_or(FALLBACK_RADIUS_KM)),
        other => other
            .as_f64()
            .ok_or_else(|| de::Error::custom("expected a radius")),
    }
}

/// Millisecond delay; null, unparseable or negative values mean "no delay".
pub fn delay_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Numeric>::deserialize(deserializer)?;
    let ms = raw.and_then(|n| n.as_f64()).unwrap_or(0.0);
    if ms.is_finite() && ms > 0.0 {
        Ok(ms.round() as u64)
    } else {
        Ok(0)
    }
}

/// String field that may be absent or null on the wire.
pub fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode a value, falling back to its default when it is malformed.
///
/// Used for listing collections so one bad collection does not discard the
/// whole listing.
pub fn default_on_error<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(parsed),
        Err(e) => {
            warn!(error = %e, "Discarding malformed collection in backend payload");
            Ok(T::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "i64_from_number_or_string")]
        id: i64,
        #[serde(deserialize_with = "radius_km")]
        radius: f64,
        #[serde(default, deserialize_with = "delay_ms")]
        delay: u64,
        #[serde(default, deserialize_with = "default_on_error")]
        tags: Vec<String>,
    }

    #[test]
    fn test_numbers_and_strings_both_decode() {
        let a: Sample = serde_json::from_str(r#"{"id": 42, "radius": 0.5, "delay": 5000}"#).unwrap();
        let b: Sample =
            serde_json::from_str(r#"{"id": "42", "radius": "0.5", "delay": "5000"}"#).unwrap();
        assert_eq!(a.id, 42);
        assert_eq!(b.id, 42);
        assert_eq!(a.radius, 0.5);
        assert_eq!(b.radius, 0.5);
        assert_eq!(a.delay, 5000);
        assert_eq!(b.delay, 5000);
    }

    #[test]
    fn test_bad_radius_string_falls_back() {
        let s: Sample = serde_json::from_str(r#"{"id": 1, "radius": "wide"}"#).unwrap();
        assert_eq!(s.radius, 1.0);
    }

    #[test]
    fn test_missing_or_null_delay_is_zero() {
        let s: Sample = serde_json::from_str(r#"{"id": 1, "radius": 1}"#).unwrap();
        assert_eq!(s.delay, 0);
        let s: Sample = serde_json::from_str(r#"{"id": 1, "radius": 1, "delay": null}"#).unwrap();
        assert_eq!(s.delay, 0);
    }

    #[test]
    fn test_non_numeric_id_is_rejected() {
        let result: Result<Sample, _> = serde_json::from_str(r#"{"id": "abc", "radius": 1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_collection_defaults() {
        let s: Sample =
            serde_json::from_str(r#"{"id": 1, "radius": 1, "tags": {"not": "a list"}}"#).unwrap();
        assert!(s.tags.is_empty());
    }
}
