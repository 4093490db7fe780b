//! Lenient field deserializers for server payloads.
//!
//! The backend is not consistent about numeric ids (`12` vs `"12"`) or
//! unread markers (`unread: true` vs `unread_count: 3`), so the wire models
//! route those fields through these helpers.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn value_to_id<E: serde::de::Error>(value: &Value) -> Result<Option<i64>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| E::custom(format!("id `{number}` is not an integer"))),
        Value::String(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| E::custom(format!("id `{raw}` is not numeric"))),
        other => Err(E::custom(format!("unexpected id value {other}"))),
    }
}

/// Required integer id, accepting numbers or numeric strings.
pub fn id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_to_id::<D::Error>(&value)?.ok_or_else(|| D::Error::custom("id must not be null"))
}

/// Optional integer id; `null` and `0` map to `None`.
pub fn opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_id::<D::Error>(&value)?.filter(|id| *id != 0))
}

/// Integer id where a missing or `null` value means `0`.
pub fn id_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_id::<D::Error>(&value)?.unwrap_or(0))
}

/// String id, accepting numbers too.
pub fn string_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(raw) => Ok(raw),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!("unexpected id value {other}"))),
    }
}

fn value_to_count<E: serde::de::Error>(value: &Value) -> Result<Option<u32>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(flag) => Ok(Some(u32::from(*flag))),
        Value::Number(number) => {
            if let Some(count) = number.as_u64() {
                Ok(Some(u32::try_from(count).unwrap_or(u32::MAX)))
            } else if number.as_i64().is_some() {
                // Negative counts clamp to zero.
                Ok(Some(0))
            } else {
                Err(E::custom(format!("count `{number}` is not an integer")))
            }
        }
        other => Err(E::custom(format!("unexpected count value {other}"))),
    }
}

/// Unread count, accepting booleans (`true` = 1) and clamping negatives.
pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_count::<D::Error>(&value)?.unwrap_or(0))
}

/// Optional unread count; absent and `null` stay `None`.
pub fn opt_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u32>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_to_count::<D::Error>(&value)
}

/// Boolean that also accepts `0`/`1`.
pub fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(false),
        Value::Bool(flag) => Ok(flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|n| n != 0.0)),
        Value::String(raw) => Ok(matches!(raw.trim(), "true" | "1")),
        other => Err(D::Error::custom(format!("unexpected boolean value {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(deserialize_with = "super::id")]
        id: i64,
        #[serde(default, deserialize_with = "super::count")]
        unread: u32,
        #[serde(default, deserialize_with = "super::opt_id")]
        sender_id: Option<i64>,
    }

    #[test]
    fn accepts_numeric_strings_and_booleans() {
        let probe: Probe =
            serde_json::from_str(r#"{"id": "42", "unread": true, "sender_id": 0}"#).unwrap();
        assert_eq!(probe.id, 42);
        assert_eq!(probe.unread, 1);
        assert_eq!(probe.sender_id, None);
    }

    #[test]
    fn clamps_negative_counts() {
        let probe: Probe = serde_json::from_str(r#"{"id": 1, "unread": -4}"#).unwrap();
        assert_eq!(probe.unread, 0);
    }

    #[test]
    fn rejects_non_numeric_ids() {
        assert!(serde_json::from_str::<Probe>(r#"{"id": "abc"}"#).is_err());
        assert!(serde_json::from_str::<Probe>(r#"{"id": null}"#).is_err());
    }
}
