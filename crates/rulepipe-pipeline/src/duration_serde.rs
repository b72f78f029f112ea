//! Serde helpers for `Duration` fields in trace output.
//!
//! Durations serialize as a string with a unit suffix (`"850us"`); the
//! deserializer also accepts `ms` and `s`.

use serde::{self, Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{}us", duration.as_micros()))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration_str(&s).map_err(serde::de::Error::custom)
}

fn parse_duration_str(s: &str) -> Result<Duration, String> {
    let number = |val: &str| -> Result<u64, String> {
        val.parse().map_err(|e| format!("invalid duration '{}': {}", s, e))
    };
    if let Some(val) = s.strip_suffix("us") {
        Ok(Duration::from_micros(number(val)?))
    } else if let Some(val) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(number(val)?))
    } else if let Some(val) = s.strip_suffix('s') {
        Ok(Duration::from_secs(number(val)?))
    } else {
        Err(format!("unknown duration format: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
    struct Timed {
        #[serde(with = "crate::duration_serde")]
        elapsed: Duration,
    }

    #[test]
    fn serializes_as_microseconds() {
        let t = Timed {
            elapsed: Duration::from_micros(1500),
        };
        assert_eq!(serde_json::to_string(&t).unwrap(), r#"{"elapsed":"1500us"}"#);
    }

    #[test]
    fn deserializes_common_units() {
        for (src, expected) in [
            ("\"12us\"", Duration::from_micros(12)),
            ("\"3ms\"", Duration::from_millis(3)),
            ("\"2s\"", Duration::from_secs(2)),
        ] {
            let json = format!("{{\"elapsed\":{}}}", src);
            let t: Timed = serde_json::from_str(&json).unwrap();
            assert_eq!(t.elapsed, expected);
        }
        assert!(serde_json::from_str::<Timed>(r#"{"elapsed":"5 minutes"}"#).is_err());
    }
}
