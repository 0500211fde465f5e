//! Human-readable duration formatting and parsing utilities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid duration format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),

    #[error("Invalid unit: {0}")]
    InvalidUnit(String),

    #[error("Duration out of range: {0}")]
    Overflow(String),
}

/// Duration wrapper with human-readable parsing ("250ms", "30s", "5m", "2h", "7d")
///
/// A bare integer is interpreted as seconds, which keeps INI files and
/// environment overrides such as `MEDIABOX__WORKERS__RETRY_BACKOFF=10` working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HumanDuration(pub Duration);

impl HumanDuration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn to_human_readable(&self) -> String {
        const UNITS: &[(&str, u128)] = &[
            ("d", 86_400_000),
            ("h", 3_600_000),
            ("m", 60_000),
            ("s", 1_000),
        ];

        let millis = self.0.as_millis();
        if millis == 0 {
            return "0s".to_string();
        }

        for &(unit, divisor) in UNITS {
            if millis % divisor == 0 {
                return format!("{}{}", millis / divisor, unit);
            }
        }

        format!("{}ms", millis)
    }
}

impl From<Duration> for HumanDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<HumanDuration> for Duration {
    fn from(value: HumanDuration) -> Self {
        value.0
    }
}

impl Serialize for HumanDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_human_readable())
    }
}

impl<'de> Deserialize<'de> for HumanDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct HumanDurationVisitor;

        impl<'de> serde::de::Visitor<'de> for HumanDurationVisitor {
            type Value = HumanDuration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "a duration as string (e.g., \"30s\", \"7d\") or integer seconds",
                )
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(HumanDuration::from_secs(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(HumanDuration::from_secs)
                    .map_err(|_| E::custom(format!("duration cannot be negative: {}", v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse::<HumanDuration>().map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_any(HumanDurationVisitor)
    }
}

impl FromStr for HumanDuration {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        // Plain number means seconds
        if let Ok(num) = s.parse::<u64>() {
            return Ok(HumanDuration::from_secs(num));
        }

        let (num_str, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
            Some(0) | None => return Err(ParseError::InvalidFormat(s.to_string())),
            Some(pos) => (&s[..pos], &s[pos..]),
        };

        let num: u64 = num_str.parse()?;

        let unit = unit.trim();
        if unit == "ms" {
            return Ok(HumanDuration::from_millis(num));
        }

        let multiplier: u64 = match unit {
            "s" | "sec" | "secs" => 1,
            "m" | "min" | "mins" => 60,
            "h" | "hr" | "hours" => 3600,
            "d" | "day" | "days" => 86_400,
            _ => return Err(ParseError::InvalidUnit(unit.to_string())),
        };

        num.checked_mul(multiplier)
            .map(HumanDuration::from_secs)
            .ok_or_else(|| ParseError::Overflow(s.clone()))
    }
}

impl fmt::Display for HumanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!("30".parse::<HumanDuration>().unwrap().0, Duration::from_secs(30));
        assert_eq!("30s".parse::<HumanDuration>().unwrap().0, Duration::from_secs(30));
        assert_eq!(" 30 s ".parse::<HumanDuration>().unwrap().0, Duration::from_secs(30));
    }

    #[test]
    fn test_parse_larger_units() {
        assert_eq!("5m".parse::<HumanDuration>().unwrap().0, Duration::from_secs(300));
        assert_eq!("2h".parse::<HumanDuration>().unwrap().0, Duration::from_secs(7200));
        assert_eq!("7d".parse::<HumanDuration>().unwrap().0, Duration::from_secs(7 * 86_400));
        assert_eq!("7D".parse::<HumanDuration>().unwrap().0, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!("250ms".parse::<HumanDuration>().unwrap().0, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_invalid() {
        assert!("".parse::<HumanDuration>().is_err());
        assert!("s".parse::<HumanDuration>().is_err());
        assert!("10 weeks".parse::<HumanDuration>().is_err());
        assert!("-5s".parse::<HumanDuration>().is_err());
    }

    #[test]
    fn test_parse_overflow_is_an_error() {
        assert!(matches!(
            "300000000000000d".parse::<HumanDuration>(),
            Err(ParseError::Overflow(_))
        ));
        assert!(matches!(
            "18446744073709551615m".parse::<HumanDuration>(),
            Err(ParseError::Overflow(_))
        ));
        assert!(matches!(
            "99999999999999999999s".parse::<HumanDuration>(),
            Err(ParseError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_deserialize_overflow_is_an_error() {
        #[derive(Debug, Deserialize)]
        struct TestStruct {
            #[allow(dead_code)]
            ttl: HumanDuration,
        }
        let result = serde_json::from_str::<TestStruct>(r#"{"ttl": "300000000000000d"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_to_human_readable() {
        assert_eq!(HumanDuration::from_secs(0).to_human_readable(), "0s");
        assert_eq!(HumanDuration::from_secs(90).to_human_readable(), "90s");
        assert_eq!(HumanDuration::from_secs(300).to_human_readable(), "5m");
        assert_eq!(HumanDuration::from_secs(7 * 86_400).to_human_readable(), "7d");
        assert_eq!(HumanDuration::from_millis(1500).to_human_readable(), "1500ms");
    }

    #[test]
    fn test_deserialize_string() {
        let json = r#"{"ttl": "10m"}"#;
        #[derive(Deserialize)]
        struct TestStruct {
            ttl: HumanDuration,
        }
        let parsed: TestStruct = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.ttl.as_duration(), Duration::from_secs(600));
    }

    #[test]
    fn test_deserialize_number() {
        let json = r#"{"ttl": 45}"#;
        #[derive(Deserialize)]
        struct TestStruct {
            ttl: HumanDuration,
        }
        let parsed: TestStruct = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.ttl.as_duration(), Duration::from_secs(45));
    }

    #[test]
    fn test_serialize_is_readable() {
        let value = serde_json::to_string(&HumanDuration::from_secs(3600)).unwrap();
        assert_eq!(value, "\"1h\"");
    }
}
