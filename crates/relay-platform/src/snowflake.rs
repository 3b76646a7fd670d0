//! Platform object ids.
//!
//! Discord ids are 64-bit integers that travel as JSON strings so that
//! JavaScript clients don't lose precision. Some endpoints still hand back
//! plain numbers, so both forms are accepted on the way in.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Snowflake(pub u64);

impl fmt::Display for Snowflake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_string_and_number() {
        let from_str: Snowflake = serde_json::from_str("\"1234567890123456789\"").unwrap();
        let from_num: Snowflake = serde_json::from_str("42").unwrap();
        assert_eq!(from_str, Snowflake(1234567890123456789));
        assert_eq!(from_num, Snowflake(42));
    }

    #[test]
    fn test_serialize_as_string() {
        let json = serde_json::to_string(&Snowflake(987654321)).unwrap();
        assert_eq!(json, "\"987654321\"");
    }

    #[test]
    fn test_reject_garbage() {
        tokio_test::assert_err!(serde_json::from_str::<Snowflake>("\"not-an-id\""));
        tokio_test::assert_err!("".parse::<Snowflake>());
        tokio_test::assert_ok!(" 17 ".parse::<Snowflake>());
    }
}
