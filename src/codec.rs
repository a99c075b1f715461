//! Tolerant decoding for numeric fields.
//!
//! The identity endpoints emit fields such as `expires_in` either as a JSON
//! number or as a numeric string depending on the endpoint version. These
//! helpers are used with `#[serde(deserialize_with = "...")]` on every response
//! type so both encodings decode to the same integer.

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn into_u64<E: de::Error>(self) -> Result<u64, E> {
        match self {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| E::custom(format!("expected a numeric string, got {:?}", s))),
        }
    }
}

/// Decode a `u64` encoded either as a JSON number or a numeric string
pub fn flexible_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrString::deserialize(deserializer)?.into_u64()
}

/// Optional variant of [`flexible_u64`]; `null` and empty strings decode to `None`
pub fn flexible_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value.into_u64().map(Some),
    }
}
