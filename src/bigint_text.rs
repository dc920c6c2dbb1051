//! Text form of arbitrary-precision integers at API boundaries.
//!
//! Integers are written as base-10 strings. Parsing accepts base-10 or a
//! `0x`/`0X` prefixed base-16 string and nothing else: no sign, no
//! whitespace, no empty digits.
//!
//! Use with serde as `#[serde(with = "crate::bigint_text")]`, or
//! `crate::bigint_text::vec` for `Vec<BigUint>`.

use crate::error::{Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Deserializer, Serializer};

pub fn to_text(value: &BigUint) -> String {
    value.to_str_radix(10)
}

pub fn parse(text: &str) -> Result<BigUint> {
    let (digits, radix) = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (text, 10),
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(Error::InvalidInteger(format!("{:?}", text)));
    }
    BigUint::parse_bytes(digits.as_bytes(), radix)
        .ok_or_else(|| Error::InvalidInteger(format!("{:?}", text)))
}

pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_text(value))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<BigUint, D::Error> {
    let text = String::deserialize(deserializer)?;
    parse(&text).map_err(serde::de::Error::custom)
}

pub mod vec {
    use super::{parse, to_text};
    use num_bigint::BigUint;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[BigUint], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&to_text(value))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<BigUint>, D::Error> {
        let texts = Vec::<String>::deserialize(deserializer)?;
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                parse(text).map_err(|e| serde::de::Error::custom(format!("[{}]: {}", i, e)))
            })
            .collect()
    }
}
