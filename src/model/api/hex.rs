//! Serialise byte strings as lowercase hex.

use data_encoding::HEXLOWER_PERMISSIVE;
use serde::{de::Error, Deserialize, Deserializer, Serializer};

pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&HEXLOWER_PERMISSIVE.encode(bytes))
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex = String::deserialize(deserializer)?;
    HEXLOWER_PERMISSIVE
        .decode(hex.as_bytes())
        .map_err(D::Error::custom)
}
