//! Definitions shared by the `evm_replay` crates: the EVM opcode table and the
//! serde helpers used for the canonical JSON documents.

use ethereum_types::H256;

pub mod opcode;

/// The hash value of an account empty EVM code.
/// 0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
pub const EMPTY_CODE_HASH: H256 = H256([
    197, 210, 70, 1, 134, 247, 35, 60, 146, 126, 125, 178, 220, 199, 3, 192, 229, 0, 182, 83, 202,
    130, 39, 59, 123, 250, 216, 4, 93, 133, 164, 112,
]);

/// Like `#[serde(with = "hex")`, but tolerates and emits leading `0x` prefixes
pub mod hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn serialize<S: Serializer, T>(data: T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: hex::ToHex,
    {
        let s = data.encode_hex::<String>();
        serializer.serialize_str(&format!("0x{}", s))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, T>(deserializer: D) -> Result<T, D::Error>
    where
        T: hex::FromHex,
        T::Error: std::fmt::Display,
    {
        let s = String::deserialize(deserializer)?;
        match s.strip_prefix("0x") {
            Some(rest) => T::from_hex(rest),
            None => T::from_hex(&*s),
        }
        .map_err(D::Error::custom)
    }
}

/// `u64` quantities as they appear in tracer output.
///
/// Producers disagree on the encoding: some emit native JSON integers, some
/// `0x`-prefixed hex strings and a few decimal strings. All of them are
/// accepted, and the value is always emitted as a minimal lowercase `0x` hex
/// string.
pub mod quantity {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{value:#x}"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Int(it) => Ok(it),
            Repr::Str(s) => parse(&s).ok_or_else(|| D::Error::custom(format!("bad quantity {s:?}"))),
        }
    }

    /// Parses `0x`-prefixed hex, or plain decimal.
    pub fn parse(s: &str) -> Option<u64> {
        let s = s.trim();
        match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some("") => Some(0),
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    pub(crate) enum Repr {
        Int(u64),
        Str(String),
    }

    /// Same as the parent module, for optional fields.
    pub mod option {
        use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

        use super::Repr;

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(it) => super::serialize(it, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            match Option::<Repr>::deserialize(deserializer)? {
                None => Ok(None),
                Some(Repr::Int(it)) => Ok(Some(it)),
                Some(Repr::Str(s)) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("bad quantity {s:?}"))),
            }
        }
    }
}

#[test]
fn test_empty_code_hash() {
    assert_eq!(EMPTY_CODE_HASH, keccak_hash::keccak([]));
}

#[test]
fn test_quantity_encodings() {
    #[derive(serde::Deserialize, serde::Serialize)]
    struct Gas(#[serde(with = "quantity")] u64);

    for raw in ["35317", "\"0x89f5\"", "\"35317\"", "\"0X89F5\""] {
        let Gas(it) = serde_json::from_str(raw).unwrap();
        assert_eq!(it, 35317, "{raw}");
    }
    assert_eq!(serde_json::to_string(&Gas(35317)).unwrap(), "\"0x89f5\"");
    assert_eq!(serde_json::to_string(&Gas(0)).unwrap(), "\"0x0\"");
}
