//! Canonical document hashing
//!
//! Documents that are equal as JSON values hash equal regardless of object
//! key order or integral number spelling (`1` and `1.0`). The digest is a
//! sha256 over a type-tagged encoding, truncated to 128 bits.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistinctHash(pub u128);

impl DistinctHash {
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for DistinctHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl Serialize for DistinctHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct HashVisitor;

impl<'de> Visitor<'de> for HashVisitor {
    type Value = DistinctHash;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a 32 digit hex string")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<DistinctHash, E> {
        if value.len() != 32 {
            return Err(E::invalid_length(value.len(), &self));
        }
        u128::from_str_radix(value, 16)
            .map(DistinctHash)
            .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
    }
}

impl<'de> Deserialize<'de> for DistinctHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(HashVisitor)
    }
}

fn write_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn write_number(hasher: &mut Sha256, number: &Number) {
    if let Some(i) = number.as_i64() {
        hasher.update(b"i");
        hasher.update(i.to_le_bytes());
        return;
    }
    if let Some(u) = number.as_u64() {
        hasher.update(b"u");
        hasher.update(u.to_le_bytes());
        return;
    }
    let float = number.as_f64().unwrap_or(0.0);
    if float.fract() == 0.0 && float.abs() < 9.0e15 {
        hasher.update(b"i");
        hasher.update((float as i64).to_le_bytes());
    } else {
        hasher.update(b"f");
        hasher.update(float.to_le_bytes());
    }
}

fn write_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update(b"n"),
        Value::Bool(true) => hasher.update(b"t"),
        Value::Bool(false) => hasher.update(b"f"),
        Value::Number(number) => {
            hasher.update(b"d");
            write_number(hasher, number);
        }
        Value::String(text) => {
            hasher.update(b"s");
            write_len(hasher, text.len());
            hasher.update(text.as_bytes());
        }
        Value::Array(items) => {
            hasher.update(b"a");
            write_len(hasher, items.len());
            for item in items {
                write_value(hasher, item);
            }
        }
        Value::Object(map) => {
            hasher.update(b"o");
            write_len(hasher, map.len());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                write_len(hasher, key.len());
                hasher.update(key.as_bytes());
                if let Some(item) = map.get(key) {
                    write_value(hasher, item);
                }
            }
        }
    }
}

pub fn distinct_hash(value: &Value) -> DistinctHash {
    let mut hasher = Sha256::new();
    write_value(&mut hasher, value);
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    DistinctHash::from_bytes(bytes)
}
