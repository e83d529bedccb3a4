//! 32-byte hash type and the canonical binary encoding used to hash records
//!
//! Records are hashed structurally: every field is appended to a byte buffer in
//! declared order using the rules below, and the buffer is run through SHA-256.
//!
//! - strings: var-int length prefix followed by the UTF-8 bytes
//! - `u32`: 4 bytes little endian
//! - `u64`: 8 bytes little endian
//! - [`Hash`]: the raw 32 bytes
//! - slices: var-int element count followed by every element

use crate::error::ChainError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of bytes in a [`Hash`].
pub const HASH_WIDTH: usize = 32;

/// A SHA-256 digest. Ordering and equality are byte-wise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash([u8; HASH_WIDTH]);

impl Hash {
    /// All-zero hash, used as the parent of the genesis block.
    pub const NULL: Hash = Hash([0u8; HASH_WIDTH]);

    pub const fn new(bytes: [u8; HASH_WIDTH]) -> Self {
        Hash(bytes)
    }

    /// Builds a hash from a slice, rejecting anything that is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ChainError> {
        let data: [u8; HASH_WIDTH] = bytes.try_into().map_err(|_| {
            ChainError::InvalidHash(format!(
                "Hash must be {} bytes, got {}",
                HASH_WIDTH,
                bytes.len()
            ))
        })?;
        Ok(Hash(data))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_WIDTH] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl From<[u8; HASH_WIDTH]> for Hash {
    fn from(bytes: [u8; HASH_WIDTH]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits)
            .map_err(|e| ChainError::InvalidHash(format!("Invalid hex '{}': {}", s, e)))?;
        Hash::from_slice(&bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A record that can write its canonical encoding into a hash buffer.
pub trait Hashable {
    fn compute_hash(&self, buffer: &mut Vec<u8>);
}

impl Hashable for Hash {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.0);
    }
}

impl Hashable for str {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        write_var_int(self.len() as u64, buffer);
        buffer.extend_from_slice(self.as_bytes());
    }
}

impl Hashable for String {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        self.as_str().compute_hash(buffer);
    }
}

impl Hashable for u32 {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_le_bytes());
    }
}

impl Hashable for u64 {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        buffer.extend_from_slice(&self.to_le_bytes());
    }
}

impl<T: Hashable> Hashable for [T] {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        write_var_int(self.len() as u64, buffer);
        for elem in self {
            elem.compute_hash(buffer);
        }
    }
}

impl<T: Hashable> Hashable for Vec<T> {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        self.as_slice().compute_hash(buffer);
    }
}

impl<T: Hashable + ?Sized> Hashable for &T {
    fn compute_hash(&self, buffer: &mut Vec<u8>) {
        (**self).compute_hash(buffer);
    }
}

/// Writes a length or count using the compact variable-length integer format.
pub fn write_var_int(value: u64, buffer: &mut Vec<u8>) {
    if value <= 0xfc {
        buffer.push(value as u8);
    } else if value <= 0xffff {
        buffer.push(0xfd);
        buffer.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value < 0xffff_ffff {
        buffer.push(0xfe);
        buffer.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        buffer.push(0xff);
        buffer.extend_from_slice(&value.to_le_bytes());
    }
}

/// SHA-256 of raw bytes.
pub fn hash(source: &[u8]) -> Hash {
    Hash(Sha256::digest(source).into())
}

/// SHA-256 over the concatenated canonical encodings of `parts`.
pub fn hash_multi(parts: &[&dyn Hashable]) -> Hash {
    let mut buffer = Vec::new();
    for part in parts {
        part.compute_hash(&mut buffer);
    }
    hash(&buffer)
}

/// Structural hash of a single record.
pub fn hash_full<T: Hashable + ?Sized>(record: &T) -> Hash {
    let mut buffer = Vec::new();
    record.compute_hash(&mut buffer);
    hash(&buffer)
}

/// Like [`hash_full`], but an absent record hashes to [`Hash::NULL`].
pub fn hash_full_or_null<T: Hashable + ?Sized>(record: Option<&T>) -> Hash {
    record.map(hash_full).unwrap_or(Hash::NULL)
}
