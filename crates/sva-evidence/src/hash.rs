//! File content hashing
//!
//! Provides [`ContentHash`], the 32-byte digest recorded next to every piece
//! of cached evidence. Two hashes compare equal iff the file bytes were equal
//! when they were computed.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3) of one file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Length of the hex form
    pub const HEX_LEN: usize = 64;

    /// Digest of a file's bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// First 12 hex chars, for log lines
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let digest: [u8; 32] = bytes.as_slice().try_into().map_err(|_| HashError::InvalidLength {
            expected: Self::HEX_LEN,
            actual: s.len(),
        })?;
        Ok(Self(digest))
    }
}

// Cached evidence is JSON, so the hash always travels as a hex string.
impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors decoding a stored hash
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HashError {
    /// Hex string of the wrong length
    #[error("stored hash has {actual} hex chars, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },

    /// Not a hex string
    #[error("stored hash is not hex: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
