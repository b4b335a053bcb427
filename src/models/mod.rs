//! Shared data types used across the wallet engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

mod transaction_status;
pub use transaction_status::{TransactionStatus, TransactionType};

/// A 32-byte identifier: block hashes, note commitments, nullifiers,
/// transaction hashes and asset identifiers all share this shape.
///
/// Stored and serialized as lowercase hex so database columns stay readable
/// and order by byte value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixedHash(#[serde(with = "hex::serde")] [u8; 32]);

impl FixedHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; 32]> for FixedHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for FixedHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for FixedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FixedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedHash({})", self.to_hex())
    }
}

impl FromStr for FixedHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

/// A `(hash, sequence)` pointer naming the last block applied to a scope:
/// either a single account or the orchestrator's chain cursor.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ChainHead {
    pub hash: FixedHash,
    pub sequence: u64,
}

impl ChainHead {
    pub fn new(hash: FixedHash, sequence: u64) -> Self {
        Self { hash, sequence }
    }
}

impl fmt::Display for ChainHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.hash, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_hash_hex_round_trip() {
        let hash = FixedHash::new([0xab; 32]);
        let encoded = hash.to_string();
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded.parse::<FixedHash>().unwrap(), hash);
    }

    #[test]
    fn fixed_hash_rejects_short_input() {
        assert!("abcd".parse::<FixedHash>().is_err());
    }

    #[test]
    fn fixed_hash_serde_uses_hex() {
        let hash = FixedHash::new([1u8; 32]);
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: FixedHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }
}
