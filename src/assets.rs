//! Asset identifiers.
//!
//! Every note carries an asset id. The native chain asset has a well-known
//! id; custom assets are identified by hashing their creator address, name
//! and metadata, which is what lets the wallet check that a mint request
//! really targets an asset owned by the caller's keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::keys::PublicAddress;
use crate::models::FixedHash;

const ASSET_ID_DOMAIN: &[u8] = b"nightfall.asset";
const NATIVE_ASSET_NAME: &str = "$NIGHT";

/// Identifies an asset circulating on the chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(FixedHash);

impl AssetId {
    /// The id of the chain's native asset.
    pub fn native() -> Self {
        Self(derive_asset_id(&PublicAddress::from([0u8; 32]), NATIVE_ASSET_NAME, ""))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }
}

impl From<FixedHash> for AssetId {
    fn from(hash: FixedHash) -> Self {
        Self(hash)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl FromStr for AssetId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// An asset definition as stored by the chain.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Asset {
    pub id: AssetId,
    pub creator: PublicAddress,
    pub name: String,
    pub metadata: String,
}

impl Asset {
    /// Builds an asset definition, deriving its id from the identity fields.
    pub fn new(creator: PublicAddress, name: impl Into<String>, metadata: impl Into<String>) -> Self {
        let name = name.into();
        let metadata = metadata.into();
        let id = AssetId(derive_asset_id(&creator, &name, &metadata));
        Self { id, creator, name, metadata }
    }
}

fn derive_asset_id(creator: &PublicAddress, name: &str, metadata: &str) -> FixedHash {
    let mut hasher = Sha3_256::new();
    hasher.update(ASSET_ID_DOMAIN);
    hasher.update(creator.as_bytes());
    hasher.update((name.len() as u64).to_le_bytes());
    hasher.update(name.as_bytes());
    hasher.update(metadata.as_bytes());
    FixedHash::new(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;

    #[test]
    fn native_asset_id_is_stable() {
        assert_eq!(AssetId::native(), AssetId::native());
    }

    #[test]
    fn asset_id_binds_creator_and_identity() {
        let creator = SpendingKey::generate().public_address();
        let other = SpendingKey::generate().public_address();

        let asset = Asset::new(creator, "token", "docs");
        assert_eq!(asset.id, Asset::new(creator, "token", "docs").id);
        assert_ne!(asset.id, Asset::new(other, "token", "docs").id);
        assert_ne!(asset.id, Asset::new(creator, "token2", "docs").id);
        assert_ne!(asset.id, Asset::new(creator, "token", "other docs").id);
    }
}
