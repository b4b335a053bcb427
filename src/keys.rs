//! Account key material.
//!
//! A shielded account is a chain of derivations from one random spending key:
//!
//! ```text
//! SpendingKey --> IncomingViewKey --> PublicAddress
//!            \--> OutgoingViewKey
//! ```
//!
//! The incoming view key detects and decrypts notes addressed to the account,
//! the outgoing view key decrypts the sender copies of notes the account
//! created, and only the spending key can derive nullifiers. The public
//! address is derivable from the incoming view key alone, so a view-only
//! holder can still recognize its own notes.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

const INCOMING_VIEW_KEY_DOMAIN: &[u8] = b"nightfall.key.incoming";
const OUTGOING_VIEW_KEY_DOMAIN: &[u8] = b"nightfall.key.outgoing";
const PUBLIC_ADDRESS_DOMAIN: &[u8] = b"nightfall.key.address";

fn derive(domain: &[u8], input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(domain);
    hasher.update(input);
    hasher.finalize().into()
}

macro_rules! key_material {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde(with = "hex::serde")] [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Keys never land in debug output in full.
                write!(f, concat!(stringify!($name), "({}..)"), &self.to_hex()[..8])
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }
        }
    };
}

key_material! {
    /// The root secret of an account.
    SpendingKey
}

key_material! {
    /// Detects and decrypts notes addressed to the account.
    IncomingViewKey
}

key_material! {
    /// Decrypts the sender copies of notes the account created.
    OutgoingViewKey
}

key_material! {
    /// The account's shielded address, derivable from the incoming view key.
    PublicAddress
}

impl SpendingKey {
    /// Generates a fresh random spending key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn incoming_view_key(&self) -> IncomingViewKey {
        IncomingViewKey(derive(INCOMING_VIEW_KEY_DOMAIN, &self.0))
    }

    pub fn outgoing_view_key(&self) -> OutgoingViewKey {
        OutgoingViewKey(derive(OUTGOING_VIEW_KEY_DOMAIN, &self.0))
    }

    pub fn public_address(&self) -> PublicAddress {
        self.incoming_view_key().public_address()
    }
}

impl IncomingViewKey {
    pub fn public_address(&self) -> PublicAddress {
        PublicAddress(derive(PUBLIC_ADDRESS_DOMAIN, &self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let key = SpendingKey::from([7u8; 32]);
        assert_eq!(key.incoming_view_key(), key.incoming_view_key());
        assert_eq!(key.public_address(), key.incoming_view_key().public_address());
    }

    #[test]
    fn derived_keys_are_distinct() {
        let key = SpendingKey::generate();
        assert_ne!(key.incoming_view_key().as_bytes(), key.outgoing_view_key().as_bytes());
        assert_ne!(key.as_bytes(), key.incoming_view_key().as_bytes());
    }

    #[test]
    fn distinct_spending_keys_give_distinct_addresses() {
        assert_ne!(
            SpendingKey::generate().public_address(),
            SpendingKey::generate().public_address()
        );
    }

    #[test]
    fn hex_round_trip() {
        let key = SpendingKey::generate();
        let parsed: SpendingKey = key.to_hex().parse().unwrap();
        assert_eq!(parsed, key);
    }
}
