//! Transactions: the posted on-chain form and the raw, unproven form the
//! wallet assembles before handing it to the worker pool.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

use crate::assets::{Asset, AssetId};
use crate::keys::SpendingKey;
use crate::models::FixedHash;
use crate::notes::{EncryptedNote, Memo, Note, NoteError};

const TRANSACTION_HASH_DOMAIN: &[u8] = b"nightfall.transaction";

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error(transparent)]
    Note(#[from] NoteError),
    #[error("spends do not cover outputs for asset {0}")]
    Unbalanced(AssetId),
}

/// A consumed note: the revealed nullifier plus the commitment-tree anchor
/// it was proven against.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Spend {
    pub nullifier: FixedHash,
    pub commitment: FixedHash,
    pub tree_size: u64,
    pub root: FixedHash,
}

/// Creation of new value for an asset owned by the transaction's signer.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Mint {
    pub asset: Asset,
    pub value: u64,
}

/// Destruction of circulating value for an asset.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Burn {
    pub asset_id: AssetId,
    pub value: u64,
}

/// A proven transaction as it circulates on the network and in blocks.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub fee: u64,
    /// Block sequence past which this transaction is invalid; zero means it
    /// never expires.
    pub expiration: u64,
    pub spends: Vec<Spend>,
    pub outputs: Vec<EncryptedNote>,
    pub mints: Vec<Mint>,
    pub burns: Vec<Burn>,
}

impl Transaction {
    /// Content hash identifying this transaction.
    pub fn hash(&self) -> FixedHash {
        let mut hasher = Sha3_256::new();
        hasher.update(TRANSACTION_HASH_DOMAIN);
        hasher.update(self.fee.to_le_bytes());
        hasher.update(self.expiration.to_le_bytes());
        hasher.update((self.spends.len() as u64).to_le_bytes());
        for spend in &self.spends {
            hasher.update(spend.nullifier.as_bytes());
            hasher.update(spend.commitment.as_bytes());
            hasher.update(spend.tree_size.to_le_bytes());
            hasher.update(spend.root.as_bytes());
        }
        hasher.update((self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.hashable_bytes());
        }
        hasher.update((self.mints.len() as u64).to_le_bytes());
        for mint in &self.mints {
            hasher.update(mint.asset.id.as_bytes());
            hasher.update(mint.value.to_le_bytes());
        }
        hasher.update((self.burns.len() as u64).to_le_bytes());
        for burn in &self.burns {
            hasher.update(burn.asset_id.as_bytes());
            hasher.update(burn.value.to_le_bytes());
        }
        FixedHash::new(hasher.finalize().into())
    }

    /// Whether this is a miner reward: value created from the block subsidy
    /// with nothing consumed.
    pub fn is_miners_fee(&self) -> bool {
        self.spends.is_empty() && self.mints.is_empty() && self.burns.is_empty() && self.fee == 0
    }
}

/// A Merkle authentication path proving a note's inclusion in the commitment
/// tree at a given tree size.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Witness {
    pub position: u64,
    pub tree_size: u64,
    pub root: FixedHash,
    pub auth_path: Vec<FixedHash>,
}

/// A note selected to be consumed, together with its inclusion proof.
#[derive(Clone, Debug)]
pub struct SpendSource {
    pub note: Note,
    pub witness: Witness,
}

/// An assembled-but-unproven transaction.
///
/// The wallet fills this in during transaction construction; the worker pool
/// turns it into a [`Transaction`] via [`RawTransaction::post`].
#[derive(Clone, Debug)]
pub struct RawTransaction {
    pub spending_key: SpendingKey,
    pub fee: u64,
    pub expiration: u64,
    pub spends: Vec<SpendSource>,
    pub outputs: Vec<Note>,
    pub mints: Vec<Mint>,
    pub burns: Vec<Burn>,
}

impl RawTransaction {
    pub fn new(spending_key: SpendingKey, fee: u64, expiration: u64) -> Self {
        Self {
            spending_key,
            fee,
            expiration,
            spends: Vec::new(),
            outputs: Vec::new(),
            mints: Vec::new(),
            burns: Vec::new(),
        }
    }

    /// Proves the transaction: derives each spend's nullifier from the
    /// spending key and the witnessed position, returns any per-asset
    /// surplus to the spender as change notes, and seals every output.
    ///
    /// This is the compute-heavy step; callers run it on the worker pool.
    pub fn post(&self) -> Result<Transaction, TransactionError> {
        let outgoing_view_key = self.spending_key.outgoing_view_key();
        let change_address = self.spending_key.public_address();

        let spends: Vec<Spend> = self
            .spends
            .iter()
            .map(|source| Spend {
                nullifier: source.note.nullifier(&self.spending_key, source.witness.position),
                commitment: source.note.commitment(),
                tree_size: source.witness.tree_size,
                root: source.witness.root,
            })
            .collect();

        // Value balance per asset: spends and mints fund outputs, burns and
        // the fee; whatever is left over comes back as change.
        let mut balance: BTreeMap<AssetId, i128> = BTreeMap::new();
        for source in &self.spends {
            *balance.entry(source.note.asset_id).or_insert(0) += source.note.value as i128;
        }
        for mint in &self.mints {
            *balance.entry(mint.asset.id).or_insert(0) += mint.value as i128;
        }
        for note in &self.outputs {
            *balance.entry(note.asset_id).or_insert(0) -= note.value as i128;
        }
        for burn in &self.burns {
            *balance.entry(burn.asset_id).or_insert(0) -= burn.value as i128;
        }
        *balance.entry(AssetId::native()).or_insert(0) -= self.fee as i128;

        let mut notes = self.outputs.clone();
        for (asset_id, surplus) in balance {
            if surplus < 0 {
                return Err(TransactionError::Unbalanced(asset_id));
            }
            if surplus > 0 {
                notes.push(Note::new(
                    change_address,
                    surplus as u64,
                    Memo::default(),
                    asset_id,
                    change_address,
                ));
            }
        }

        let outputs = notes
            .iter()
            .map(|note| EncryptedNote::seal(note, &outgoing_view_key))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TransactionError::from)?;

        Ok(Transaction {
            fee: self.fee,
            expiration: self.expiration,
            spends,
            outputs,
            mints: self.mints.clone(),
            burns: self.burns.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::Memo;

    fn miner_reward(value: u64) -> Transaction {
        let key = SpendingKey::generate();
        let note = Note::new(
            key.public_address(),
            value,
            Memo::default(),
            AssetId::native(),
            key.public_address(),
        );
        Transaction {
            fee: 0,
            expiration: 0,
            spends: vec![],
            outputs: vec![EncryptedNote::seal(&note, &key.outgoing_view_key()).unwrap()],
            mints: vec![],
            burns: vec![],
        }
    }

    #[test]
    fn hash_is_stable_and_content_sensitive() {
        let tx = miner_reward(10);
        assert_eq!(tx.hash(), tx.hash());

        let mut other = tx.clone();
        other.fee = 1;
        assert_ne!(tx.hash(), other.hash());
    }

    #[test]
    fn miner_reward_detection() {
        assert!(miner_reward(10).is_miners_fee());

        let mut tx = miner_reward(10);
        tx.fee = 1;
        assert!(!tx.is_miners_fee());
    }

    #[test]
    fn posting_derives_nullifiers_from_witness_positions() {
        let key = SpendingKey::generate();
        let note = Note::new(
            key.public_address(),
            7,
            Memo::default(),
            AssetId::native(),
            key.public_address(),
        );
        let witness = Witness {
            position: 5,
            tree_size: 8,
            root: FixedHash::zero(),
            auth_path: vec![],
        };

        let mut raw = RawTransaction::new(key, 1, 20);
        raw.spends.push(SpendSource { note: note.clone(), witness });

        let posted = raw.post().unwrap();
        assert_eq!(posted.spends[0].nullifier, note.nullifier(&raw.spending_key, 5));
        assert_eq!(posted.spends[0].commitment, note.commitment());
    }

    #[test]
    fn posting_returns_surplus_as_change_to_the_spender() {
        let key = SpendingKey::generate();
        let note = Note::new(
            key.public_address(),
            100,
            Memo::default(),
            AssetId::native(),
            key.public_address(),
        );
        let witness = Witness {
            position: 0,
            tree_size: 1,
            root: FixedHash::zero(),
            auth_path: vec![],
        };

        let mut raw = RawTransaction::new(key, 1, 20);
        raw.spends.push(SpendSource { note, witness });
        raw.outputs.push(Note::new(
            SpendingKey::generate().public_address(),
            60,
            Memo::default(),
            AssetId::native(),
            key.public_address(),
        ));

        let posted = raw.post().unwrap();
        assert_eq!(posted.outputs.len(), 2);

        // The change note opens with the spender's incoming view key.
        let change = posted.outputs[1].open(&key.incoming_view_key()).unwrap();
        assert_eq!(change.value, 39);
        assert_eq!(change.owner, key.public_address());
    }

    #[test]
    fn posting_rejects_underfunded_outputs() {
        let key = SpendingKey::generate();
        let mut raw = RawTransaction::new(key, 0, 20);
        raw.outputs.push(Note::new(
            key.public_address(),
            10,
            Memo::default(),
            AssetId::native(),
            key.public_address(),
        ));

        assert!(matches!(raw.post(), Err(TransactionError::Unbalanced(_))));
    }
}
