//! Interfaces to the node the wallet runs against.
//!
//! The wallet consumes the canonical chain store, its transaction verifier
//! and the mempool purely through these traits. Lookups are cheap in-process
//! reads on a real node, so the traits are synchronous; the wallet treats
//! every call as a suspension-point-free read and does its own scheduling
//! around them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assets::{Asset, AssetId};
use crate::models::{ChainHead, FixedHash};
use crate::transaction::{Transaction, Witness};

/// The sequence of the genesis block.
pub const GENESIS_SEQUENCE: u64 = 1;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block {0} is not known to the chain")]
    HeaderNotFound(FixedHash),
    #[error("no block at sequence {0} on the canonical chain")]
    SequenceNotFound(u64),
    #[error("the chain has no genesis block")]
    EmptyChain,
    #[error("chain store error: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: FixedHash,
    pub sequence: u64,
    pub previous_block_hash: FixedHash,
    pub timestamp: DateTime<Utc>,
}

impl BlockHeader {
    pub fn head(&self) -> ChainHead {
        ChainHead::new(self.hash, self.sequence)
    }
}

/// A transaction in a block, paired with the commitment-tree position of its
/// first output.
#[derive(Clone, Debug)]
pub struct BlockTransaction {
    pub transaction: Transaction,
    pub initial_note_index: u64,
}

/// Read access to the canonical chain.
pub trait Chain: Send + Sync {
    /// The canonical head, or `None` before genesis is added.
    fn head(&self) -> Result<Option<ChainHead>, ChainError>;

    /// The genesis block pointer.
    fn genesis(&self) -> Result<ChainHead, ChainError>;

    /// Whether the node considers itself synced with the network.
    fn synced(&self) -> bool;

    fn get_header(&self, hash: &FixedHash) -> Result<Option<BlockHeader>, ChainError>;

    /// The canonical header at `sequence`, if the chain is that long.
    fn get_header_at_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError>;

    /// Whether `hash` is a block on the canonical chain.
    fn has_block(&self, hash: &FixedHash) -> Result<bool, ChainError>;

    fn get_block_transactions(&self, header: &BlockHeader) -> Result<Vec<BlockTransaction>, ChainError>;

    /// An inclusion proof for the note at `position`, or `None` if the leaf
    /// cannot currently be witnessed.
    fn witness(&self, position: u64) -> Result<Option<Witness>, ChainError>;

    /// Whether `nullifier` has been revealed by any spend on the chain.
    fn contains_nullifier(&self, nullifier: &FixedHash) -> Result<bool, ChainError>;

    fn get_asset(&self, id: &AssetId) -> Result<Option<Asset>, ChainError>;

    fn verifier(&self) -> &dyn Verifier;
}

/// Consensus validation of transactions, as exposed by the node.
pub trait Verifier: Send + Sync {
    /// Validates a transaction the wallet just created. An error is fatal to
    /// the request that produced the transaction.
    fn verify_created_transaction(&self, transaction: &Transaction) -> Result<(), ChainError>;

    /// Whether a transaction is still valid for mempool (re)admission.
    fn verify_transaction_add(&self, transaction: &Transaction) -> Result<bool, ChainError>;
}

/// The node mempool; the wallet only ever hands it freshly posted
/// transactions.
pub trait MemPool: Send + Sync {
    /// Returns whether the transaction was accepted.
    fn accept(&self, transaction: &Transaction) -> Result<bool, ChainError>;
}
