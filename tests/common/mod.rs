//! Shared fixtures: an in-memory canonical chain, a collecting mempool, and
//! a wallet harness wired to both.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use nightfall_wallet::assets::{Asset, AssetId};
use nightfall_wallet::chain::{
    BlockHeader, BlockTransaction, Chain, ChainError, MemPool, Verifier,
};
use nightfall_wallet::config::WalletConfig;
use nightfall_wallet::db::{self, SqlitePool};
use nightfall_wallet::events::{ChannelEventSender, WalletEvent};
use nightfall_wallet::keys::{PublicAddress, SpendingKey};
use nightfall_wallet::models::{ChainHead, FixedHash};
use nightfall_wallet::notes::{EncryptedNote, Memo, Note};
use nightfall_wallet::transaction::{Transaction, Witness};
use nightfall_wallet::wallet::Wallet;
use nightfall_wallet::workers::WorkerPool;
use tokio::sync::mpsc::UnboundedReceiver;

struct StoredBlock {
    header: BlockHeader,
    transactions: Vec<BlockTransaction>,
    leaves_added: usize,
    nullifiers_added: Vec<FixedHash>,
}

#[derive(Default)]
struct ChainInner {
    canonical: Vec<FixedHash>,
    blocks: HashMap<FixedHash, StoredBlock>,
    leaves: Vec<FixedHash>,
    nullifiers: HashSet<FixedHash>,
    assets: HashMap<AssetId, Asset>,
    synced: bool,
    block_counter: u64,
}

/// A canonical chain living in memory, with enough commitment-tree and
/// nullifier bookkeeping to drive the wallet end to end. Popped blocks stay
/// resolvable by hash so disconnect walks can fetch their transactions.
pub struct MemoryChain {
    inner: Mutex<ChainInner>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ChainInner { synced: true, ..Default::default() }),
        }
    }

    pub fn set_synced(&self, synced: bool) {
        self.inner.lock().unwrap().synced = synced;
    }

    /// Appends a block containing `transactions` and returns its header.
    pub fn add_block(&self, transactions: Vec<Transaction>) -> BlockHeader {
        let mut inner = self.inner.lock().unwrap();
        inner.block_counter += 1;

        let sequence = inner.canonical.len() as u64 + 1;
        let previous_block_hash = inner.canonical.last().copied().unwrap_or(FixedHash::zero());

        let mut hash_bytes = [0u8; 32];
        hash_bytes[..8].copy_from_slice(&inner.block_counter.to_le_bytes());
        hash_bytes[8..16].copy_from_slice(&sequence.to_le_bytes());
        let hash = FixedHash::new(hash_bytes);

        let header = BlockHeader {
            hash,
            sequence,
            previous_block_hash,
            timestamp: chrono::Utc::now(),
        };

        let mut block_transactions = Vec::with_capacity(transactions.len());
        let mut leaves_added = 0;
        let mut nullifiers_added = Vec::new();
        for transaction in transactions {
            let initial_note_index = inner.leaves.len() as u64;
            for output in &transaction.outputs {
                inner.leaves.push(output.commitment);
                leaves_added += 1;
            }
            for spend in &transaction.spends {
                inner.nullifiers.insert(spend.nullifier);
                nullifiers_added.push(spend.nullifier);
            }
            for mint in &transaction.mints {
                inner.assets.entry(mint.asset.id).or_insert_with(|| mint.asset.clone());
            }
            block_transactions.push(BlockTransaction { transaction, initial_note_index });
        }

        inner.canonical.push(hash);
        inner.blocks.insert(
            hash,
            StoredBlock {
                header,
                transactions: block_transactions,
                leaves_added,
                nullifiers_added,
            },
        );
        header
    }

    /// Removes the tip block from the canonical chain, undoing its leaves
    /// and nullifiers. The block stays resolvable by hash.
    pub fn pop_block(&self) -> BlockHeader {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.canonical.pop().expect("chain is empty");
        let (header, leaves_added, nullifiers_added) = {
            let block = &inner.blocks[&hash];
            (block.header, block.leaves_added, block.nullifiers_added.clone())
        };
        let new_len = inner.leaves.len() - leaves_added;
        inner.leaves.truncate(new_len);
        for nullifier in nullifiers_added {
            inner.nullifiers.remove(&nullifier);
        }
        header
    }

    /// A block rewarding `owner` with a single freshly minted native note.
    pub fn add_reward_block(&self, owner: &PublicAddress, value: u64) -> BlockHeader {
        self.add_block(vec![reward_transaction(owner, value)])
    }

    pub fn add_empty_block(&self) -> BlockHeader {
        self.add_block(vec![])
    }

    /// Marks a nullifier as revealed on chain without a wallet-visible
    /// spend, simulating a stale local view.
    pub fn insert_nullifier(&self, nullifier: FixedHash) {
        self.inner.lock().unwrap().nullifiers.insert(nullifier);
    }

    pub fn register_asset(&self, asset: Asset) {
        self.inner.lock().unwrap().assets.insert(asset.id, asset);
    }
}

impl Chain for MemoryChain {
    fn head(&self) -> Result<Option<ChainHead>, ChainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.canonical.last().map(|hash| inner.blocks[hash].header.head()))
    }

    fn genesis(&self) -> Result<ChainHead, ChainError> {
        let inner = self.inner.lock().unwrap();
        inner
            .canonical
            .first()
            .map(|hash| inner.blocks[hash].header.head())
            .ok_or(ChainError::EmptyChain)
    }

    fn synced(&self) -> bool {
        self.inner.lock().unwrap().synced
    }

    fn get_header(&self, hash: &FixedHash) -> Result<Option<BlockHeader>, ChainError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.blocks.get(hash).map(|block| block.header))
    }

    fn get_header_at_sequence(&self, sequence: u64) -> Result<Option<BlockHeader>, ChainError> {
        let inner = self.inner.lock().unwrap();
        Ok(sequence
            .checked_sub(1)
            .and_then(|index| inner.canonical.get(index as usize))
            .map(|hash| inner.blocks[hash].header))
    }

    fn has_block(&self, hash: &FixedHash) -> Result<bool, ChainError> {
        Ok(self.inner.lock().unwrap().canonical.contains(hash))
    }

    fn get_block_transactions(&self, header: &BlockHeader) -> Result<Vec<BlockTransaction>, ChainError> {
        let inner = self.inner.lock().unwrap();
        inner
            .blocks
            .get(&header.hash)
            .map(|block| block.transactions.clone())
            .ok_or(ChainError::HeaderNotFound(header.hash))
    }

    fn witness(&self, position: u64) -> Result<Option<Witness>, ChainError> {
        let inner = self.inner.lock().unwrap();
        if (position as usize) < inner.leaves.len() {
            Ok(Some(Witness {
                position,
                tree_size: inner.leaves.len() as u64,
                root: FixedHash::zero(),
                auth_path: Vec::new(),
            }))
        } else {
            Ok(None)
        }
    }

    fn contains_nullifier(&self, nullifier: &FixedHash) -> Result<bool, ChainError> {
        Ok(self.inner.lock().unwrap().nullifiers.contains(nullifier))
    }

    fn get_asset(&self, id: &AssetId) -> Result<Option<Asset>, ChainError> {
        Ok(self.inner.lock().unwrap().assets.get(id).cloned())
    }

    fn verifier(&self) -> &dyn Verifier {
        self
    }
}

impl Verifier for MemoryChain {
    fn verify_created_transaction(&self, transaction: &Transaction) -> Result<(), ChainError> {
        let inner = self.inner.lock().unwrap();
        for spend in &transaction.spends {
            if inner.nullifiers.contains(&spend.nullifier) {
                return Err(ChainError::Store(anyhow::anyhow!("double spend")));
            }
        }
        let head_sequence = inner
            .canonical
            .last()
            .map(|hash| inner.blocks[hash].header.sequence)
            .unwrap_or(0);
        if transaction.expiration != 0 && transaction.expiration <= head_sequence {
            return Err(ChainError::Store(anyhow::anyhow!("transaction expired")));
        }
        Ok(())
    }

    fn verify_transaction_add(&self, transaction: &Transaction) -> Result<bool, ChainError> {
        Ok(self.verify_created_transaction(transaction).is_ok())
    }
}

/// Collects accepted transactions.
#[derive(Default)]
pub struct MemoryMemPool {
    accepted: Mutex<Vec<Transaction>>,
}

impl MemoryMemPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accepted(&self) -> Vec<Transaction> {
        self.accepted.lock().unwrap().clone()
    }
}

impl MemPool for MemoryMemPool {
    fn accept(&self, transaction: &Transaction) -> Result<bool, ChainError> {
        self.accepted.lock().unwrap().push(transaction.clone());
        Ok(true)
    }
}

/// A miner reward: a single sealed note with no spends and no fee.
pub fn reward_transaction(owner: &PublicAddress, value: u64) -> Transaction {
    let throwaway = SpendingKey::generate();
    let note = Note::new(*owner, value, Memo::from("reward"), AssetId::native(), *owner);
    Transaction {
        fee: 0,
        expiration: 0,
        spends: vec![],
        outputs: vec![EncryptedNote::seal(&note, &throwaway.outgoing_view_key()).expect("seal reward note")],
        mints: vec![],
        burns: vec![],
    }
}

/// A wallet wired to a fresh database, an in-memory chain and an event
/// channel.
pub struct TestHarness {
    _dir: tempfile::TempDir,
    pub pool: SqlitePool,
    pub chain: Arc<MemoryChain>,
    pub wallet: Arc<Wallet>,
    pub mempool: MemoryMemPool,
    pub events: UnboundedReceiver<WalletEvent>,
}

impl TestHarness {
    pub async fn with_config(config: WalletConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = db::init_db(dir.path().join("wallet.db")).expect("Failed to init DB");
        let chain = Arc::new(MemoryChain::new());
        let (sender, events) = tokio::sync::mpsc::unbounded_channel();

        let wallet = Arc::new(Wallet::new(
            pool.clone(),
            chain.clone(),
            Arc::new(WorkerPool::new(config.decrypt_batch_size)),
            Arc::new(ChannelEventSender::new(sender)),
            config,
        ));
        wallet.open().await.expect("Failed to open wallet");

        Self { _dir: dir, pool, chain, wallet, mempool: MemoryMemPool::new(), events }
    }

    /// Defaults with no confirmation depth, so rewards spend immediately.
    pub async fn new() -> Self {
        Self::with_config(WalletConfig { confirmations: 0, ..WalletConfig::default() }).await
    }

    pub fn conn(&self) -> db::PooledConnection {
        self.pool.get().expect("Failed to get connection")
    }

    /// Events emitted so far.
    pub fn drain_events(&mut self) -> Vec<WalletEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
