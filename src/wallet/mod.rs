//! The wallet orchestrator.
//!
//! Owns the account registry and the chain cursor, drives the block
//! connect/disconnect pipeline and the background event loop, and builds and
//! posts transactions. One instance tracks one wallet database against one
//! chain.

mod account;
mod selector;

pub use account::{Account, AccountBalance};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::{debug, error, info, warn};
use rusqlite::TransactionBehavior;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::assets::{Asset, AssetId};
use crate::chain::{BlockHeader, Chain, GENESIS_SEQUENCE, MemPool};
use crate::config::WalletConfig;
use crate::db::{self, AccountValue, SqlitePool, TransactionRecord, WalletDbError};
use crate::error::{WalletError, WalletResult};
use crate::events::{EventSender, WalletEvent};
use crate::keys::PublicAddress;
use crate::log::mask_string;
use crate::models::{ChainHead, FixedHash, TransactionStatus, TransactionType};
use crate::notes::{Memo, Note};
use crate::scan::{ChainEvent, ChainFollower, ScanState, decrypt_transaction_notes};
use crate::transaction::{Burn, Mint, RawTransaction, Transaction};
use crate::workers::{DecryptedNoteData, WorkerPool};

/// A requested output of a transaction being built.
#[derive(Debug, Clone)]
pub struct TransactionOutput {
    pub address: PublicAddress,
    pub value: u64,
    pub memo: Memo,
    pub asset_id: AssetId,
}

/// Which asset a mint request targets: an existing one by id, or a new
/// definition minted under the caller's creator address.
#[derive(Debug, Clone)]
pub enum MintAsset {
    Id(AssetId),
    Definition { name: String, metadata: String },
}

#[derive(Debug, Clone)]
pub struct MintRequest {
    pub asset: MintAsset,
    pub value: u64,
}

#[derive(Debug, Clone)]
pub struct BurnRequest {
    pub asset_id: AssetId,
    pub value: u64,
}

pub struct Wallet {
    db: SqlitePool,
    chain: Arc<dyn Chain>,
    worker_pool: Arc<WorkerPool>,
    events: Arc<dyn EventSender>,
    config: WalletConfig,

    is_open: AtomicBool,
    accounts: RwLock<std::collections::HashMap<Uuid, Arc<Account>>>,
    default_account_id: Mutex<Option<Uuid>>,
    follower: Mutex<ChainFollower>,

    /// At most one full rescan at a time.
    scan: Mutex<Option<Arc<ScanState>>>,
    /// At most one routine head update at a time.
    update_head_state: Mutex<Option<Arc<ScanState>>>,
    /// Serializes transaction assembly so spend selection cannot race
    /// against itself.
    create_transaction_mutex: tokio::sync::Mutex<()>,

    event_loop_token: Mutex<Option<CancellationToken>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Wallet {
    pub fn new(
        db: SqlitePool,
        chain: Arc<dyn Chain>,
        worker_pool: Arc<WorkerPool>,
        events: Arc<dyn EventSender>,
        config: WalletConfig,
    ) -> Self {
        Self {
            db,
            chain,
            worker_pool,
            events,
            config,
            is_open: AtomicBool::new(false),
            accounts: RwLock::new(std::collections::HashMap::new()),
            default_account_id: Mutex::new(None),
            follower: Mutex::new(ChainFollower::new(None)),
            scan: Mutex::new(None),
            update_head_state: Mutex::new(None),
            create_transaction_mutex: tokio::sync::Mutex::new(()),
            event_loop_token: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    fn conn(&self) -> WalletResult<db::PooledConnection> {
        Ok(self.db.get().map_err(WalletDbError::from)?)
    }

    // ---- lifecycle ------------------------------------------------------

    /// Loads persisted accounts, the default account and the chain cursor
    /// into memory. Idempotent.
    pub async fn open(&self) -> WalletResult<()> {
        if self.is_open.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let conn = self.conn()?;
        let values = db::list_accounts(&conn)?;
        let count = values.len();
        {
            let mut registry = self.accounts.write().unwrap();
            for value in values {
                registry.insert(value.id, Arc::new(Account::from_value(value)));
            }
        }
        *self.default_account_id.lock().unwrap() = db::get_default_account_id(&conn)?;

        let cursor = db::latest_account_head(&conn)?;
        self.follower.lock().unwrap().reset(cursor);

        info!(
            accounts = count,
            cursor = &*cursor.map(|c| c.to_string()).unwrap_or_else(|| "null".to_string());
            "Wallet opened"
        );
        Ok(())
    }

    /// Unloads in-memory state. Persisted data is untouched. Idempotent.
    pub async fn close(&self) -> WalletResult<()> {
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.accounts.write().unwrap().clear();
        *self.default_account_id.lock().unwrap() = None;
        self.follower.lock().unwrap().reset(None);
        info!("Wallet closed");
        Ok(())
    }

    /// Starts background processing: verifies the stored cursor is still
    /// canonical (resetting all account heads if not), kicks off a rescan if
    /// any account is behind, and spawns the event loop.
    pub async fn start(self: &Arc<Self>) -> WalletResult<()> {
        self.open().await?;

        if self.event_loop_handle.lock().unwrap().is_some() {
            return Ok(());
        }

        let cursor = self.follower.lock().unwrap().head();
        if let Some(cursor) = cursor {
            if !self.chain.has_block(&cursor.hash)? {
                error!(
                    target: "audit",
                    block = &*cursor.hash.to_hex();
                    "Stored chain cursor is not on the canonical chain; resetting account heads"
                );
                self.reset_accounts()?;
            }
        }

        if self.any_account_behind()? {
            let wallet = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = wallet.scan_transactions(None).await {
                    error!(error:% = e; "Startup scan failed");
                }
            });
        }

        let token = CancellationToken::new();
        *self.event_loop_token.lock().unwrap() = Some(token.clone());

        let wallet = Arc::clone(self);
        let handle = tokio::spawn(async move {
            wallet.run_event_loop(token).await;
        });
        *self.event_loop_handle.lock().unwrap() = Some(handle);

        info!("Wallet started");
        Ok(())
    }

    /// Cancels the event loop and aborts any in-flight scan or head update,
    /// waiting for them to drain.
    pub async fn stop(&self) -> WalletResult<()> {
        if let Some(token) = self.event_loop_token.lock().unwrap().take() {
            token.cancel();
        }
        let handle = self.event_loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error:% = e; "Event loop task failed during shutdown");
            }
        }

        let scan = self.scan.lock().unwrap().clone();
        if let Some(scan) = scan {
            scan.abort().await;
        }
        let update = self.update_head_state.lock().unwrap().clone();
        if let Some(update) = update {
            update.abort().await;
        }

        info!("Wallet stopped");
        Ok(())
    }

    /// Clears every account head and the chain cursor. Used when the stored
    /// cursor no longer exists on the canonical chain.
    pub fn reset_accounts(&self) -> WalletResult<()> {
        let mut conn = self.conn()?;
        let txn = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(WalletDbError::from)?;
        db::reset_account_heads(&txn).map_err(WalletError::from)?;
        txn.commit().map_err(WalletDbError::from)?;

        self.follower.lock().unwrap().reset(None);
        Ok(())
    }

    // ---- event loop -----------------------------------------------------

    async fn run_event_loop(self: Arc<Self>, token: CancellationToken) {
        let interval = Duration::from_millis(self.config.event_loop_interval_ms);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {},
            }
            if token.is_cancelled() {
                break;
            }
            self.event_loop_iteration(&token).await;
        }
        debug!("Event loop exited");
    }

    /// One iteration of the background loop: head update, expiry,
    /// rebroadcast, account cleanup. Errors are logged and isolated so the
    /// loop always completes the iteration.
    pub async fn event_loop_iteration(&self, abort: &CancellationToken) {
        if let Err(e) = self.update_head().await {
            error!(error:% = e; "Head update failed");
        }
        if abort.is_cancelled() {
            return;
        }
        self.expire_transactions(abort).await;
        if abort.is_cancelled() {
            return;
        }
        self.rebroadcast_transactions(abort).await;
        if abort.is_cancelled() {
            return;
        }
        self.cleanup_deleted_accounts(abort).await;
    }

    /// Walks the cursor toward the canonical head, connecting and
    /// disconnecting blocks as needed. Returns whether the cursor moved.
    pub async fn update_head(&self) -> WalletResult<bool> {
        if self.accounts.read().unwrap().is_empty() {
            return Ok(false);
        }
        if self.scan.lock().unwrap().is_some() {
            return Ok(false);
        }

        let state = {
            let mut slot = self.update_head_state.lock().unwrap();
            if slot.is_some() {
                return Ok(false);
            }
            let cursor_sequence = self.follower.lock().unwrap().head().map(|h| h.sequence).unwrap_or(0);
            let end_sequence = self.chain.head()?.map(|h| h.sequence).unwrap_or(0);
            let state = Arc::new(ScanState::new(cursor_sequence, end_sequence));
            *slot = Some(Arc::clone(&state));
            state
        };

        let result = self.update_head_inner(&state).await;

        state.signal_complete();
        *self.update_head_state.lock().unwrap() = None;
        result
    }

    async fn update_head_inner(&self, state: &Arc<ScanState>) -> WalletResult<bool> {
        let mut hash_changed = false;

        loop {
            if state.is_aborted() {
                break;
            }

            let cursor = self.follower.lock().unwrap().head();
            let Some(event) = ChainFollower::new(cursor).next_event(self.chain.as_ref())? else {
                break;
            };

            match &event {
                ChainEvent::Connect(header) => {
                    self.connect_block(header, Some(state)).await?;
                    state.signal(header.sequence);
                    if header.sequence > state.end_sequence() {
                        state.set_end_sequence(header.sequence);
                    }
                },
                ChainEvent::Disconnect(header) => {
                    self.disconnect_block(header).await?;
                    state.signal(header.sequence.saturating_sub(1));
                },
            }

            if state.is_aborted() {
                break;
            }
            self.follower.lock().unwrap().apply(&event);
            hash_changed = true;
        }

        Ok(hash_changed)
    }

    /// Expires pending transactions whose expiration sequence has been
    /// reached. Gated on the node being synced with a known cursor; errors
    /// are isolated per transaction.
    pub async fn expire_transactions(&self, abort: &CancellationToken) {
        if !self.chain.synced() || self.follower.lock().unwrap().head().is_none() {
            return;
        }
        let head_sequence = match self.chain.head() {
            Ok(Some(head)) => head.sequence,
            Ok(None) => return,
            Err(e) => {
                error!(error:% = e; "Could not read chain head for expiry");
                return;
            },
        };

        for account in self.list_accounts() {
            if abort.is_cancelled() {
                return;
            }
            if let Err(e) = self.expire_account_transactions(&account, head_sequence, abort) {
                error!(
                    account = account.name(),
                    error:% = e;
                    "Expiring transactions failed"
                );
            }
        }
    }

    fn expire_account_transactions(
        &self,
        account: &Account,
        head_sequence: u64,
        abort: &CancellationToken,
    ) -> WalletResult<()> {
        let mut conn = self.conn()?;
        let expired = account.get_expired_transactions(&conn, head_sequence)?;

        for record in expired {
            if abort.is_cancelled() {
                return Ok(());
            }
            let result = (|| -> WalletResult<()> {
                let txn = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(WalletDbError::from)?;
                account.expire_transaction(&txn, &record)?;
                txn.commit().map_err(WalletDbError::from)?;
                Ok(())
            })();
            if let Err(e) = result {
                error!(
                    account = account.name(),
                    transaction = &*mask_string(&record.hash.to_hex()),
                    error:% = e;
                    "Expiring transaction failed"
                );
            }
        }
        Ok(())
    }

    /// Re-verifies and re-announces pending transactions that have waited
    /// `rebroadcast_after` blocks since their last submission. The submitted
    /// sequence advances whether or not the transaction is still valid, so
    /// an invalid transaction is not re-verified on every iteration.
    pub async fn rebroadcast_transactions(&self, abort: &CancellationToken) {
        if !self.chain.synced() || self.follower.lock().unwrap().head().is_none() {
            return;
        }
        let head_sequence = match self.chain.head() {
            Ok(Some(head)) => head.sequence,
            Ok(None) => return,
            Err(e) => {
                error!(error:% = e; "Could not read chain head for rebroadcast");
                return;
            },
        };

        for account in self.list_accounts() {
            if abort.is_cancelled() {
                return;
            }
            if let Err(e) = self.rebroadcast_account_transactions(&account, head_sequence, abort) {
                error!(
                    account = account.name(),
                    error:% = e;
                    "Rebroadcasting transactions failed"
                );
            }
        }
    }

    fn rebroadcast_account_transactions(
        &self,
        account: &Account,
        head_sequence: u64,
        abort: &CancellationToken,
    ) -> WalletResult<()> {
        let mut conn = self.conn()?;
        let pending = account.pending_transactions(&conn)?;

        for record in pending {
            if abort.is_cancelled() {
                return Ok(());
            }
            if record.block_hash.is_some() {
                continue;
            }
            if head_sequence.saturating_sub(record.submitted_sequence) < self.config.rebroadcast_after {
                continue;
            }

            let result = (|| -> WalletResult<()> {
                let txn = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(WalletDbError::from)?;
                db::update_submitted_sequence(&txn, &account.id(), &record.hash, head_sequence)?;
                txn.commit().map_err(WalletDbError::from)?;

                let transaction = record.transaction()?;
                if self.chain.verifier().verify_transaction_add(&transaction)? {
                    info!(
                        target: "audit",
                        account = account.name(),
                        transaction = &*mask_string(&record.hash.to_hex()),
                        head_sequence = head_sequence;
                        "Rebroadcasting transaction"
                    );
                    self.events.send(WalletEvent::BroadcastTransaction(transaction));
                } else {
                    debug!(
                        transaction = &*mask_string(&record.hash.to_hex());
                        "Pending transaction no longer valid; not rebroadcasting"
                    );
                }
                Ok(())
            })();
            if let Err(e) = result {
                error!(
                    account = account.name(),
                    transaction = &*mask_string(&record.hash.to_hex()),
                    error:% = e;
                    "Rebroadcasting transaction failed"
                );
            }
        }
        Ok(())
    }

    /// Purges the data of soft-deleted accounts. Skipped while a scan or
    /// head update is running so a walk never races account removal.
    pub async fn cleanup_deleted_accounts(&self, abort: &CancellationToken) {
        if self.scan.lock().unwrap().is_some() || self.update_head_state.lock().unwrap().is_some() {
            return;
        }

        let result = (|| -> WalletResult<()> {
            let mut conn = self.conn()?;
            let ids = db::list_deleted_account_ids(&conn)?;
            for id in ids {
                if abort.is_cancelled() {
                    return Ok(());
                }
                let txn = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(WalletDbError::from)?;
                db::purge_account(&txn, &id)?;
                txn.commit().map_err(WalletDbError::from)?;
            }
            Ok(())
        })();
        if let Err(e) = result {
            error!(error:% = e; "Cleaning up deleted accounts failed");
        }
    }

    // ---- block pipeline -------------------------------------------------

    /// Applies one block to every account whose head is the block's parent
    /// (or to unscanned accounts when it is the genesis block). Each account
    /// is applied in a single database transaction together with its head
    /// move. An aborted scan stops between transactions and accounts,
    /// never inside a committed block.
    pub async fn connect_block(&self, header: &BlockHeader, scan: Option<&Arc<ScanState>>) -> WalletResult<()> {
        let accounts = self.accounts_to_connect(header)?;
        if accounts.is_empty() {
            return Ok(());
        }

        let block_transactions = self.chain.get_block_transactions(header)?;

        let mut prepared: Vec<(&Transaction, std::collections::HashMap<Uuid, Vec<DecryptedNoteData>>)> =
            Vec::with_capacity(block_transactions.len());
        for block_transaction in &block_transactions {
            if let Some(scan) = scan {
                if scan.is_aborted() {
                    scan.signal_complete();
                    return Ok(());
                }
            }
            let grouped = decrypt_transaction_notes(
                &self.worker_pool,
                &accounts,
                &block_transaction.transaction,
                Some(block_transaction.initial_note_index),
            )
            .await?;
            prepared.push((&block_transaction.transaction, grouped));
        }

        let block = header.head();
        for account in &accounts {
            if let Some(scan) = scan {
                if scan.is_aborted() {
                    scan.signal_complete();
                    return Ok(());
                }
            }

            let mut conn = self.conn()?;
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(WalletDbError::from)?;
            for (transaction, grouped) in &prepared {
                let notes = grouped.get(&account.id()).map(|n| n.as_slice()).unwrap_or(&[]);
                account.connect_transaction(&txn, &block, transaction, notes)?;
            }
            db::set_account_head(&txn, &account.id(), &block)?;
            txn.commit().map_err(WalletDbError::from)?;
        }

        debug!(
            block = &*header.hash.to_hex(),
            sequence = header.sequence,
            accounts = accounts.len();
            "Connected block"
        );
        Ok(())
    }

    /// Unapplies one block from every account sitting on it, walking the
    /// block's transactions in reverse order, and moves those heads to the
    /// parent block.
    pub async fn disconnect_block(&self, header: &BlockHeader) -> WalletResult<()> {
        let accounts: Vec<Arc<Account>> = {
            let conn = self.conn()?;
            let mut matched = Vec::new();
            for account in self.list_accounts() {
                if db::get_account_head(&conn, &account.id())? == Some(header.head()) {
                    matched.push(account);
                }
            }
            matched
        };
        if accounts.is_empty() {
            return Ok(());
        }

        let block_transactions = self.chain.get_block_transactions(header)?;
        let previous = (header.sequence > GENESIS_SEQUENCE)
            .then(|| ChainHead::new(header.previous_block_hash, header.sequence - 1));

        for account in &accounts {
            let mut conn = self.conn()?;
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(WalletDbError::from)?;
            for block_transaction in block_transactions.iter().rev() {
                account.disconnect_transaction(&txn, previous.as_ref(), &block_transaction.transaction)?;
            }
            match &previous {
                Some(previous) => db::set_account_head(&txn, &account.id(), previous)?,
                None => db::clear_account_head(&txn, &account.id())?,
            }
            txn.commit().map_err(WalletDbError::from)?;
        }

        info!(
            target: "audit",
            block = &*header.hash.to_hex(),
            sequence = header.sequence,
            accounts = accounts.len();
            "Disconnected block"
        );
        Ok(())
    }

    fn accounts_to_connect(&self, header: &BlockHeader) -> WalletResult<Vec<Arc<Account>>> {
        let conn = self.conn()?;
        let mut matched = Vec::new();
        for account in self.list_accounts() {
            let head = db::get_account_head(&conn, &account.id())?;
            let connects = match head {
                Some(head) => head.hash == header.previous_block_hash,
                None => header.sequence == GENESIS_SEQUENCE,
            };
            if connects {
                matched.push(account);
            }
        }
        Ok(matched)
    }

    /// Records a mempool transaction against every loaded account it
    /// touches. Output positions stay unknown until the transaction is
    /// mined; the submitted sequence is taken from the current chain head so
    /// rebroadcast can schedule from it.
    pub async fn add_pending_transaction(&self, transaction: &Transaction) -> WalletResult<()> {
        let hash = transaction.hash();
        let accounts: Vec<Arc<Account>> = {
            let conn = self.conn()?;
            let mut matched = Vec::new();
            for account in self.list_accounts() {
                if !account.contains_transaction(&conn, &hash)? {
                    matched.push(account);
                }
            }
            matched
        };
        if accounts.is_empty() {
            return Ok(());
        }

        let grouped = decrypt_transaction_notes(&self.worker_pool, &accounts, transaction, None).await?;
        let submitted_sequence = self.chain.head()?.map(|h| h.sequence).unwrap_or(0);

        for account in &accounts {
            let mut conn = self.conn()?;
            let txn = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(WalletDbError::from)?;
            let notes = grouped.get(&account.id()).map(|n| n.as_slice()).unwrap_or(&[]);
            account.add_pending_transaction(&txn, transaction, notes, submitted_sequence)?;
            txn.commit().map_err(WalletDbError::from)?;
        }

        Ok(())
    }

    // ---- scanning -------------------------------------------------------

    /// Rescans blocks from `from` (or the earliest account head, or genesis)
    /// up to the chain cursor, applying each to the accounts that need it.
    /// Returns immediately if another rescan is already running; waits for a
    /// routine head update to settle before walking.
    pub async fn scan_transactions(&self, from: Option<FixedHash>) -> WalletResult<()> {
        let state = {
            let mut slot = self.scan.lock().unwrap();
            if slot.is_some() {
                debug!("Rescan already in progress");
                return Ok(());
            }
            let state = Arc::new(ScanState::new(0, 0));
            *slot = Some(Arc::clone(&state));
            state
        };

        let in_flight = self.update_head_state.lock().unwrap().clone();
        if let Some(in_flight) = in_flight {
            in_flight.wait().await;
        }

        let result = self.scan_transactions_inner(from, &state).await;

        state.signal_complete();
        *self.scan.lock().unwrap() = None;
        result
    }

    async fn scan_transactions_inner(&self, from: Option<FixedHash>, state: &Arc<ScanState>) -> WalletResult<()> {
        let Some(chain_head) = self.chain.head()? else {
            return Ok(());
        };

        // The first block to apply. A begin hash (explicit or from the
        // earliest account head) names a block that is already applied, so
        // the walk starts after it; accounts that never scanned force the
        // walk to include genesis.
        let start_sequence = match from {
            Some(hash) => {
                let header = self
                    .chain
                    .get_header(&hash)?
                    .ok_or(crate::chain::ChainError::HeaderNotFound(hash))?;
                header.sequence + 1
            },
            None => {
                let conn = self.conn()?;
                if db::count_accounts_without_head(&conn)? > 0 {
                    GENESIS_SEQUENCE
                } else {
                    match db::earliest_account_head(&conn)? {
                        Some(head) => head.sequence + 1,
                        None => GENESIS_SEQUENCE,
                    }
                }
            },
        };

        let end = self.follower.lock().unwrap().head().unwrap_or(chain_head);
        state.signal(start_sequence.saturating_sub(1));
        state.set_end_sequence(end.sequence);

        info!(
            target: "audit",
            from_sequence = start_sequence,
            to_sequence = end.sequence;
            "Scanning blocks"
        );

        for sequence in start_sequence..=end.sequence {
            if state.is_aborted() {
                break;
            }
            let header = self
                .chain
                .get_header_at_sequence(sequence)?
                .ok_or(crate::chain::ChainError::SequenceNotFound(sequence))?;
            self.connect_block(&header, Some(state)).await?;
            state.signal(sequence);
        }

        // A wallet that had never seen a block gets its cursor from the
        // freshly scanned heads.
        {
            let conn = self.conn()?;
            let mut follower = self.follower.lock().unwrap();
            if follower.head().is_none() {
                follower.reset(db::latest_account_head(&conn)?);
            }
        }

        let elapsed = chrono::Utc::now() - state.started_at();
        info!(
            target: "audit",
            blocks = state.sequence().saturating_sub(start_sequence.saturating_sub(1)),
            seconds = elapsed.num_seconds();
            "Scan finished"
        );
        Ok(())
    }

    fn any_account_behind(&self) -> WalletResult<bool> {
        let conn = self.conn()?;
        let cursor = self.follower.lock().unwrap().head();
        for account in self.list_accounts() {
            let head = db::get_account_head(&conn, &account.id())?;
            if head.map(|h| h.hash) != cursor.map(|c| c.hash) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- account registry -----------------------------------------------

    /// Creates a new account. A fresh account has no history on the chain,
    /// so its head starts at the wallet cursor instead of triggering a
    /// rescan from genesis.
    pub async fn create_account(&self, name: &str) -> WalletResult<Arc<Account>> {
        let mut conn = self.conn()?;
        if db::get_account_by_name(&conn, name)?.is_some() {
            return Err(WalletError::DuplicateAccountName(name.to_string()));
        }

        let account = Arc::new(Account::generate(name));
        let value = account.to_value();
        let cursor = self.follower.lock().unwrap().head();

        let txn = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(WalletDbError::from)?;
        db::create_account(&txn, &value)?;
        if let Some(cursor) = cursor {
            db::set_account_head(&txn, &account.id(), &cursor)?;
        }
        let make_default = db::get_default_account_id(&txn)?.is_none();
        if make_default {
            db::set_default_account_id(&txn, Some(&account.id()))?;
        }
        txn.commit().map_err(WalletDbError::from)?;

        if make_default {
            *self.default_account_id.lock().unwrap() = Some(account.id());
        }
        self.accounts.write().unwrap().insert(account.id(), Arc::clone(&account));

        info!(
            target: "audit",
            account = name;
            "Account created"
        );
        Ok(account)
    }

    /// Imports existing key material. The account's head starts at null, so
    /// a rescan picks up its history.
    pub async fn import_account(&self, value: AccountValue) -> WalletResult<Arc<Account>> {
        if value.incoming_view_key != value.spending_key.incoming_view_key()
            || value.outgoing_view_key != value.spending_key.outgoing_view_key()
            || value.public_address != value.spending_key.public_address()
        {
            return Err(WalletError::Other(anyhow::anyhow!(
                "imported key material is inconsistent with its spending key"
            )));
        }

        let mut conn = self.conn()?;
        if db::get_account_by_name(&conn, &value.name)?.is_some() {
            return Err(WalletError::DuplicateAccountName(value.name));
        }
        if db::get_account_by_spending_key(&conn, &value.spending_key)?.is_some() {
            return Err(WalletError::DuplicateSpendingKey);
        }

        let account = Arc::new(Account::from_value(value.clone()));

        let txn = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(WalletDbError::from)?;
        db::create_account(&txn, &value)?;
        let make_default = db::get_default_account_id(&txn)?.is_none();
        if make_default {
            db::set_default_account_id(&txn, Some(&account.id()))?;
        }
        txn.commit().map_err(WalletDbError::from)?;

        if make_default {
            *self.default_account_id.lock().unwrap() = Some(account.id());
        }
        self.accounts.write().unwrap().insert(account.id(), Arc::clone(&account));

        info!(
            target: "audit",
            account = account.name();
            "Account imported"
        );
        self.events.send(WalletEvent::AccountImported(value));
        Ok(account)
    }

    /// Removes an account from the registry. Its data is purged by the
    /// event loop's next cleanup pass, once no scan is active.
    pub async fn remove_account(&self, name: &str) -> WalletResult<()> {
        let account = self
            .get_account_by_name(name)
            .ok_or_else(|| WalletError::AccountNotFound(name.to_string()))?;

        self.accounts.write().unwrap().remove(&account.id());

        let mut conn = self.conn()?;
        let txn = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(WalletDbError::from)?;
        if db::get_default_account_id(&txn)? == Some(account.id()) {
            db::set_default_account_id(&txn, None)?;
            *self.default_account_id.lock().unwrap() = None;
        }
        db::mark_account_deleted(&txn, &account.id())?;
        txn.commit().map_err(WalletDbError::from)?;

        info!(
            target: "audit",
            account = name;
            "Account removed"
        );
        self.events.send(WalletEvent::AccountRemoved(account.to_value()));
        Ok(())
    }

    pub async fn rename_account(&self, name: &str, new_name: &str) -> WalletResult<()> {
        let account = self
            .get_account_by_name(name)
            .ok_or_else(|| WalletError::AccountNotFound(name.to_string()))?;
        let conn = self.conn()?;
        if db::get_account_by_name(&conn, new_name)?.is_some() {
            return Err(WalletError::DuplicateAccountName(new_name.to_string()));
        }

        db::rename_account(&conn, &account.id(), new_name)?;
        let renamed = Arc::new(account.with_name(new_name));
        self.accounts.write().unwrap().insert(renamed.id(), renamed);
        Ok(())
    }

    pub fn get_account_by_name(&self, name: &str) -> Option<Arc<Account>> {
        self.accounts
            .read()
            .unwrap()
            .values()
            .find(|account| account.name() == name)
            .cloned()
    }

    pub fn get_account(&self, id: &Uuid) -> Option<Arc<Account>> {
        self.accounts.read().unwrap().get(id).cloned()
    }

    /// All loaded accounts, ordered by name.
    pub fn list_accounts(&self) -> Vec<Arc<Account>> {
        let mut accounts: Vec<Arc<Account>> = self.accounts.read().unwrap().values().cloned().collect();
        accounts.sort_by(|a, b| a.name().cmp(b.name()));
        accounts
    }

    pub fn get_default_account(&self) -> Option<Arc<Account>> {
        let id = (*self.default_account_id.lock().unwrap())?;
        self.get_account(&id)
    }

    pub async fn set_default_account(&self, name: Option<&str>) -> WalletResult<()> {
        let id = match name {
            Some(name) => Some(
                self.get_account_by_name(name)
                    .ok_or_else(|| WalletError::AccountNotFound(name.to_string()))?
                    .id(),
            ),
            None => None,
        };

        let conn = self.conn()?;
        db::set_default_account_id(&conn, id.as_ref())?;
        *self.default_account_id.lock().unwrap() = id;
        Ok(())
    }

    /// Whether the account has applied every block the wallet cursor has.
    pub fn is_account_up_to_date(&self, account: &Account) -> WalletResult<bool> {
        let conn = self.conn()?;
        let head = account.head(&conn)?;
        let cursor = self.follower.lock().unwrap().head();
        Ok(head.map(|h| h.hash) == cursor.map(|c| c.hash))
    }

    /// The wallet's chain cursor.
    pub fn chain_head(&self) -> Option<ChainHead> {
        self.follower.lock().unwrap().head()
    }

    // ---- balances & status ----------------------------------------------

    pub fn get_balance(&self, account: &Account, asset_id: &AssetId) -> WalletResult<AccountBalance> {
        let conn = self.conn()?;
        let head = self.chain.head()?;
        Ok(account.get_balance(&conn, asset_id, head.as_ref(), self.config.confirmations)?)
    }

    pub fn get_balances(&self, account: &Account) -> WalletResult<Vec<(AssetId, AccountBalance)>> {
        let conn = self.conn()?;
        let head = self.chain.head()?;
        Ok(account.get_balances(&conn, head.as_ref(), self.config.confirmations)?)
    }

    pub fn get_transaction(&self, account: &Account, hash: &FixedHash) -> WalletResult<Option<TransactionRecord>> {
        let conn = self.conn()?;
        Ok(db::get_transaction(&conn, &account.id(), hash)?)
    }

    pub fn get_transaction_status(&self, record: &TransactionRecord) -> WalletResult<TransactionStatus> {
        let head = self.chain.head()?;
        Ok(TransactionStatus::derive(
            record.sequence,
            record.expiration,
            head.map(|h| h.sequence),
            self.config.confirmations,
        ))
    }

    pub fn get_transaction_type(&self, account: &Account, transaction: &Transaction) -> WalletResult<TransactionType> {
        let conn = self.conn()?;
        Ok(account.transaction_type(&conn, transaction)?)
    }

    // ---- transaction construction ---------------------------------------

    /// Assembles a raw transaction: freshly created output notes for each
    /// receive, resolved mints and burns, and enough selected spends to
    /// cover every asset's required amount plus the fee.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_transaction(
        &self,
        account: &Account,
        receives: Vec<TransactionOutput>,
        mints: Vec<MintRequest>,
        burns: Vec<BurnRequest>,
        fee: u64,
        expiration_delta: u64,
        expiration: Option<u64>,
    ) -> WalletResult<RawTransaction> {
        let _guard = self.create_transaction_mutex.lock().await;
        self.assemble_transaction(account, receives, mints, burns, fee, expiration_delta, expiration)
    }

    /// Proves, verifies and publishes a raw transaction: the pending record,
    /// the mempool admission and the emitted events happen together, and a
    /// verifier rejection leaves no state behind.
    pub async fn post_transaction(&self, raw: RawTransaction, mempool: &dyn MemPool) -> WalletResult<Transaction> {
        let transaction = self.worker_pool.post_transaction(raw).await?;

        self.chain
            .verifier()
            .verify_created_transaction(&transaction)
            .map_err(|e| WalletError::VerifierRejection(e.to_string()))?;

        self.add_pending_transaction(&transaction).await?;
        mempool.accept(&transaction)?;

        info!(
            target: "audit",
            transaction = &*mask_string(&transaction.hash().to_hex());
            "Posted transaction"
        );
        self.events.send(WalletEvent::BroadcastTransaction(transaction.clone()));
        self.events.send(WalletEvent::TransactionCreated(transaction.clone()));
        Ok(transaction)
    }

    /// Builds, proves and publishes a plain payment. The construction mutex
    /// is held through posting so the selected notes are marked spent before
    /// the next build can see them.
    pub async fn send(
        &self,
        mempool: &dyn MemPool,
        account: &Account,
        receives: Vec<TransactionOutput>,
        fee: u64,
        expiration_delta: u64,
        expiration: Option<u64>,
    ) -> WalletResult<Transaction> {
        let _guard = self.create_transaction_mutex.lock().await;
        let raw = self.assemble_transaction(account, receives, vec![], vec![], fee, expiration_delta, expiration)?;
        self.post_transaction(raw, mempool).await
    }

    /// Mints value for an asset owned by the account's keys.
    pub async fn mint(
        &self,
        mempool: &dyn MemPool,
        account: &Account,
        request: MintRequest,
        fee: u64,
        expiration_delta: u64,
    ) -> WalletResult<Transaction> {
        let _guard = self.create_transaction_mutex.lock().await;
        let raw = self.assemble_transaction(account, vec![], vec![request], vec![], fee, expiration_delta, None)?;
        self.post_transaction(raw, mempool).await
    }

    /// Burns circulating value of an asset the account holds.
    pub async fn burn(
        &self,
        mempool: &dyn MemPool,
        account: &Account,
        request: BurnRequest,
        fee: u64,
        expiration_delta: u64,
    ) -> WalletResult<Transaction> {
        let _guard = self.create_transaction_mutex.lock().await;
        let raw = self.assemble_transaction(account, vec![], vec![], vec![request], fee, expiration_delta, None)?;
        self.post_transaction(raw, mempool).await
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_transaction(
        &self,
        account: &Account,
        receives: Vec<TransactionOutput>,
        mints: Vec<MintRequest>,
        burns: Vec<BurnRequest>,
        fee: u64,
        expiration_delta: u64,
        expiration: Option<u64>,
    ) -> WalletResult<RawTransaction> {
        if !self.is_account_up_to_date(account)? {
            return Err(WalletError::AccountNotUpToDate(account.name().to_string()));
        }

        let head = self.chain.head()?.ok_or(WalletError::NoChainHead)?;
        let expiration = expiration.unwrap_or(head.sequence + expiration_delta);
        if expiration != 0 && expiration <= head.sequence {
            return Err(WalletError::InvalidExpiration(expiration));
        }

        let mut raw = RawTransaction::new(*account.spending_key(), fee, expiration);
        let mut amounts_needed: BTreeMap<AssetId, u64> = BTreeMap::new();
        *amounts_needed.entry(AssetId::native()).or_insert(0) += fee;

        for receive in receives {
            *amounts_needed.entry(receive.asset_id).or_insert(0) += receive.value;
            raw.outputs.push(Note::new(
                receive.address,
                receive.value,
                receive.memo,
                receive.asset_id,
                *account.public_address(),
            ));
        }

        for mint in mints {
            raw.mints.push(self.resolve_mint(account, mint)?);
        }

        for burn in burns {
            *amounts_needed.entry(burn.asset_id).or_insert(0) += burn.value;
            raw.burns.push(Burn { asset_id: burn.asset_id, value: burn.value });
        }

        let conn = self.conn()?;
        selector::fund_transaction(
            &conn,
            self.chain.as_ref(),
            account,
            &mut raw,
            &amounts_needed,
            head.sequence,
            self.config.confirmations,
        )?;

        Ok(raw)
    }

    /// Resolves a mint request into a full asset definition. When only an
    /// asset id is given, the definition is loaded from the chain and the id
    /// recomputed under the caller's creator address, which rejects minting
    /// someone else's asset.
    fn resolve_mint(&self, account: &Account, request: MintRequest) -> WalletResult<Mint> {
        let asset = match request.asset {
            MintAsset::Id(id) => {
                let asset = self.chain.get_asset(&id)?.ok_or(WalletError::UnknownAsset(id))?;
                let recomputed = Asset::new(*account.public_address(), asset.name.clone(), asset.metadata.clone());
                if recomputed.id != id {
                    warn!(
                        target: "audit",
                        account = account.name(),
                        asset = &*id.to_hex();
                        "Mint rejected: asset belongs to a different creator"
                    );
                    return Err(WalletError::AssetNotOwned(id));
                }
                asset
            },
            MintAsset::Definition { name, metadata } => Asset::new(*account.public_address(), name, metadata),
        };

        Ok(Mint { asset, value: request.value })
    }
}
