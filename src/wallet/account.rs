//! Per-account state: key material in memory, notes, transactions and
//! balances in the database.
//!
//! Every mutating method here expects to run inside a caller-owned database
//! transaction so a block is applied to an account atomically with its head
//! move.

use log::{debug, info};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::{self, AccountValue, NewDecryptedNote, TransactionRecord, WalletDbResult};
use crate::assets::AssetId;
use crate::keys::{IncomingViewKey, OutgoingViewKey, PublicAddress, SpendingKey};
use crate::log::mask_string;
use crate::models::{ChainHead, TransactionType};
use crate::transaction::Transaction;
use crate::workers::DecryptedNoteData;

/// Spendable and total balances for one asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountBalance {
    /// Summed value of all unspent owned notes, mined or pending.
    pub unconfirmed: u64,
    /// The portion mined at least `confirmations` blocks below the head.
    pub confirmed: u64,
}

/// A shielded account: identity plus the four key materials. The struct is
/// immutable; all mutable account state lives in the database keyed by
/// [`Account::id`].
#[derive(Debug, Clone)]
pub struct Account {
    id: Uuid,
    name: String,
    spending_key: SpendingKey,
    incoming_view_key: IncomingViewKey,
    outgoing_view_key: OutgoingViewKey,
    public_address: PublicAddress,
}

impl Account {
    /// Creates an account with a freshly generated spending key.
    pub fn generate(name: impl Into<String>) -> Self {
        let spending_key = SpendingKey::generate();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            spending_key,
            incoming_view_key: spending_key.incoming_view_key(),
            outgoing_view_key: spending_key.outgoing_view_key(),
            public_address: spending_key.public_address(),
        }
    }

    pub fn from_value(value: AccountValue) -> Self {
        Self {
            id: value.id,
            name: value.name,
            spending_key: value.spending_key,
            incoming_view_key: value.incoming_view_key,
            outgoing_view_key: value.outgoing_view_key,
            public_address: value.public_address,
        }
    }

    pub fn to_value(&self) -> AccountValue {
        AccountValue {
            id: self.id,
            name: self.name.clone(),
            spending_key: self.spending_key,
            incoming_view_key: self.incoming_view_key,
            outgoing_view_key: self.outgoing_view_key,
            public_address: self.public_address,
        }
    }

    pub(crate) fn with_name(&self, name: impl Into<String>) -> Self {
        let mut account = self.clone();
        account.name = name.into();
        account
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spending_key(&self) -> &SpendingKey {
        &self.spending_key
    }

    pub fn incoming_view_key(&self) -> &IncomingViewKey {
        &self.incoming_view_key
    }

    pub fn outgoing_view_key(&self) -> &OutgoingViewKey {
        &self.outgoing_view_key
    }

    pub fn public_address(&self) -> &PublicAddress {
        &self.public_address
    }

    pub fn head(&self, conn: &Connection) -> WalletDbResult<Option<ChainHead>> {
        db::get_account_head(conn, &self.id)
    }

    pub fn contains_transaction(&self, conn: &Connection, hash: &crate::models::FixedHash) -> WalletDbResult<bool> {
        db::contains_transaction(conn, &self.id, hash)
    }

    /// Applies one mined transaction: marks our notes consumed by its spends,
    /// persists the decrypted outputs with their tree positions, and records
    /// or confirms the transaction itself.
    ///
    /// Applying a transaction that was already pending is balance-neutral:
    /// its notes exist and its spends are already marked.
    pub(crate) fn connect_transaction(
        &self,
        conn: &Connection,
        block: &ChainHead,
        transaction: &Transaction,
        decrypted: &[DecryptedNoteData],
    ) -> WalletDbResult<()> {
        let transaction_hash = transaction.hash();
        let mut touched = false;

        for spend in &transaction.spends {
            let Some(note) = db::get_note_by_nullifier(conn, &self.id, &spend.nullifier)? else {
                continue;
            };
            touched = true;
            if db::set_note_spent(conn, &self.id, &note.note_hash, true)? {
                db::adjust_balance(conn, &self.id, &note.asset_id, -(note.value as i64), Some(block))?;
            }
        }

        for data in decrypted {
            touched = true;
            let inserted = db::insert_note(
                conn,
                &NewDecryptedNote {
                    account_id: &self.id,
                    note_hash: data.hash,
                    note: &data.note,
                    position: data.index,
                    nullifier: data.nullifier,
                    spent: false,
                    for_spender: data.for_spender,
                    transaction_hash,
                },
            )?;

            if inserted {
                if !data.for_spender {
                    db::adjust_balance(conn, &self.id, &data.note.asset_id, data.note.value as i64, Some(block))?;
                }
            } else {
                // The note was pending; it now has a tree position.
                db::update_note_position(conn, &self.id, &data.hash, data.index, data.nullifier)?;
            }
        }

        if touched {
            if db::contains_transaction(conn, &self.id, &transaction_hash)? {
                db::set_transaction_mined(conn, &self.id, &transaction_hash, block)?;
            } else {
                db::insert_transaction(conn, &self.id, transaction, Some(block), block.sequence)?;
            }

            info!(
                target: "audit",
                account = &*self.name,
                transaction = &*mask_string(&transaction_hash.to_hex()),
                sequence = block.sequence;
                "Connected transaction"
            );
        }

        Ok(())
    }

    /// Unapplies one transaction of a disconnected block. Miner rewards are
    /// deleted outright (they have no pending lifetime); everything else
    /// reverts to pending with its notes' tree positions cleared. Notes
    /// consumed by the transaction's spends stay marked spent, because the
    /// transaction still holds them while pending.
    pub(crate) fn disconnect_transaction(
        &self,
        conn: &Connection,
        previous_block: Option<&ChainHead>,
        transaction: &Transaction,
    ) -> WalletDbResult<()> {
        let transaction_hash = transaction.hash();
        if !db::contains_transaction(conn, &self.id, &transaction_hash)? {
            return Ok(());
        }

        if transaction.is_miners_fee() {
            for note in db::notes_for_transaction(conn, &self.id, &transaction_hash)? {
                if !note.for_spender && !note.spent {
                    db::adjust_balance(conn, &self.id, &note.asset_id, -(note.value as i64), previous_block)?;
                }
            }
            db::delete_notes_for_transaction(conn, &self.id, &transaction_hash)?;
            db::delete_transaction(conn, &self.id, &transaction_hash)?;
        } else {
            for note in db::notes_for_transaction(conn, &self.id, &transaction_hash)? {
                db::update_note_position(conn, &self.id, &note.note_hash, None, None)?;
            }
            db::set_transaction_unmined(conn, &self.id, &transaction_hash)?;
        }

        info!(
            target: "audit",
            account = &*self.name,
            transaction = &*mask_string(&transaction_hash.to_hex()),
            miner = transaction.is_miners_fee();
            "Disconnected transaction"
        );

        Ok(())
    }

    /// Records a transaction that exists only in the mempool so far. Its
    /// outputs are stored without tree positions and the notes it spends are
    /// marked consumed immediately, which is what prevents a second send
    /// from double-selecting them.
    pub(crate) fn add_pending_transaction(
        &self,
        conn: &Connection,
        transaction: &Transaction,
        decrypted: &[DecryptedNoteData],
        submitted_sequence: u64,
    ) -> WalletDbResult<()> {
        let transaction_hash = transaction.hash();
        if db::contains_transaction(conn, &self.id, &transaction_hash)? {
            return Ok(());
        }

        let mut our_spends = Vec::new();
        for spend in &transaction.spends {
            if let Some(note) = db::get_note_by_nullifier(conn, &self.id, &spend.nullifier)? {
                our_spends.push(note);
            }
        }

        if decrypted.is_empty() && our_spends.is_empty() {
            return Ok(());
        }

        db::insert_transaction(conn, &self.id, transaction, None, submitted_sequence)?;

        for data in decrypted {
            let inserted = db::insert_note(
                conn,
                &NewDecryptedNote {
                    account_id: &self.id,
                    note_hash: data.hash,
                    note: &data.note,
                    position: None,
                    nullifier: None,
                    spent: false,
                    for_spender: data.for_spender,
                    transaction_hash,
                },
            )?;
            if inserted && !data.for_spender {
                db::adjust_balance(conn, &self.id, &data.note.asset_id, data.note.value as i64, None)?;
            }
        }

        for note in our_spends {
            if db::set_note_spent(conn, &self.id, &note.note_hash, true)? {
                db::adjust_balance(conn, &self.id, &note.asset_id, -(note.value as i64), None)?;
            }
        }

        info!(
            target: "audit",
            account = &*self.name,
            transaction = &*mask_string(&transaction_hash.to_hex()),
            submitted_sequence = submitted_sequence;
            "Added pending transaction"
        );

        Ok(())
    }

    /// Pending transactions whose expiration has been reached by
    /// `head_sequence`.
    pub fn get_expired_transactions(
        &self,
        conn: &Connection,
        head_sequence: u64,
    ) -> WalletDbResult<Vec<TransactionRecord>> {
        db::list_expired_transactions(conn, &self.id, head_sequence)
    }

    pub fn pending_transactions(&self, conn: &Connection) -> WalletDbResult<Vec<TransactionRecord>> {
        db::list_pending_transactions(conn, &self.id)
    }

    /// Releases an expired pending transaction's holds: the notes it would
    /// have spent become spendable again and its never-mined outputs are
    /// dropped. The record itself stays and derives the `Expired` status.
    /// Idempotent, so re-running over an already expired record is harmless.
    pub(crate) fn expire_transaction(
        &self,
        conn: &Connection,
        record: &TransactionRecord,
    ) -> WalletDbResult<()> {
        if record.block_hash.is_some() {
            return Ok(());
        }

        let transaction = record.transaction()?;
        let mut released = false;

        for spend in &transaction.spends {
            let Some(note) = db::get_note_by_nullifier(conn, &self.id, &spend.nullifier)? else {
                continue;
            };
            if db::set_note_spent(conn, &self.id, &note.note_hash, false)? {
                db::adjust_balance(conn, &self.id, &note.asset_id, note.value as i64, None)?;
                released = true;
            }
        }

        for note in db::notes_for_transaction(conn, &self.id, &record.hash)? {
            if note.position.is_none() {
                if !note.for_spender && !note.spent {
                    db::adjust_balance(conn, &self.id, &note.asset_id, -(note.value as i64), None)?;
                }
                released = true;
            }
        }
        db::delete_unmined_notes_for_transaction(conn, &self.id, &record.hash)?;

        if released {
            info!(
                target: "audit",
                account = &*self.name,
                transaction = &*mask_string(&record.hash.to_hex()),
                expiration = record.expiration;
                "Expired pending transaction"
            );
        }

        Ok(())
    }

    /// The balance for one asset. Confirmed value excludes pending notes and
    /// notes mined within the confirmation window below `head`.
    pub fn get_balance(
        &self,
        conn: &Connection,
        asset_id: &AssetId,
        head: Option<&ChainHead>,
        confirmations: u64,
    ) -> WalletDbResult<AccountBalance> {
        let unconfirmed = db::get_balance(conn, &self.id, asset_id)?
            .map(|row| row.unconfirmed.max(0) as u64)
            .unwrap_or(0);

        let confirmed = match head {
            None => 0,
            Some(head) => {
                let max_sequence = head.sequence.saturating_sub(confirmations);
                let unmined = db::unmined_note_value(conn, &self.id, asset_id)?;
                let shallow = db::shallow_note_value(conn, &self.id, asset_id, max_sequence)?;
                unconfirmed.saturating_sub(unmined + shallow)
            },
        };

        Ok(AccountBalance { unconfirmed, confirmed })
    }

    /// Balances for every asset this account has ever held.
    pub fn get_balances(
        &self,
        conn: &Connection,
        head: Option<&ChainHead>,
        confirmations: u64,
    ) -> WalletDbResult<Vec<(AssetId, AccountBalance)>> {
        let mut balances = Vec::new();
        for row in db::list_balances(conn, &self.id)? {
            let balance = self.get_balance(conn, &row.asset_id, head, confirmations)?;
            balances.push((row.asset_id, balance));
        }
        Ok(balances)
    }

    /// How the transaction relates to this account: a miner reward, a send
    /// (one of its spends consumes our note), or a plain receive.
    pub fn transaction_type(&self, conn: &Connection, transaction: &Transaction) -> WalletDbResult<TransactionType> {
        if transaction.is_miners_fee() {
            return Ok(TransactionType::Miner);
        }

        for spend in &transaction.spends {
            if db::get_note_by_nullifier(conn, &self.id, &spend.nullifier)?.is_some() {
                debug!(
                    account = &*self.name;
                    "Transaction spends one of our notes"
                );
                return Ok(TransactionType::Send);
            }
        }

        Ok(TransactionType::Receive)
    }
}
