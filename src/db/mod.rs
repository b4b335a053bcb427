//! SQLite persistence for wallet data.
//!
//! One table per concern, all writes that must be atomic wrapped in a single
//! `rusqlite` transaction by the caller:
//!
//! - **accounts** - key material and account metadata, soft deleted
//! - **account_heads** - per-account `(hash, sequence)` scan pointer
//! - **decrypted_notes** - trial-decryption results with spend status
//! - **transactions** - pending and mined transaction records
//! - **balances** - per-asset running balance aggregates
//! - **meta** - the default account id
//!
//! Migrations are applied on pool initialization.

use std::env::current_dir;
use std::path::Path;

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite_migration::{M, Migrations};

mod error;
pub use error::{WalletDbError, WalletDbResult};

mod accounts;
pub use accounts::{
    AccountValue, clear_account_head, count_accounts_without_head, create_account,
    earliest_account_head, get_account, get_account_by_name, get_account_by_spending_key,
    get_account_head, get_default_account_id, latest_account_head, list_accounts,
    list_deleted_account_ids, mark_account_deleted, purge_account, rename_account,
    reset_account_heads, set_account_head, set_default_account_id,
};

mod notes;
pub use notes::{
    DecryptedNoteRow, NewDecryptedNote, delete_notes_for_transaction,
    delete_unmined_notes_for_transaction, get_note, get_note_by_nullifier, get_unspent_notes,
    insert_note, list_notes, notes_for_transaction, set_note_spent, shallow_note_value,
    unmined_note_value, update_note_position,
};

mod transactions;
pub use transactions::{
    TransactionRecord, contains_transaction, delete_transaction, get_transaction,
    insert_transaction, list_expired_transactions, list_pending_transactions, list_transactions,
    set_transaction_mined, set_transaction_unmined, update_submitted_sequence,
};

mod balances;
pub use balances::{BalanceRow, adjust_balance, get_balance, list_balances};

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        r#"
        CREATE TABLE accounts (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            spending_key TEXT NOT NULL UNIQUE,
            incoming_view_key TEXT NOT NULL,
            outgoing_view_key TEXT NOT NULL,
            public_address TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            deleted_at TEXT
        );

        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE account_heads (
            account_id TEXT PRIMARY KEY REFERENCES accounts (id) ON DELETE CASCADE,
            hash TEXT NOT NULL,
            sequence INTEGER NOT NULL
        );

        CREATE TABLE decrypted_notes (
            account_id TEXT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            note_hash TEXT NOT NULL,
            note TEXT NOT NULL,
            position INTEGER,
            nullifier TEXT,
            spent INTEGER NOT NULL DEFAULT 0,
            for_spender INTEGER NOT NULL DEFAULT 0,
            transaction_hash TEXT NOT NULL,
            asset_id TEXT NOT NULL,
            value INTEGER NOT NULL,
            PRIMARY KEY (account_id, note_hash)
        );
        CREATE INDEX idx_decrypted_notes_nullifier
            ON decrypted_notes (account_id, nullifier);
        CREATE INDEX idx_decrypted_notes_unspent
            ON decrypted_notes (account_id, asset_id, spent, for_spender);
        CREATE INDEX idx_decrypted_notes_transaction
            ON decrypted_notes (account_id, transaction_hash);

        CREATE TABLE transactions (
            account_id TEXT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            hash TEXT NOT NULL,
            transaction_json TEXT NOT NULL,
            block_hash TEXT,
            sequence INTEGER,
            submitted_sequence INTEGER NOT NULL,
            expiration INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (account_id, hash)
        );
        CREATE INDEX idx_transactions_pending
            ON transactions (account_id, expiration) WHERE block_hash IS NULL;
        CREATE INDEX idx_transactions_sequence
            ON transactions (account_id, sequence);

        CREATE TABLE balances (
            account_id TEXT NOT NULL REFERENCES accounts (id) ON DELETE CASCADE,
            asset_id TEXT NOT NULL,
            unconfirmed INTEGER NOT NULL DEFAULT 0,
            block_hash TEXT,
            sequence INTEGER,
            PRIMARY KEY (account_id, asset_id)
        );
        "#,
    )])
}

/// Initializes the SQLite database, applying migrations, and returns a
/// connection pool.
pub fn init_db<P: AsRef<Path>>(db_path: P) -> WalletDbResult<SqlitePool> {
    let mut path = db_path.as_ref().to_path_buf();
    if path.is_relative() {
        path = current_dir()?.join(path);
    }
    let parent = path
        .parent()
        .ok_or_else(|| WalletDbError::Unexpected("Invalid database file path".to_string()))?;
    std::fs::create_dir_all(parent)?;

    let manager = SqliteConnectionManager::file(&path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
    });
    let pool = r2d2::Pool::builder().max_size(5).build(manager)?;

    let mut conn = pool.get()?;
    migrations().to_latest(&mut conn)?;

    Ok(pool)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::keys::SpendingKey;
    use uuid::Uuid;

    /// An isolated on-disk database for one test.
    pub fn test_pool() -> (tempfile::TempDir, SqlitePool) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let pool = init_db(dir.path().join("wallet.db")).expect("Failed to init DB");
        (dir, pool)
    }

    /// Key material for a throwaway test account.
    pub fn test_account(name: &str) -> AccountValue {
        let spending_key = SpendingKey::generate();
        AccountValue {
            id: Uuid::new_v4(),
            name: name.to_string(),
            spending_key,
            incoming_view_key: spending_key.incoming_view_key(),
            outgoing_view_key: spending_key.outgoing_view_key(),
            public_address: spending_key.public_address(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        migrations().validate().unwrap();
    }

    #[test]
    fn init_creates_database_file() {
        let (dir, _pool) = test_util::test_pool();
        assert!(dir.path().join("wallet.db").exists());
    }
}
