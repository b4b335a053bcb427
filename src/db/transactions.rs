use log::debug;
use rusqlite::{Connection, named_params};
use serde::{Deserialize, Serialize};
use serde_rusqlite::from_rows;
use uuid::Uuid;

use crate::db::error::WalletDbResult;
use crate::models::{ChainHead, FixedHash};
use crate::transaction::Transaction;

const TRANSACTION_COLUMNS: &str =
    "account_id, hash, transaction_json, block_hash, sequence, submitted_sequence, expiration";

/// A transaction tracked for one account. `block_hash` null means pending;
/// mined records carry both `block_hash` and `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub account_id: Uuid,
    pub hash: FixedHash,
    transaction_json: String,
    pub block_hash: Option<FixedHash>,
    pub sequence: Option<u64>,
    /// The head sequence at which this transaction was last handed to the
    /// network; drives the rebroadcast schedule.
    pub submitted_sequence: u64,
    pub expiration: u64,
}

impl TransactionRecord {
    pub fn transaction(&self) -> WalletDbResult<Transaction> {
        Ok(serde_json::from_str(&self.transaction_json)?)
    }
}

pub fn contains_transaction(conn: &Connection, account_id: &Uuid, hash: &FixedHash) -> WalletDbResult<bool> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(*) FROM transactions WHERE account_id = :account_id AND hash = :hash",
    )?;
    let count: i64 = stmt.query_row(
        named_params! { ":account_id": account_id.to_string(), ":hash": hash.to_hex() },
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_transaction(
    conn: &Connection,
    account_id: &Uuid,
    transaction: &Transaction,
    block: Option<&ChainHead>,
    submitted_sequence: u64,
) -> WalletDbResult<()> {
    let hash = transaction.hash();
    debug!(
        transaction = &*hash.to_hex(),
        mined = block.is_some();
        "DB: Inserting transaction record"
    );

    let transaction_json = serde_json::to_string(transaction)?;

    conn.execute(
        r#"
        INSERT OR IGNORE INTO transactions (
            account_id, hash, transaction_json, block_hash, sequence,
            submitted_sequence, expiration
        )
        VALUES (
            :account_id, :hash, :transaction_json, :block_hash, :sequence,
            :submitted_sequence, :expiration
        )
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":hash": hash.to_hex(),
            ":transaction_json": transaction_json,
            ":block_hash": block.map(|b| b.hash.to_hex()),
            ":sequence": block.map(|b| b.sequence as i64),
            ":submitted_sequence": submitted_sequence as i64,
            ":expiration": transaction.expiration as i64,
        },
    )?;

    Ok(())
}

/// Confirms a pending record into a block: `block_hash` and `sequence` are
/// set together.
pub fn set_transaction_mined(
    conn: &Connection,
    account_id: &Uuid,
    hash: &FixedHash,
    block: &ChainHead,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        UPDATE transactions
        SET block_hash = :block_hash, sequence = :sequence
        WHERE account_id = :account_id AND hash = :hash
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":hash": hash.to_hex(),
            ":block_hash": block.hash.to_hex(),
            ":sequence": block.sequence as i64,
        },
    )?;
    Ok(())
}

/// Reverts a mined record to pending after its block is disconnected.
pub fn set_transaction_unmined(conn: &Connection, account_id: &Uuid, hash: &FixedHash) -> WalletDbResult<()> {
    conn.execute(
        r#"
        UPDATE transactions
        SET block_hash = NULL, sequence = NULL
        WHERE account_id = :account_id AND hash = :hash
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":hash": hash.to_hex(),
        },
    )?;
    Ok(())
}

pub fn update_submitted_sequence(
    conn: &Connection,
    account_id: &Uuid,
    hash: &FixedHash,
    submitted_sequence: u64,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        UPDATE transactions
        SET submitted_sequence = :submitted_sequence
        WHERE account_id = :account_id AND hash = :hash
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":hash": hash.to_hex(),
            ":submitted_sequence": submitted_sequence as i64,
        },
    )?;
    Ok(())
}

pub fn delete_transaction(conn: &Connection, account_id: &Uuid, hash: &FixedHash) -> WalletDbResult<()> {
    conn.execute(
        "DELETE FROM transactions WHERE account_id = :account_id AND hash = :hash",
        named_params! { ":account_id": account_id.to_string(), ":hash": hash.to_hex() },
    )?;
    Ok(())
}

pub fn get_transaction(
    conn: &Connection,
    account_id: &Uuid,
    hash: &FixedHash,
) -> WalletDbResult<Option<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE account_id = :account_id AND hash = :hash
        "#,
    ))?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":hash": hash.to_hex(),
    })?;
    Ok(from_rows::<TransactionRecord>(rows).next().transpose()?)
}

pub fn list_transactions(conn: &Connection, account_id: &Uuid) -> WalletDbResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE account_id = :account_id
        ORDER BY hash
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":account_id": account_id.to_string() })?;
    Ok(from_rows::<TransactionRecord>(rows).collect::<Result<Vec<_>, _>>()?)
}

pub fn list_pending_transactions(conn: &Connection, account_id: &Uuid) -> WalletDbResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE account_id = :account_id AND block_hash IS NULL
        ORDER BY hash
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":account_id": account_id.to_string() })?;
    Ok(from_rows::<TransactionRecord>(rows).collect::<Result<Vec<_>, _>>()?)
}

/// Pending transactions whose expiration sequence has been reached by
/// `head_sequence`. An expiration of zero never expires.
pub fn list_expired_transactions(
    conn: &Connection,
    account_id: &Uuid,
    head_sequence: u64,
) -> WalletDbResult<Vec<TransactionRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE account_id = :account_id
          AND block_hash IS NULL
          AND expiration != 0
          AND expiration <= :head_sequence
        ORDER BY expiration, hash
        "#,
    ))?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":head_sequence": head_sequence as i64,
    })?;
    Ok(from_rows::<TransactionRecord>(rows).collect::<Result<Vec<_>, _>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::{test_account, test_pool};
    use crate::db::create_account;

    fn transaction_with_expiration(expiration: u64) -> Transaction {
        Transaction {
            fee: 1,
            expiration,
            spends: vec![],
            outputs: vec![],
            mints: vec![],
            burns: vec![],
        }
    }

    #[test]
    fn pending_to_mined_and_back() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        let transaction = transaction_with_expiration(40);
        let hash = transaction.hash();
        insert_transaction(&conn, &account.id, &transaction, None, 7).unwrap();

        let record = get_transaction(&conn, &account.id, &hash).unwrap().unwrap();
        assert_eq!(record.block_hash, None);
        assert_eq!(record.sequence, None);
        assert_eq!(record.submitted_sequence, 7);
        assert_eq!(record.expiration, 40);
        assert_eq!(record.transaction().unwrap(), transaction);
        assert_eq!(list_pending_transactions(&conn, &account.id).unwrap().len(), 1);

        // Confirming sets block hash and sequence together; disconnecting
        // clears both.
        let block = ChainHead::new(FixedHash::new([5u8; 32]), 9);
        set_transaction_mined(&conn, &account.id, &hash, &block).unwrap();
        let record = get_transaction(&conn, &account.id, &hash).unwrap().unwrap();
        assert_eq!(record.block_hash, Some(block.hash));
        assert_eq!(record.sequence, Some(block.sequence));
        assert!(list_pending_transactions(&conn, &account.id).unwrap().is_empty());

        set_transaction_unmined(&conn, &account.id, &hash).unwrap();
        let record = get_transaction(&conn, &account.id, &hash).unwrap().unwrap();
        assert_eq!(record.block_hash, None);
        assert_eq!(record.sequence, None);
    }

    #[test]
    fn expiry_scan_honors_the_boundary_and_zero() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        let expiring = transaction_with_expiration(10);
        let immortal = transaction_with_expiration(0);
        insert_transaction(&conn, &account.id, &expiring, None, 1).unwrap();
        insert_transaction(&conn, &account.id, &immortal, None, 1).unwrap();

        assert!(list_expired_transactions(&conn, &account.id, 9).unwrap().is_empty());

        // A head equal to the expiration sequence expires the transaction;
        // zero-expiration records never show up.
        let expired = list_expired_transactions(&conn, &account.id, 10).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].hash, expiring.hash());

        update_submitted_sequence(&conn, &account.id, &expiring.hash(), 25).unwrap();
        let record = get_transaction(&conn, &account.id, &expiring.hash()).unwrap().unwrap();
        assert_eq!(record.submitted_sequence, 25);

        delete_transaction(&conn, &account.id, &expiring.hash()).unwrap();
        assert!(!contains_transaction(&conn, &account.id, &expiring.hash()).unwrap());
    }
}
