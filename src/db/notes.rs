use log::debug;
use rusqlite::{Connection, named_params};
use serde::{Deserialize, Serialize};
use serde_rusqlite::from_rows;
use uuid::Uuid;

use crate::assets::AssetId;
use crate::db::error::WalletDbResult;
use crate::models::FixedHash;
use crate::notes::Note;

const NOTE_COLUMNS: &str = "account_id, note_hash, note AS note_json, position, nullifier, \
                            spent, for_spender, transaction_hash, asset_id, value";

/// A decrypted note as stored. `position` and `nullifier` are set together
/// when the owning transaction is connected to a block and cleared together
/// when it is disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedNoteRow {
    pub account_id: Uuid,
    pub note_hash: FixedHash,
    note_json: String,
    pub position: Option<u64>,
    pub nullifier: Option<FixedHash>,
    pub spent: bool,
    pub for_spender: bool,
    pub transaction_hash: FixedHash,
    pub asset_id: AssetId,
    pub value: u64,
}

impl DecryptedNoteRow {
    pub fn note(&self) -> WalletDbResult<Note> {
        Ok(serde_json::from_str(&self.note_json)?)
    }
}

/// Parameters for persisting a freshly decrypted note.
#[derive(Debug, Clone)]
pub struct NewDecryptedNote<'a> {
    pub account_id: &'a Uuid,
    pub note_hash: FixedHash,
    pub note: &'a Note,
    pub position: Option<u64>,
    pub nullifier: Option<FixedHash>,
    pub spent: bool,
    pub for_spender: bool,
    pub transaction_hash: FixedHash,
}

/// Inserts a note if it is not already known. Returns whether a row was
/// actually inserted.
pub fn insert_note(conn: &Connection, new: &NewDecryptedNote<'_>) -> WalletDbResult<bool> {
    let note_json = serde_json::to_string(new.note)?;

    let changed = conn.execute(
        r#"
        INSERT OR IGNORE INTO decrypted_notes (
            account_id, note_hash, note, position, nullifier,
            spent, for_spender, transaction_hash, asset_id, value
        )
        VALUES (
            :account_id, :note_hash, :note, :position, :nullifier,
            :spent, :for_spender, :transaction_hash, :asset_id, :value
        )
        "#,
        named_params! {
            ":account_id": new.account_id.to_string(),
            ":note_hash": new.note_hash.to_hex(),
            ":note": note_json,
            ":position": new.position.map(|p| p as i64),
            ":nullifier": new.nullifier.map(|n| n.to_hex()),
            ":spent": new.spent,
            ":for_spender": new.for_spender,
            ":transaction_hash": new.transaction_hash.to_hex(),
            ":asset_id": new.note.asset_id.to_hex(),
            ":value": new.note.value as i64,
        },
    )?;

    Ok(changed > 0)
}

/// Sets or clears a note's commitment-tree position and nullifier together.
pub fn update_note_position(
    conn: &Connection,
    account_id: &Uuid,
    note_hash: &FixedHash,
    position: Option<u64>,
    nullifier: Option<FixedHash>,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        UPDATE decrypted_notes
        SET position = :position, nullifier = :nullifier
        WHERE account_id = :account_id AND note_hash = :note_hash
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":note_hash": note_hash.to_hex(),
            ":position": position.map(|p| p as i64),
            ":nullifier": nullifier.map(|n| n.to_hex()),
        },
    )?;
    Ok(())
}

/// Flips a note's spent flag. Returns whether the flag actually changed.
pub fn set_note_spent(
    conn: &Connection,
    account_id: &Uuid,
    note_hash: &FixedHash,
    spent: bool,
) -> WalletDbResult<bool> {
    let changed = conn.execute(
        r#"
        UPDATE decrypted_notes
        SET spent = :spent
        WHERE account_id = :account_id AND note_hash = :note_hash AND spent != :spent
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":note_hash": note_hash.to_hex(),
            ":spent": spent,
        },
    )?;
    Ok(changed > 0)
}

pub fn get_note(
    conn: &Connection,
    account_id: &Uuid,
    note_hash: &FixedHash,
) -> WalletDbResult<Option<DecryptedNoteRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {NOTE_COLUMNS}
        FROM decrypted_notes
        WHERE account_id = :account_id AND note_hash = :note_hash
        "#,
    ))?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":note_hash": note_hash.to_hex(),
    })?;
    Ok(from_rows::<DecryptedNoteRow>(rows).next().transpose()?)
}

pub fn get_note_by_nullifier(
    conn: &Connection,
    account_id: &Uuid,
    nullifier: &FixedHash,
) -> WalletDbResult<Option<DecryptedNoteRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {NOTE_COLUMNS}
        FROM decrypted_notes
        WHERE account_id = :account_id AND nullifier = :nullifier
        "#,
    ))?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":nullifier": nullifier.to_hex(),
    })?;
    Ok(from_rows::<DecryptedNoteRow>(rows).next().transpose()?)
}

pub fn list_notes(conn: &Connection, account_id: &Uuid) -> WalletDbResult<Vec<DecryptedNoteRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {NOTE_COLUMNS}
        FROM decrypted_notes
        WHERE account_id = :account_id
        ORDER BY note_hash
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":account_id": account_id.to_string() })?;
    Ok(from_rows::<DecryptedNoteRow>(rows).collect::<Result<Vec<_>, _>>()?)
}

pub fn notes_for_transaction(
    conn: &Connection,
    account_id: &Uuid,
    transaction_hash: &FixedHash,
) -> WalletDbResult<Vec<DecryptedNoteRow>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {NOTE_COLUMNS}
        FROM decrypted_notes
        WHERE account_id = :account_id AND transaction_hash = :transaction_hash
        ORDER BY note_hash
        "#,
    ))?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":transaction_hash": transaction_hash.to_hex(),
    })?;
    Ok(from_rows::<DecryptedNoteRow>(rows).collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_notes_for_transaction(
    conn: &Connection,
    account_id: &Uuid,
    transaction_hash: &FixedHash,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        DELETE FROM decrypted_notes
        WHERE account_id = :account_id AND transaction_hash = :transaction_hash
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":transaction_hash": transaction_hash.to_hex(),
        },
    )?;
    Ok(())
}

/// Deletes a transaction's notes that never made it into a block.
pub fn delete_unmined_notes_for_transaction(
    conn: &Connection,
    account_id: &Uuid,
    transaction_hash: &FixedHash,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        DELETE FROM decrypted_notes
        WHERE account_id = :account_id
          AND transaction_hash = :transaction_hash
          AND position IS NULL
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":transaction_hash": transaction_hash.to_hex(),
        },
    )?;
    Ok(())
}

/// Spendable candidates for one asset: unspent, owned (not sender copies),
/// mined at or below `max_sequence`, oldest confirmed first.
pub fn get_unspent_notes(
    conn: &Connection,
    account_id: &Uuid,
    asset_id: &AssetId,
    max_sequence: u64,
) -> WalletDbResult<Vec<DecryptedNoteRow>> {
    debug!(
        asset = &*asset_id.to_hex(),
        max_sequence = max_sequence;
        "DB: Fetching unspent notes"
    );

    let mut stmt = conn.prepare_cached(
        r#"
        SELECT n.account_id, n.note_hash, n.note AS note_json, n.position, n.nullifier,
               n.spent, n.for_spender, n.transaction_hash, n.asset_id, n.value
        FROM decrypted_notes n
        JOIN transactions t
          ON t.account_id = n.account_id AND t.hash = n.transaction_hash
        WHERE n.account_id = :account_id
          AND n.asset_id = :asset_id
          AND n.spent = 0
          AND n.for_spender = 0
          AND t.sequence IS NOT NULL
          AND t.sequence <= :max_sequence
        ORDER BY t.sequence ASC, n.note_hash ASC
        "#,
    )?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":asset_id": asset_id.to_hex(),
        ":max_sequence": max_sequence as i64,
    })?;
    Ok(from_rows::<DecryptedNoteRow>(rows).collect::<Result<Vec<_>, _>>()?)
}

/// Total value of unspent owned notes that are not yet mined.
pub fn unmined_note_value(conn: &Connection, account_id: &Uuid, asset_id: &AssetId) -> WalletDbResult<u64> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT COALESCE(SUM(value), 0)
        FROM decrypted_notes
        WHERE account_id = :account_id
          AND asset_id = :asset_id
          AND spent = 0
          AND for_spender = 0
          AND position IS NULL
        "#,
    )?;

    let total: i64 = stmt.query_row(
        named_params! {
            ":account_id": account_id.to_string(),
            ":asset_id": asset_id.to_hex(),
        },
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

/// Total value of unspent owned notes mined above `max_sequence`, i.e. not
/// yet deep enough to count as confirmed.
pub fn shallow_note_value(
    conn: &Connection,
    account_id: &Uuid,
    asset_id: &AssetId,
    max_sequence: u64,
) -> WalletDbResult<u64> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT COALESCE(SUM(n.value), 0)
        FROM decrypted_notes n
        JOIN transactions t
          ON t.account_id = n.account_id AND t.hash = n.transaction_hash
        WHERE n.account_id = :account_id
          AND n.asset_id = :asset_id
          AND n.spent = 0
          AND n.for_spender = 0
          AND t.sequence IS NOT NULL
          AND t.sequence > :max_sequence
        "#,
    )?;

    let total: i64 = stmt.query_row(
        named_params! {
            ":account_id": account_id.to_string(),
            ":asset_id": asset_id.to_hex(),
            ":max_sequence": max_sequence as i64,
        },
        |row| row.get(0),
    )?;
    Ok(total as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::{test_account, test_pool};
    use crate::db::{create_account, insert_transaction};
    use crate::keys::SpendingKey;
    use crate::models::ChainHead;
    use crate::transaction::Transaction;

    fn seeded_note(owner: &SpendingKey, value: u64) -> Note {
        Note::new(
            owner.public_address(),
            value,
            crate::notes::Memo::default(),
            AssetId::native(),
            owner.public_address(),
        )
    }

    fn empty_transaction(expiration: u64) -> Transaction {
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
    fn note_lifecycle_round_trip() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        let key = account.spending_key;
        let note = seeded_note(&key, 42);
        let note_hash = note.commitment();
        let transaction_hash = crate::models::FixedHash::new([7u8; 32]);

        let new = NewDecryptedNote {
            account_id: &account.id,
            note_hash,
            note: &note,
            position: None,
            nullifier: None,
            spent: false,
            for_spender: false,
            transaction_hash,
        };
        assert!(insert_note(&conn, &new).unwrap());
        // Re-inserting the same note is a no-op.
        assert!(!insert_note(&conn, &new).unwrap());

        let row = get_note(&conn, &account.id, &note_hash).unwrap().unwrap();
        assert_eq!(row.position, None);
        assert_eq!(row.nullifier, None);
        assert_eq!(row.value, 42);
        assert_eq!(row.note().unwrap(), note);

        // Mining the owning transaction sets position and nullifier together.
        let nullifier = note.nullifier(&key, 3);
        update_note_position(&conn, &account.id, &note_hash, Some(3), Some(nullifier)).unwrap();
        let row = get_note_by_nullifier(&conn, &account.id, &nullifier).unwrap().unwrap();
        assert_eq!(row.position, Some(3));

        assert!(set_note_spent(&conn, &account.id, &note_hash, true).unwrap());
        assert!(!set_note_spent(&conn, &account.id, &note_hash, true).unwrap());
    }

    #[test]
    fn unspent_iteration_is_oldest_confirmed_first() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();
        let key = account.spending_key;

        // Two mined funding transactions at sequences 5 and 2, plus one
        // pending note that must not be selectable. Distinct expirations
        // keep the transaction hashes distinct.
        for (value, sequence) in [(10u64, 5u64), (20, 2)] {
            let transaction = empty_transaction(100 + sequence);
            let block = ChainHead::new(crate::models::FixedHash::new([sequence as u8; 32]), sequence);
            insert_transaction(&conn, &account.id, &transaction, Some(&block), sequence).unwrap();

            let note = seeded_note(&key, value);
            insert_note(
                &conn,
                &NewDecryptedNote {
                    account_id: &account.id,
                    note_hash: note.commitment(),
                    note: &note,
                    position: Some(value),
                    nullifier: Some(note.nullifier(&key, value)),
                    spent: false,
                    for_spender: false,
                    transaction_hash: transaction.hash(),
                },
            )
            .unwrap();
        }

        let pending_note = seeded_note(&key, 99);
        insert_note(
            &conn,
            &NewDecryptedNote {
                account_id: &account.id,
                note_hash: pending_note.commitment(),
                note: &pending_note,
                position: None,
                nullifier: None,
                spent: false,
                for_spender: false,
                transaction_hash: crate::models::FixedHash::new([9u8; 32]),
            },
        )
        .unwrap();

        let unspent = get_unspent_notes(&conn, &account.id, &AssetId::native(), 10).unwrap();
        let values: Vec<u64> = unspent.iter().map(|n| n.value).collect();
        assert_eq!(values, vec![20, 10]);

        // A confirmation window below the younger note's depth excludes it.
        let unspent = get_unspent_notes(&conn, &account.id, &AssetId::native(), 4).unwrap();
        let values: Vec<u64> = unspent.iter().map(|n| n.value).collect();
        assert_eq!(values, vec![20]);

        assert_eq!(unmined_note_value(&conn, &account.id, &AssetId::native()).unwrap(), 99);
        assert_eq!(shallow_note_value(&conn, &account.id, &AssetId::native(), 4).unwrap(), 10);
    }
}
