use log::{debug, info, warn};
use rusqlite::{Connection, named_params};
use serde::{Deserialize, Serialize};
use serde_rusqlite::from_rows;
use uuid::Uuid;

use crate::db::error::{WalletDbError, WalletDbResult};
use crate::keys::{IncomingViewKey, OutgoingViewKey, PublicAddress, SpendingKey};
use crate::models::ChainHead;

const DEFAULT_ACCOUNT_KEY: &str = "default_account_id";

/// The persisted form of an account: identity plus the four key materials.
/// This is also the import/export format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountValue {
    pub id: Uuid,
    pub name: String,
    pub spending_key: SpendingKey,
    pub incoming_view_key: IncomingViewKey,
    pub outgoing_view_key: OutgoingViewKey,
    pub public_address: PublicAddress,
}

pub fn create_account(conn: &Connection, account: &AccountValue) -> WalletDbResult<()> {
    info!(
        target: "audit",
        account = &*account.name;
        "DB: Creating new account"
    );

    let result = conn.execute(
        r#"
        INSERT INTO accounts (
            id,
            name,
            spending_key,
            incoming_view_key,
            outgoing_view_key,
            public_address
        )
        VALUES (:id, :name, :spending_key, :incoming_view_key, :outgoing_view_key, :public_address)
        "#,
        named_params! {
            ":id": account.id.to_string(),
            ":name": account.name,
            ":spending_key": account.spending_key.to_hex(),
            ":incoming_view_key": account.incoming_view_key.to_hex(),
            ":outgoing_view_key": account.outgoing_view_key.to_hex(),
            ":public_address": account.public_address.to_hex(),
        },
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(WalletDbError::DuplicateEntry(account.name.clone()))
        },
        Err(e) => Err(e.into()),
    }
}

const ACCOUNT_COLUMNS: &str = "id, name, spending_key, incoming_view_key, outgoing_view_key, public_address";

pub fn get_account(conn: &Connection, id: &Uuid) -> WalletDbResult<Option<AccountValue>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE id = :id AND deleted_at IS NULL
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":id": id.to_string() })?;
    Ok(from_rows::<AccountValue>(rows).next().transpose()?)
}

pub fn get_account_by_name(conn: &Connection, name: &str) -> WalletDbResult<Option<AccountValue>> {
    debug!(
        account = name;
        "DB: Fetching account by name"
    );

    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE name = :name AND deleted_at IS NULL
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":name": name })?;
    Ok(from_rows::<AccountValue>(rows).next().transpose()?)
}

pub fn get_account_by_spending_key(
    conn: &Connection,
    spending_key: &SpendingKey,
) -> WalletDbResult<Option<AccountValue>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE spending_key = :spending_key AND deleted_at IS NULL
        "#,
    ))?;

    let rows = stmt.query(named_params! { ":spending_key": spending_key.to_hex() })?;
    Ok(from_rows::<AccountValue>(rows).next().transpose()?)
}

pub fn list_accounts(conn: &Connection) -> WalletDbResult<Vec<AccountValue>> {
    let mut stmt = conn.prepare_cached(&format!(
        r#"
        SELECT {ACCOUNT_COLUMNS}
        FROM accounts
        WHERE deleted_at IS NULL
        ORDER BY name
        "#,
    ))?;

    let rows = stmt.query(named_params! {})?;
    Ok(from_rows::<AccountValue>(rows).collect::<Result<Vec<_>, _>>()?)
}

pub fn rename_account(conn: &Connection, id: &Uuid, name: &str) -> WalletDbResult<()> {
    info!(
        target: "audit",
        account = name;
        "DB: Renaming account"
    );

    let result = conn.execute(
        "UPDATE accounts SET name = :name WHERE id = :id AND deleted_at IS NULL",
        named_params! { ":id": id.to_string(), ":name": name },
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
            Err(WalletDbError::DuplicateEntry(name.to_string()))
        },
        Err(e) => Err(e.into()),
    }
}

/// Soft deletes an account. The event loop's cleanup phase purges its data.
pub fn mark_account_deleted(conn: &Connection, id: &Uuid) -> WalletDbResult<()> {
    let id_str = id.to_string();
    warn!(
        target: "audit",
        account_id = &*id_str;
        "DB: Marking account deleted"
    );

    conn.execute(
        "UPDATE accounts SET deleted_at = datetime('now') WHERE id = :id",
        named_params! { ":id": id_str },
    )?;

    Ok(())
}

pub fn list_deleted_account_ids(conn: &Connection) -> WalletDbResult<Vec<Uuid>> {
    #[derive(Deserialize)]
    struct IdRow {
        id: Uuid,
    }

    let mut stmt = conn.prepare_cached("SELECT id FROM accounts WHERE deleted_at IS NOT NULL")?;
    let rows = stmt.query(named_params! {})?;
    let ids = from_rows::<IdRow>(rows)
        .map(|row| row.map(|r| r.id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Removes an account row and, via cascading deletes, all of its notes,
/// transactions, balances and head pointer.
pub fn purge_account(conn: &Connection, id: &Uuid) -> WalletDbResult<()> {
    let id_str = id.to_string();
    warn!(
        target: "audit",
        account_id = &*id_str;
        "DB: Purging deleted account"
    );

    conn.execute("DELETE FROM accounts WHERE id = :id", named_params! { ":id": id_str })?;
    Ok(())
}

pub fn get_default_account_id(conn: &Connection) -> WalletDbResult<Option<Uuid>> {
    let mut stmt = conn.prepare_cached("SELECT value FROM meta WHERE key = :key")?;
    let value: Option<String> = stmt
        .query_row(named_params! { ":key": DEFAULT_ACCOUNT_KEY }, |row| row.get(0))
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?
        .flatten();

    match value {
        Some(raw) => Ok(Some(Uuid::parse_str(&raw).map_err(|e| {
            WalletDbError::Unexpected(format!("Invalid default account id: {}", e))
        })?)),
        None => Ok(None),
    }
}

pub fn set_default_account_id(conn: &Connection, id: Option<&Uuid>) -> WalletDbResult<()> {
    match id {
        Some(id) => {
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (:key, :value)",
                named_params! { ":key": DEFAULT_ACCOUNT_KEY, ":value": id.to_string() },
            )?;
        },
        None => {
            conn.execute(
                "DELETE FROM meta WHERE key = :key",
                named_params! { ":key": DEFAULT_ACCOUNT_KEY },
            )?;
        },
    }
    Ok(())
}

pub fn get_account_head(conn: &Connection, id: &Uuid) -> WalletDbResult<Option<ChainHead>> {
    let mut stmt = conn.prepare_cached(
        "SELECT hash, sequence FROM account_heads WHERE account_id = :account_id",
    )?;

    let rows = stmt.query(named_params! { ":account_id": id.to_string() })?;
    Ok(from_rows::<ChainHead>(rows).next().transpose()?)
}

pub fn set_account_head(conn: &Connection, id: &Uuid, head: &ChainHead) -> WalletDbResult<()> {
    conn.execute(
        r#"
        INSERT OR REPLACE INTO account_heads (account_id, hash, sequence)
        VALUES (:account_id, :hash, :sequence)
        "#,
        named_params! {
            ":account_id": id.to_string(),
            ":hash": head.hash.to_hex(),
            ":sequence": head.sequence as i64,
        },
    )?;
    Ok(())
}

pub fn clear_account_head(conn: &Connection, id: &Uuid) -> WalletDbResult<()> {
    conn.execute(
        "DELETE FROM account_heads WHERE account_id = :account_id",
        named_params! { ":account_id": id.to_string() },
    )?;
    Ok(())
}

/// Clears every account head. Used when the stored chain cursor turns out to
/// be off the canonical chain.
pub fn reset_account_heads(conn: &Connection) -> WalletDbResult<()> {
    warn!(target: "audit", "DB: Resetting all account heads");
    conn.execute("DELETE FROM account_heads", named_params! {})?;
    Ok(())
}

pub fn latest_account_head(conn: &Connection) -> WalletDbResult<Option<ChainHead>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT h.hash, h.sequence
        FROM account_heads h
        JOIN accounts a ON a.id = h.account_id
        WHERE a.deleted_at IS NULL
        ORDER BY h.sequence DESC
        LIMIT 1
        "#,
    )?;

    let rows = stmt.query(named_params! {})?;
    Ok(from_rows::<ChainHead>(rows).next().transpose()?)
}

pub fn earliest_account_head(conn: &Connection) -> WalletDbResult<Option<ChainHead>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT h.hash, h.sequence
        FROM account_heads h
        JOIN accounts a ON a.id = h.account_id
        WHERE a.deleted_at IS NULL
        ORDER BY h.sequence ASC
        LIMIT 1
        "#,
    )?;

    let rows = stmt.query(named_params! {})?;
    Ok(from_rows::<ChainHead>(rows).next().transpose()?)
}

/// Accounts that have never applied a block and would scan from genesis.
pub fn count_accounts_without_head(conn: &Connection) -> WalletDbResult<u64> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT COUNT(*)
        FROM accounts a
        LEFT JOIN account_heads h ON h.account_id = a.id
        WHERE a.deleted_at IS NULL AND h.account_id IS NULL
        "#,
    )?;

    let count: i64 = stmt.query_row(named_params! {}, |row| row.get(0))?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_util::{test_account, test_pool};
    use crate::models::FixedHash;

    #[test]
    fn create_and_fetch_round_trip() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");

        create_account(&conn, &account).unwrap();
        assert_eq!(get_account(&conn, &account.id).unwrap(), Some(account.clone()));
        assert_eq!(get_account_by_name(&conn, "primary").unwrap(), Some(account.clone()));
        assert_eq!(
            get_account_by_spending_key(&conn, &account.spending_key).unwrap(),
            Some(account)
        );
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        create_account(&conn, &test_account("primary")).unwrap();
        let result = create_account(&conn, &test_account("primary"));
        assert!(matches!(result, Err(WalletDbError::DuplicateEntry(_))));
    }

    #[test]
    fn head_lifecycle() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        assert_eq!(get_account_head(&conn, &account.id).unwrap(), None);
        assert_eq!(count_accounts_without_head(&conn).unwrap(), 1);

        let head = ChainHead::new(FixedHash::new([3u8; 32]), 7);
        set_account_head(&conn, &account.id, &head).unwrap();
        assert_eq!(get_account_head(&conn, &account.id).unwrap(), Some(head));
        assert_eq!(count_accounts_without_head(&conn).unwrap(), 0);
        assert_eq!(latest_account_head(&conn).unwrap(), Some(head));

        clear_account_head(&conn, &account.id).unwrap();
        assert_eq!(get_account_head(&conn, &account.id).unwrap(), None);
    }

    #[test]
    fn earliest_and_latest_heads_span_accounts() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();

        let low = test_account("low");
        let high = test_account("high");
        create_account(&conn, &low).unwrap();
        create_account(&conn, &high).unwrap();

        set_account_head(&conn, &low.id, &ChainHead::new(FixedHash::new([1u8; 32]), 2)).unwrap();
        set_account_head(&conn, &high.id, &ChainHead::new(FixedHash::new([2u8; 32]), 9)).unwrap();

        assert_eq!(earliest_account_head(&conn).unwrap().unwrap().sequence, 2);
        assert_eq!(latest_account_head(&conn).unwrap().unwrap().sequence, 9);
    }

    #[test]
    fn default_account_round_trip() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        assert_eq!(get_default_account_id(&conn).unwrap(), None);
        set_default_account_id(&conn, Some(&account.id)).unwrap();
        assert_eq!(get_default_account_id(&conn).unwrap(), Some(account.id));
        set_default_account_id(&conn, None).unwrap();
        assert_eq!(get_default_account_id(&conn).unwrap(), None);
    }

    #[test]
    fn soft_delete_hides_then_purge_removes() {
        let (_dir, pool) = test_pool();
        let conn = pool.get().unwrap();
        let account = test_account("primary");
        create_account(&conn, &account).unwrap();

        mark_account_deleted(&conn, &account.id).unwrap();
        assert_eq!(get_account(&conn, &account.id).unwrap(), None);
        assert_eq!(list_deleted_account_ids(&conn).unwrap(), vec![account.id]);

        purge_account(&conn, &account.id).unwrap();
        assert!(list_deleted_account_ids(&conn).unwrap().is_empty());
    }
}
