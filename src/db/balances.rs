use rusqlite::{Connection, named_params};
use serde::{Deserialize, Serialize};
use serde_rusqlite::from_rows;
use uuid::Uuid;

use crate::assets::AssetId;
use crate::db::error::WalletDbResult;
use crate::models::{ChainHead, FixedHash};

/// The running balance aggregate for one `(account, asset)` pair.
///
/// `unconfirmed` tracks the summed value of the account's unspent owned
/// notes, mined or pending; the block columns record the chain position at
/// which the aggregate was last touched by a connected block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceRow {
    pub asset_id: AssetId,
    pub unconfirmed: i64,
    pub block_hash: Option<FixedHash>,
    pub sequence: Option<u64>,
}

/// Applies a signed delta to an asset balance, creating the row on first
/// touch. When `block` is given the confirmed-at columns move with it.
pub fn adjust_balance(
    conn: &Connection,
    account_id: &Uuid,
    asset_id: &AssetId,
    delta: i64,
    block: Option<&ChainHead>,
) -> WalletDbResult<()> {
    conn.execute(
        r#"
        INSERT INTO balances (account_id, asset_id, unconfirmed, block_hash, sequence)
        VALUES (:account_id, :asset_id, :delta, :block_hash, :sequence)
        ON CONFLICT (account_id, asset_id) DO UPDATE SET
            unconfirmed = unconfirmed + :delta,
            block_hash = COALESCE(:block_hash, block_hash),
            sequence = COALESCE(:sequence, sequence)
        "#,
        named_params! {
            ":account_id": account_id.to_string(),
            ":asset_id": asset_id.to_hex(),
            ":delta": delta,
            ":block_hash": block.map(|b| b.hash.to_hex()),
            ":sequence": block.map(|b| b.sequence as i64),
        },
    )?;
    Ok(())
}

pub fn get_balance(conn: &Connection, account_id: &Uuid, asset_id: &AssetId) -> WalletDbResult<Option<BalanceRow>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT asset_id, unconfirmed, block_hash, sequence
        FROM balances
        WHERE account_id = :account_id AND asset_id = :asset_id
        "#,
    )?;

    let rows = stmt.query(named_params! {
        ":account_id": account_id.to_string(),
        ":asset_id": asset_id.to_hex(),
    })?;
    Ok(from_rows::<BalanceRow>(rows).next().transpose()?)
}

pub fn list_balances(conn: &Connection, account_id: &Uuid) -> WalletDbResult<Vec<BalanceRow>> {
    let mut stmt = conn.prepare_cached(
        r#"
        SELECT asset_id, unconfirmed, block_hash, sequence
        FROM balances
        WHERE account_id = :account_id
        ORDER BY asset_id
        "#,
    )?;

    let rows = stmt.query(named_params! { ":account_id": account_id.to_string() })?;
    Ok(from_rows::<BalanceRow>(rows).collect::<Result<Vec<_>, _>>()?)
}
