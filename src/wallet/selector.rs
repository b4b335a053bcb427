//! Spend selection: choosing unspent notes to cover a transaction's outputs
//! plus fee, per asset.

use std::collections::BTreeMap;

use log::{debug, warn};
use rusqlite::Connection;

use crate::assets::AssetId;
use crate::chain::Chain;
use crate::db;
use crate::error::{WalletError, WalletResult};
use crate::log::mask_string;
use crate::transaction::{RawTransaction, SpendSource};
use crate::wallet::Account;

/// Accumulates unspent notes per asset until `amounts_needed` is covered,
/// appending the selections to `raw.spends`.
///
/// Candidates come back oldest-confirmed-first, which makes selection
/// deterministic. A candidate is skipped when it has no value, is not yet
/// mined, turns out to be spent on chain (the local record is repaired to
/// `spent`), or cannot currently be witnessed.
pub(crate) fn fund_transaction(
    conn: &Connection,
    chain: &dyn Chain,
    account: &Account,
    raw: &mut RawTransaction,
    amounts_needed: &BTreeMap<AssetId, u64>,
    head_sequence: u64,
    confirmations: u64,
) -> WalletResult<()> {
    let max_sequence = head_sequence.saturating_sub(confirmations);

    for (&asset_id, &needed) in amounts_needed {
        if needed == 0 {
            continue;
        }

        let mut amount: u64 = 0;
        let account_id = account.id();

        for candidate in db::get_unspent_notes(conn, &account_id, &asset_id, max_sequence)? {
            if candidate.value == 0 {
                continue;
            }
            let (Some(position), Some(nullifier)) = (candidate.position, candidate.nullifier) else {
                continue;
            };

            if chain.contains_nullifier(&nullifier)? {
                // The chain already saw this nullifier: our local view missed
                // the spend. Repair the record and move on.
                warn!(
                    target: "audit",
                    account = account.name(),
                    note = &*mask_string(&candidate.note_hash.to_hex());
                    "Note is spent on chain but was marked unspent; repairing"
                );
                if db::set_note_spent(conn, &account_id, &candidate.note_hash, true)? {
                    db::adjust_balance(conn, &account_id, &asset_id, -(candidate.value as i64), None)?;
                }
                continue;
            }

            let Some(witness) = chain.witness(position)? else {
                debug!(
                    note = &*mask_string(&candidate.note_hash.to_hex()),
                    position = position;
                    "Note cannot currently be witnessed; skipping"
                );
                continue;
            };

            amount += candidate.value;
            raw.spends.push(SpendSource { note: candidate.note()?, witness });

            if amount >= needed {
                break;
            }
        }

        if amount < needed {
            warn!(
                target: "audit",
                account = account.name(),
                asset = &*asset_id.to_hex(),
                have = amount,
                need = needed;
                "Insufficient funds for transaction"
            );
            return Err(WalletError::NotEnoughFunds { asset_id, have: amount, need: needed });
        }

        debug!(
            account = account.name(),
            asset = &*asset_id.to_hex(),
            notes = raw.spends.len(),
            total = amount;
            "Notes selected"
        );
    }

    Ok(())
}
