//! Builds trial-decryption payloads and groups the results by account.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::transaction::Transaction;
use crate::wallet::Account;
use crate::workers::{DecryptNotePayload, DecryptedNoteData, WorkerError, WorkerPool};

/// Trial-decrypts one transaction's outputs against every given account.
///
/// When `initial_note_index` is known (the transaction is in a block), each
/// successive output gets the next commitment-tree position; for pending
/// transactions positions stay unknown and nullifiers cannot be derived yet.
/// Results come back grouped by account id; accounts that matched nothing
/// have no entry.
pub async fn decrypt_transaction_notes(
    worker_pool: &WorkerPool,
    accounts: &[Arc<Account>],
    transaction: &Transaction,
    initial_note_index: Option<u64>,
) -> Result<HashMap<Uuid, Vec<DecryptedNoteData>>, WorkerError> {
    let mut payloads = Vec::with_capacity(accounts.len() * transaction.outputs.len());
    let mut owners = Vec::with_capacity(payloads.capacity());

    for account in accounts {
        let mut current_note_index = initial_note_index;
        for output in &transaction.outputs {
            payloads.push(DecryptNotePayload {
                encrypted_note: output.clone(),
                incoming_view_key: *account.incoming_view_key(),
                outgoing_view_key: *account.outgoing_view_key(),
                spending_key: *account.spending_key(),
                current_note_index,
            });
            owners.push(account.id());
            if let Some(index) = current_note_index.as_mut() {
                *index += 1;
            }
        }
    }

    let results = worker_pool.decrypt_notes(payloads).await?;

    let mut grouped: HashMap<Uuid, Vec<DecryptedNoteData>> = HashMap::new();
    for (owner, result) in owners.into_iter().zip(results) {
        if let Some(decrypted) = result {
            grouped.entry(owner).or_default().push(decrypted);
        }
    }

    Ok(grouped)
}
