//! Offloads compute-heavy cryptography from the async runtime.
//!
//! Trial decryption and transaction proving are pure CPU work; the wallet
//! never runs them on its own task. The pool chunks decryption payloads into
//! batches and fans them out over blocking worker threads, so a block full
//! of notes decrypts in parallel while the caller just awaits the joined
//! results.

use thiserror::Error;
use tokio::task::JoinSet;

use crate::keys::{IncomingViewKey, OutgoingViewKey, SpendingKey};
use crate::models::FixedHash;
use crate::notes::{EncryptedNote, Note};
use crate::transaction::{RawTransaction, Transaction, TransactionError};

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
    #[error("transaction could not be posted: {0}")]
    Post(#[from] TransactionError),
}

/// One trial-decryption request: a sealed note tried against one account's
/// keys. `current_note_index` is the note's commitment-tree position when
/// the containing transaction is in a block, and `None` while it is pending.
#[derive(Clone, Debug)]
pub struct DecryptNotePayload {
    pub encrypted_note: EncryptedNote,
    pub incoming_view_key: IncomingViewKey,
    pub outgoing_view_key: OutgoingViewKey,
    pub spending_key: SpendingKey,
    pub current_note_index: Option<u64>,
}

/// A successful trial decryption.
#[derive(Clone, Debug)]
pub struct DecryptedNoteData {
    pub note: Note,
    /// The note commitment; the wallet keys decrypted notes by it.
    pub hash: FixedHash,
    pub index: Option<u64>,
    /// Only derivable for owned notes with a known index.
    pub nullifier: Option<FixedHash>,
    /// True when only the outgoing view key matched: a copy of a note this
    /// account sent, not a spendable note.
    pub for_spender: bool,
}

fn decrypt_payload(payload: &DecryptNotePayload) -> Option<DecryptedNoteData> {
    if let Some(note) = payload.encrypted_note.open(&payload.incoming_view_key) {
        let nullifier = payload
            .current_note_index
            .map(|index| note.nullifier(&payload.spending_key, index));
        let hash = note.commitment();
        return Some(DecryptedNoteData {
            note,
            hash,
            index: payload.current_note_index,
            nullifier,
            for_spender: false,
        });
    }

    if let Some(note) = payload.encrypted_note.open_for_spender(&payload.outgoing_view_key) {
        let hash = note.commitment();
        return Some(DecryptedNoteData {
            note,
            hash,
            index: payload.current_note_index,
            nullifier: None,
            for_spender: true,
        });
    }

    None
}

/// Shared pool for decryption fan-out and transaction proving.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    batch_size: usize,
}

impl WorkerPool {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    /// Trial-decrypts every payload, preserving order: the result at `i`
    /// corresponds to `payloads[i]`, `None` meaning the keys did not match.
    pub async fn decrypt_notes(
        &self,
        payloads: Vec<DecryptNotePayload>,
    ) -> Result<Vec<Option<DecryptedNoteData>>, WorkerError> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for (batch_index, batch) in payloads.chunks(self.batch_size).enumerate() {
            let batch = batch.to_vec();
            tasks.spawn_blocking(move || {
                let results: Vec<Option<DecryptedNoteData>> = batch.iter().map(decrypt_payload).collect();
                (batch_index, results)
            });
        }

        let mut batches = Vec::with_capacity(payloads.len() / self.batch_size + 1);
        while let Some(joined) = tasks.join_next().await {
            batches.push(joined?);
        }
        batches.sort_by_key(|(index, _)| *index);

        Ok(batches.into_iter().flat_map(|(_, results)| results).collect())
    }

    /// Proves a raw transaction off the async runtime.
    pub async fn post_transaction(&self, raw: RawTransaction) -> Result<Transaction, WorkerError> {
        let transaction = tokio::task::spawn_blocking(move || raw.post()).await??;
        Ok(transaction)
    }
}
