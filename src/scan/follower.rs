//! Cursor state machine tracking the canonical chain.
//!
//! The follower owns a `(hash, sequence)` cursor and answers one question:
//! what is the single next step toward the canonical head? Either the cursor
//! block fell off the canonical chain (disconnect it and step back) or the
//! next canonical block exists (connect it and step forward). The wallet
//! drives the loop so it can check abort signals and apply each block
//! transactionally between steps; re-entrancy is prevented by the
//! orchestrator's head-update slot.

use crate::chain::{Chain, ChainError, BlockHeader, GENESIS_SEQUENCE};
use crate::models::ChainHead;

/// One step of cursor movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// Apply this canonical block; the cursor moves onto it.
    Connect(BlockHeader),
    /// Unapply this block; the cursor moves to its parent.
    Disconnect(BlockHeader),
}

#[derive(Debug)]
pub struct ChainFollower {
    head: Option<ChainHead>,
}

impl ChainFollower {
    pub fn new(head: Option<ChainHead>) -> Self {
        Self { head }
    }

    pub fn head(&self) -> Option<ChainHead> {
        self.head
    }

    pub fn reset(&mut self, head: Option<ChainHead>) {
        self.head = head;
    }

    /// Computes the next connect/disconnect step toward the canonical head,
    /// or `None` when the cursor already sits on it.
    pub fn next_event(&self, chain: &dyn Chain) -> Result<Option<ChainEvent>, ChainError> {
        let Some(chain_head) = chain.head()? else {
            // Nothing canonical yet; nothing to do.
            return Ok(None);
        };

        match self.head {
            None => {
                let genesis = chain
                    .get_header_at_sequence(GENESIS_SEQUENCE)?
                    .ok_or(ChainError::SequenceNotFound(GENESIS_SEQUENCE))?;
                Ok(Some(ChainEvent::Connect(genesis)))
            },
            Some(cursor) => {
                let canonical = chain.get_header_at_sequence(cursor.sequence)?;
                let on_canonical = canonical.is_some_and(|header| header.hash == cursor.hash);

                if !on_canonical {
                    let header = chain
                        .get_header(&cursor.hash)?
                        .ok_or(ChainError::HeaderNotFound(cursor.hash))?;
                    return Ok(Some(ChainEvent::Disconnect(header)));
                }

                if cursor.sequence >= chain_head.sequence {
                    return Ok(None);
                }

                let next = chain
                    .get_header_at_sequence(cursor.sequence + 1)?
                    .ok_or(ChainError::SequenceNotFound(cursor.sequence + 1))?;
                Ok(Some(ChainEvent::Connect(next)))
            },
        }
    }

    /// Records that an event was applied, moving the cursor.
    pub fn apply(&mut self, event: &ChainEvent) {
        match event {
            ChainEvent::Connect(header) => {
                self.head = Some(header.head());
            },
            ChainEvent::Disconnect(header) => {
                self.head = if header.sequence <= GENESIS_SEQUENCE {
                    None
                } else {
                    Some(ChainHead::new(header.previous_block_hash, header.sequence - 1))
                };
            },
        }
    }
}
