//! Wallet event notifications.
//!
//! The engine fans out a small set of events with no ordering guarantee
//! between subscribers. Consumers implement [`EventSender`], or use
//! [`ChannelEventSender`] to pipe events into a tokio channel;
//! [`NoopEventSender`] discards them.

use crate::db::AccountValue;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub enum WalletEvent {
    /// An account was added to the registry from imported key material.
    AccountImported(AccountValue),

    /// An account was removed from the registry; its data is cleaned up by
    /// the event loop afterwards.
    AccountRemoved(AccountValue),

    /// A transaction was created and accepted by this wallet.
    TransactionCreated(Transaction),

    /// A transaction should be (re)broadcast to the network.
    BroadcastTransaction(Transaction),
}

pub trait EventSender: Send + Sync {
    fn send(&self, event: WalletEvent) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct NoopEventSender;

impl EventSender for NoopEventSender {
    fn send(&self, _event: WalletEvent) -> bool {
        true
    }
}

#[derive(Debug, Clone)]
pub struct ChannelEventSender {
    sender: tokio::sync::mpsc::UnboundedSender<WalletEvent>,
}

impl ChannelEventSender {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<WalletEvent>) -> Self {
        Self { sender }
    }
}

impl EventSender for ChannelEventSender {
    fn send(&self, event: WalletEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}
