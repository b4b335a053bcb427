//! Nightfall wallet: the shielded account engine of a Nightfall node.
//!
//! The engine tracks any number of shielded accounts against a live
//! blockchain: it trial-decrypts every block's notes with each account's view
//! keys, maintains spendable balances and nullifier bookkeeping, survives
//! chain reorganizations by rewinding per-account head pointers, and builds,
//! proves and publishes new transactions.
//!
//! # Architecture
//!
//! - [`wallet`]: The orchestrator. Owns the account registry and chain
//!   cursor, runs the background event loop (head update, expiry,
//!   rebroadcast, cleanup), applies and unapplies blocks, and assembles
//!   transactions.
//! - [`scan`]: Chain-walking machinery: the follower cursor state machine,
//!   cancellable scan tokens, and the trial-decryption fan-out.
//! - [`db`]: SQLite persistence for accounts, notes, transactions and
//!   balances; the unit of atomicity for every multi-write operation.
//! - [`chain`]: The traits through which the engine consumes the node's
//!   chain store, verifier and mempool.
//! - [`workers`]: The worker pool that runs decryption and proving off the
//!   async runtime.
//! - [`keys`], [`notes`], [`assets`], [`transaction`]: The shielded
//!   primitives: key derivation, sealed notes, asset identifiers and
//!   transaction assembly.
//! - [`config`], [`events`], [`log`], [`models`], [`error`]: Configuration
//!   loading, fan-out notifications, logging setup, shared data types and
//!   the error taxonomy.
//!
//! # Concurrency
//!
//! Everything runs cooperatively on the tokio runtime; heavy cryptography is
//! offloaded to blocking workers. Three exclusion slots coordinate the
//! moving parts: one rescan at a time, one routine head update at a time,
//! and one transaction build at a time. Background phases take cancellation
//! tokens and check them between accounts and between transactions, but a
//! block is always applied to an account in a single database transaction:
//! a committed block is never half-applied.

pub mod assets;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod keys;
pub mod log;
pub mod models;
pub mod notes;
pub mod scan;
pub mod transaction;
pub mod wallet;
pub mod workers;

pub use crate::config::{WalletConfig, load_configuration};
pub use crate::db::init_db;
pub use crate::error::{WalletError, WalletResult};
pub use crate::events::{ChannelEventSender, EventSender, NoopEventSender, WalletEvent};
pub use crate::models::{ChainHead, FixedHash, TransactionStatus, TransactionType};
pub use crate::wallet::{
    Account, AccountBalance, BurnRequest, MintAsset, MintRequest, TransactionOutput, Wallet,
};
pub use crate::workers::WorkerPool;
