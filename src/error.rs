//! The wallet's error taxonomy.
//!
//! Precondition failures surface before any state is written; fund and
//! verifier failures abort the requesting call; database, chain and worker
//! errors propagate unchanged. Background loops log and isolate errors per
//! account or transaction instead of letting them terminate the loop.

use thiserror::Error;

use crate::assets::AssetId;
use crate::chain::ChainError;
use crate::db::WalletDbError;
use crate::workers::WorkerError;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("no account with the name `{0}`")]
    AccountNotFound(String),

    #[error("an account named `{0}` already exists")]
    DuplicateAccountName(String),

    #[error("an account with the provided spending key already exists")]
    DuplicateSpendingKey,

    #[error("account `{0}` is not synced to the chain head; wait for scanning to complete")]
    AccountNotUpToDate(String),

    #[error("expiration sequence {0} is not past the chain head")]
    InvalidExpiration(u64),

    #[error("the chain has no head to build a transaction against")]
    NoChainHead,

    #[error("not enough funds for asset {asset_id}: have {have}, need {need}")]
    NotEnoughFunds { asset_id: AssetId, have: u64, need: u64 },

    #[error("no asset {0} on the chain")]
    UnknownAsset(AssetId),

    #[error("asset {0} was not created by this account's keys")]
    AssetNotOwned(AssetId),

    #[error("transaction rejected by the verifier: {0}")]
    VerifierRejection(String),

    #[error("wallet database error: {0}")]
    Db(#[from] WalletDbError),

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("worker pool error: {0}")]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type WalletResult<T> = Result<T, WalletError>;
