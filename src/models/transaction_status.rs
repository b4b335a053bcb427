use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Where a wallet transaction sits in its lifecycle, derived from its mined
/// position, the chain head and the configured confirmation depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Mined at least `confirmations` blocks below the head.
    Confirmed,
    /// Mined, but not yet deep enough.
    Unconfirmed,
    /// Not mined and the head has passed its expiration sequence.
    Expired,
    /// Not mined and still broadcastable.
    Pending,
    /// No chain head is known, so nothing can be said.
    Unknown,
}

impl TransactionStatus {
    /// Derives the status from a transaction record's `(sequence, expiration)`
    /// and the current head sequence.
    ///
    /// An expiration equal to the head sequence counts as expired; an
    /// expiration of zero never expires.
    pub fn derive(
        sequence: Option<u64>,
        expiration: u64,
        head_sequence: Option<u64>,
        confirmations: u64,
    ) -> Self {
        let Some(head_sequence) = head_sequence else {
            return TransactionStatus::Unknown;
        };

        match sequence {
            Some(sequence) => {
                if head_sequence.saturating_sub(sequence) >= confirmations {
                    TransactionStatus::Confirmed
                } else {
                    TransactionStatus::Unconfirmed
                }
            },
            None => {
                if expiration != 0 && expiration <= head_sequence {
                    TransactionStatus::Expired
                } else {
                    TransactionStatus::Pending
                }
            },
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Confirmed => write!(f, "CONFIRMED"),
            TransactionStatus::Unconfirmed => write!(f, "UNCONFIRMED"),
            TransactionStatus::Expired => write!(f, "EXPIRED"),
            TransactionStatus::Pending => write!(f, "PENDING"),
            TransactionStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(TransactionStatus::Confirmed),
            "UNCONFIRMED" => Ok(TransactionStatus::Unconfirmed),
            "EXPIRED" => Ok(TransactionStatus::Expired),
            "PENDING" => Ok(TransactionStatus::Pending),
            "UNKNOWN" => Ok(TransactionStatus::Unknown),
            _ => Err(format!("Invalid TransactionStatus: {}", s)),
        }
    }
}

/// How a transaction relates to the account that recorded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// A miner reward coinbase.
    Miner,
    /// At least one spend consumes a note owned by the account.
    Send,
    /// Everything else: the account only receives.
    Receive,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Miner => write!(f, "MINER"),
            TransactionType::Send => write!(f, "SEND"),
            TransactionType::Receive => write!(f, "RECEIVE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mined_deep_enough_is_confirmed() {
        let status = TransactionStatus::derive(Some(10), 0, Some(12), 2);
        assert_eq!(status, TransactionStatus::Confirmed);
    }

    #[test]
    fn mined_shallow_is_unconfirmed() {
        let status = TransactionStatus::derive(Some(11), 0, Some(12), 2);
        assert_eq!(status, TransactionStatus::Unconfirmed);
    }

    #[test]
    fn expiration_equal_to_head_is_expired() {
        let status = TransactionStatus::derive(None, 12, Some(12), 2);
        assert_eq!(status, TransactionStatus::Expired);
    }

    #[test]
    fn unmined_before_expiration_is_pending() {
        let status = TransactionStatus::derive(None, 13, Some(12), 2);
        assert_eq!(status, TransactionStatus::Pending);
    }

    #[test]
    fn zero_expiration_never_expires() {
        let status = TransactionStatus::derive(None, 0, Some(1_000_000), 2);
        assert_eq!(status, TransactionStatus::Pending);
    }

    #[test]
    fn no_head_is_unknown() {
        let status = TransactionStatus::derive(Some(10), 0, None, 2);
        assert_eq!(status, TransactionStatus::Unknown);
    }
}
