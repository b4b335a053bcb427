//! Chain-walking machinery: the follower cursor, the cancellable scan token
//! and the decryption fan-out.

mod decryptor;
mod follower;
mod state;

pub use decryptor::decrypt_transaction_notes;
pub use follower::{ChainEvent, ChainFollower};
pub use state::{ScanProgress, ScanState};
