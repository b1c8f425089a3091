//! Credo Core Library
//!
//! Shared chain primitives and the narrow collaborator interfaces the
//! basenode subsystem is built against.

pub mod constants;
pub mod traits;
pub mod types;

pub use constants::*;
pub use traits::{ChainView, SpendableOutput, WalletBridge};
pub use types::{Block, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Current unix time in seconds
pub fn unix_time() -> i64 {
    chrono::Utc::now().timestamp()
}
