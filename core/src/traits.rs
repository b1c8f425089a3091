//! Collaborator interfaces
//!
//! The basenode subsystem never talks to the blockchain engine or the
//! wallet directly; it goes through these narrow views. Concrete
//! implementations live in the node binary, test doubles live next to
//! the code under test.

use crate::types::{Hash256, OutPoint};

/// Read-only view of the active chain
pub trait ChainView {
    /// Height of the current chain tip
    fn tip_height(&self) -> u64;

    /// Block hash at a height, if the block is known
    fn block_hash(&self, height: u64) -> Option<Hash256>;

    /// Whether the collateral output is still an acceptable unspent input
    fn collateral_unspent(&self, outpoint: &OutPoint) -> bool;

    /// Whether the output is locked to the given owner public key
    fn collateral_owned_by(&self, outpoint: &OutPoint, pubkey_hex: &str) -> bool;

    /// Confirmations of the output's containing transaction, 0 if unknown
    fn confirmations(&self, outpoint: &OutPoint) -> u32;

    /// Initial block download in progress
    fn is_syncing(&self) -> bool;

    /// Network-adjusted unix time
    fn adjusted_time(&self) -> i64;
}

/// Spendable output handed out by the wallet, with the keys needed to
/// prove collateral ownership.
#[derive(Debug, Clone)]
pub struct SpendableOutput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub owner_pubkey: String,
    pub owner_privkey: String,
}

/// The only wallet operations the basenode subsystem needs
pub trait WalletBridge {
    /// Whether the wallet is locked for signing
    fn is_locked(&self) -> bool;

    /// Spendable outputs of exactly the given value
    fn collateral_outputs(&self, value: u64) -> Vec<SpendableOutput>;

    /// Reserve an output against accidental reuse
    fn lock_coin(&mut self, outpoint: &OutPoint);

    /// Release a previously reserved output
    fn unlock_coin(&mut self, outpoint: &OutPoint);
}
