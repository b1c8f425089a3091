//! Basenode record and per-record state machine

use credo_core::{
    ChainView, Hash256, OutPoint, EXPIRATION_SECONDS, REMOVAL_SECONDS,
    SCANNING_ERROR_THRESHOLD,
};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a registered basenode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasenodeStatus {
    Enabled,
    Expired,
    VinSpent,
    Remove,
    PosError,
}

impl BasenodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BasenodeStatus::Enabled => "ENABLED",
            BasenodeStatus::Expired => "EXPIRED",
            BasenodeStatus::VinSpent => "VIN_SPENT",
            BasenodeStatus::Remove => "REMOVE",
            BasenodeStatus::PosError => "POS_ERROR",
        }
    }
}

/// One registered service node.
///
/// The collateral outpoint is the only identity; two records never share
/// it. `pubkey` proves collateral ownership on the announce, `pubkey2`
/// signs everything the node does afterwards (pings, votes, scan
/// reports).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Basenode {
    pub vin: OutPoint,
    pub addr: String,
    pub pubkey: String,
    pub pubkey2: String,
    pub sig: Vec<u8>,
    pub status: BasenodeStatus,
    /// Timestamp of the announce signature
    pub sig_time: i64,
    /// Timestamp of the newest accepted liveness ping
    pub last_ping: i64,
    pub last_seen: i64,
    pub protocol_version: u32,
    pub vote: i32,
    pub last_vote: i64,
    pub scanning_error_count: i32,
    pub last_scanning_error_height: u64,
}

impl Basenode {
    pub fn new(
        addr: String,
        vin: OutPoint,
        pubkey: String,
        sig: Vec<u8>,
        sig_time: i64,
        pubkey2: String,
        protocol_version: u32,
    ) -> Self {
        Basenode {
            vin,
            addr,
            pubkey,
            pubkey2,
            sig,
            status: BasenodeStatus::Enabled,
            sig_time,
            last_ping: 0,
            last_seen: 0,
            protocol_version,
            vote: 0,
            last_vote: 0,
            scanning_error_count: 0,
            last_scanning_error_height: 0,
        }
    }

    pub fn update_last_seen(&mut self, now: i64) {
        self.last_seen = now;
    }

    pub fn updated_within(&self, now: i64, seconds: i64) -> bool {
        now - self.last_seen < seconds
    }

    pub fn is_enabled(&self) -> bool {
        self.status == BasenodeStatus::Enabled
    }

    /// Seconds the node has been continuously visible
    pub fn active_seconds(&self) -> i64 {
        self.last_seen - self.sig_time
    }

    /// Re-evaluate the lifecycle state.
    ///
    /// Ordering is deliberate: the sticky states come first and the
    /// collateral probe (the only expensive check, it hits the UTXO
    /// view) comes last and is itself sticky once it trips.
    pub fn check(&mut self, chain: &dyn ChainView, now: i64) {
        if self.scanning_error_count >= SCANNING_ERROR_THRESHOLD {
            self.status = BasenodeStatus::PosError;
            return;
        }

        if self.status == BasenodeStatus::VinSpent {
            return;
        }

        if !self.updated_within(now, REMOVAL_SECONDS) {
            self.status = BasenodeStatus::Remove;
            return;
        }

        if !self.updated_within(now, EXPIRATION_SECONDS) {
            self.status = BasenodeStatus::Expired;
            return;
        }

        if !chain.collateral_unspent(&self.vin) {
            self.status = BasenodeStatus::VinSpent;
            return;
        }

        self.status = BasenodeStatus::Enabled;
    }

    /// Apply an accepted scanning report to the error counter.
    ///
    /// Idempotent per block height: a second report for the same height
    /// is a no-op. Success decrements toward zero, every other code
    /// increments up to twice the error threshold.
    pub fn apply_scanning_error(&mut self, block_height: u64, success: bool) {
        if block_height == self.last_scanning_error_height {
            return;
        }
        self.last_scanning_error_height = block_height;

        if success {
            self.scanning_error_count = (self.scanning_error_count - 1).max(0);
        } else {
            self.scanning_error_count =
                (self.scanning_error_count + 1).min(SCANNING_ERROR_THRESHOLD * 2);
        }
    }

    /// Deterministic election score at a height.
    ///
    /// `|H(blockHash) - H(blockHash || aux)|` where aux folds the
    /// collateral txid and output index together. The operator cannot
    /// influence the value without controlling which block gets mined.
    pub fn calculate_score(&self, block_hash: Hash256) -> Hash256 {
        let aux = self
            .vin
            .txid
            .wrapping_add(&Hash256::from_u64(self.vin.vout as u64));

        let hash2 = Hash256::sha256(block_hash.as_bytes());
        let hash3 = Hash256::sha256_concat(block_hash.as_bytes(), aux.as_bytes());

        hash3.abs_diff(&hash2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockChain;

    fn sample_node(last_seen: i64) -> Basenode {
        let mut mn = Basenode::new(
            "10.1.2.3:9340".to_string(),
            OutPoint::new(Hash256::sha256(b"collateral"), 0),
            "aa".repeat(32),
            vec![],
            1_700_000_000,
            "bb".repeat(32),
            70077,
        );
        mn.update_last_seen(last_seen);
        mn
    }

    #[test]
    fn test_fresh_node_enabled() {
        let chain = MockChain::with_height(200_000);
        let now = 1_700_000_100;
        let mut mn = sample_node(now);
        mn.check(&chain, now);
        assert!(mn.is_enabled());
    }

    #[test]
    fn test_expiry_then_removal() {
        let chain = MockChain::with_height(200_000);
        let now = 1_700_000_000;
        let mut mn = sample_node(now - EXPIRATION_SECONDS - 1);
        mn.check(&chain, now);
        assert_eq!(mn.status, BasenodeStatus::Expired);

        mn.update_last_seen(now - REMOVAL_SECONDS - 1);
        mn.check(&chain, now);
        assert_eq!(mn.status, BasenodeStatus::Remove);
    }

    #[test]
    fn test_spent_collateral_is_sticky() {
        let mut chain = MockChain::with_height(200_000);
        let now = 1_700_000_100;
        let mut mn = sample_node(now);

        chain.spend(&mn.vin);
        mn.check(&chain, now);
        assert_eq!(mn.status, BasenodeStatus::VinSpent);

        // collateral becoming acceptable again does not resurrect it
        chain.unspend(&mn.vin);
        mn.check(&chain, now);
        assert_eq!(mn.status, BasenodeStatus::VinSpent);
    }

    #[test]
    fn test_pos_error_checked_first() {
        let chain = MockChain::with_height(200_000);
        let now = 1_700_000_100;
        let mut mn = sample_node(now - REMOVAL_SECONDS - 1);
        mn.scanning_error_count = SCANNING_ERROR_THRESHOLD;
        mn.check(&chain, now);
        assert_eq!(mn.status, BasenodeStatus::PosError);
    }

    #[test]
    fn test_scanning_error_counter_bounds() {
        let mut mn = sample_node(0);
        for h in 1..100u64 {
            mn.apply_scanning_error(h, false);
        }
        assert_eq!(mn.scanning_error_count, SCANNING_ERROR_THRESHOLD * 2);

        for h in 100..300u64 {
            mn.apply_scanning_error(h, true);
        }
        assert_eq!(mn.scanning_error_count, 0);
    }

    #[test]
    fn test_scanning_error_idempotent_per_height() {
        let mut mn = sample_node(0);
        mn.apply_scanning_error(50, false);
        mn.apply_scanning_error(50, false);
        mn.apply_scanning_error(50, false);
        assert_eq!(mn.scanning_error_count, 1);
    }

    #[test]
    fn test_score_deterministic() {
        let mn = sample_node(0);
        let bh = Hash256::sha256(b"block-100");
        assert_eq!(mn.calculate_score(bh), mn.calculate_score(bh));
        assert_ne!(
            mn.calculate_score(bh),
            mn.calculate_score(Hash256::sha256(b"block-101"))
        );
    }
}
