//! Proof-of-service scanning
//!
//! Each block, roughly the lowest-ranked 1% of basenodes probe the
//! highest-ranked nodes for liveness and gossip signed reports about
//! the outcome. A full round over the network takes hours, so a node
//! has to fail repeatedly before its error counter reaches the removal
//! threshold. Collusion between a scanner and its target would require
//! predicting future block hashes.

use crate::active::ActiveBasenode;
use crate::messages::{NetMessage, PeerSink};
use crate::registry::BasenodeManager;
use credo_core::{
    ChainView, Hash256, OutPoint, MIN_POS_PROTO_VERSION, SCANNING_ERROR_TTL_SECONDS,
};
use credo_crypto::{sign_message, verify_message, KeyPair};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const SCANNING_SUCCESS: u8 = 1;
pub const SCANNING_ERROR_NO_RESPONSE: u8 = 2;
pub const SCANNING_ERROR_IX_NO_RESPONSE: u8 = 3;
pub const SCANNING_ERROR_MAX: u8 = 3;

/// How far below the tip the scanning duty height sits
const SCAN_HEIGHT_LAG: u64 = 5;

/// Transport-side liveness probe with a bounded connect timeout
pub trait LivenessProbe {
    fn probe(&self, addr: &str) -> bool;
}

/// Signed outcome of one scanner-to-target probe. Immutable once
/// signed; identity is the content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningError {
    pub scanner_vin: OutPoint,
    pub target_vin: OutPoint,
    pub error_code: u8,
    pub expiration: i64,
    pub block_height: u64,
    pub sig: Vec<u8>,
}

impl ScanningError {
    pub fn new(
        scanner_vin: OutPoint,
        target_vin: OutPoint,
        error_code: u8,
        block_height: u64,
        now: i64,
    ) -> Self {
        ScanningError {
            scanner_vin,
            target_vin,
            error_code,
            expiration: now + SCANNING_ERROR_TTL_SECONDS,
            block_height,
            sig: Vec::new(),
        }
    }

    /// Content hash over every field except the signature
    pub fn hash(&self) -> Hash256 {
        let content = bincode::serialize(&(
            &self.scanner_vin,
            &self.target_vin,
            self.error_code,
            self.expiration,
            self.block_height,
        ))
        .unwrap_or_default();
        Hash256::sha256(&content)
    }

    pub fn is_valid_code(&self) -> bool {
        self.error_code >= SCANNING_SUCCESS && self.error_code <= SCANNING_ERROR_MAX
    }

    pub fn is_success(&self) -> bool {
        self.error_code == SCANNING_SUCCESS
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expiration
    }

    fn message(&self) -> String {
        format!(
            "{}{}{}{}",
            self.scanner_vin, self.target_vin, self.block_height, self.error_code
        )
    }

    /// Sign with the scanner's operating key
    pub fn sign(&mut self, operating_key: &KeyPair) {
        self.sig = sign_message(operating_key, &self.message());
    }

    /// Verify against the scanner's on-file operating key
    pub fn verify(&self, operating_pubkey: &str) -> bool {
        verify_message(operating_pubkey, &self.message(), &self.sig)
    }
}

/// How many basenodes are allowed to scan each block
pub fn count_scanning_per_block(
    registry: &mut BasenodeManager,
    chain: &dyn ChainView,
    now: i64,
) -> i64 {
    (registry.count_above_protocol(chain, now, MIN_POS_PROTO_VERSION) as i64 / 100).max(1)
}

/// Scanning duty cycle plus the seen-report cache
#[derive(Debug, Default)]
pub struct BasenodeScanning {
    /// content hash -> expiration of reports we have processed
    seen: HashMap<Hash256, i64>,
}

impl BasenodeScanning {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report; false when it was already known
    pub fn note_seen(&mut self, report: &ScanningError) -> bool {
        self.seen
            .insert(report.hash(), report.expiration)
            .is_none()
    }

    /// Drop reports past their TTL
    pub fn clean(&mut self, now: i64) {
        self.seen.retain(|_, expiration| now <= *expiration);
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Run this node's scanning duty for the current block, if ranked
    /// low enough this round.
    pub fn do_checks(
        &mut self,
        registry: &mut BasenodeManager,
        active: &ActiveBasenode,
        chain: &dyn ChainView,
        probe: &dyn LivenessProbe,
        sink: &mut dyn PeerSink,
        now: i64,
    ) {
        if !active.is_basenode() || chain.is_syncing() {
            return;
        }

        let Some(own_vin) = active.vin else {
            return;
        };
        let Some(operating_key) = active.operating_key() else {
            return;
        };

        let tip = chain.tip_height();
        if tip <= SCAN_HEIGHT_LAG {
            return;
        }
        let height = tip - SCAN_HEIGHT_LAG;

        let rank = registry.rank_of(chain, now, &own_vin, height, MIN_POS_PROTO_VERSION, true);
        if rank == -1 || rank > count_scanning_per_block(registry, chain, now) {
            // not our turn this block
            return;
        }

        // the lowest ranking nodes check the highest ranking nodes
        let eligible = registry.count_above_protocol(chain, now, MIN_POS_PROTO_VERSION) as i64;
        let Some(target) =
            registry.by_rank(chain, now, eligible - rank, height, MIN_POS_PROTO_VERSION, false)
        else {
            return;
        };

        if target.vin == own_vin {
            return;
        }

        let code = if probe.probe(&target.addr) {
            SCANNING_SUCCESS
        } else {
            SCANNING_ERROR_NO_RESPONSE
        };

        debug!(
            "scanning: probed {} at height {} -> code {}",
            target.addr, height, code
        );

        let mut report = ScanningError::new(own_vin, target.vin, code, height, now);
        report.sign(operating_key);

        self.note_seen(&report);
        sink.broadcast(&NetMessage::ScanningReport(report));
    }
}
