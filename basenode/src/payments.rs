//! Basenode payment winners
//!
//! Keeps track of who should get paid for which blocks. Winner records
//! are signed by a fixed network-wide authority key, not by individual
//! basenodes; peers verify the signature and then settle competing
//! claims for the same height by comparator score.

use crate::messages::{NetMessage, PeerId, PeerSink};
use crate::node::Basenode;
use crate::registry::BasenodeManager;
use credo_core::{
    ChainView, Hash256, OutPoint, LIST_RETRY_SECONDS, WINNER_SCORE_DEPTH, WINNER_SYNC_FUTURE,
    WINNER_SYNC_PAST,
};
use credo_crypto::{public_key_to_address, sign_message, verify_message, KeyPair};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Authority key all payment-winner records are checked against
pub const DEFAULT_AUTHORITY_PUBKEY: &str =
    "8a5f3be1d49c70aa14e07c9d6d2f14b14907be27b9bb555931773f62ba6cf35a";

/// One block's elected payee
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentWinner {
    pub block_height: u64,
    pub vin: OutPoint,
    pub payee: String,
    pub score: u64,
    pub sig: Vec<u8>,
}

impl PaymentWinner {
    pub fn new(block_height: u64, vin: OutPoint, payee: String) -> Self {
        PaymentWinner {
            block_height,
            vin,
            payee,
            score: 0,
            sig: Vec::new(),
        }
    }

    /// Dedup hash over (height, vin).
    ///
    /// The distance construction rather than a plain digest is the wire
    /// format peers already recompute; it stays as-is for
    /// compatibility even though unrelated claims at different heights
    /// could in principle collide.
    pub fn hash(&self) -> Hash256 {
        let height_hash = Hash256::sha256(&self.block_height.to_le_bytes());
        self.vin.txid.abs_diff(&height_hash)
    }
}

/// Canonical winner message string
pub fn winner_message(winner: &PaymentWinner) -> String {
    format!("{}{}{}", winner.vin, winner.block_height, winner.payee)
}

pub struct BasenodePayments {
    winners: Vec<PaymentWinner>,
    /// winner votes we have seen, by content hash
    seen_votes: HashMap<Hash256, PaymentWinner>,
    /// peers that already requested a winner sync this window
    sync_requests: HashMap<PeerId, i64>,
    authority_pubkey: String,
    authority_key: Option<KeyPair>,
    enabled: bool,
    last_block_height: u64,
}

impl BasenodePayments {
    pub fn new(authority_pubkey: String) -> Self {
        BasenodePayments {
            winners: Vec::new(),
            seen_votes: HashMap::new(),
            sync_requests: HashMap::new(),
            authority_pubkey,
            authority_key: None,
            enabled: false,
            last_block_height: 0,
        }
    }

    /// Install the authority private key. Succeeds only when it matches
    /// the configured authority public key; from then on this node
    /// produces winner records itself.
    pub fn set_authority_key(&mut self, privkey_hex: &str) -> bool {
        let Ok(keypair) = KeyPair::from_private_key_hex(privkey_hex) else {
            warn!("payments: invalid authority key");
            return false;
        };

        let mut probe = PaymentWinner::default();
        probe.sig = sign_message(&keypair, &winner_message(&probe));

        if verify_message(&self.authority_pubkey, &winner_message(&probe), &probe.sig) {
            info!("payments: initialized as basenode payments master");
            self.authority_key = Some(keypair);
            self.enabled = true;
            true
        } else {
            false
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_block_height(&self) -> u64 {
        self.last_block_height
    }

    pub fn winners(&self) -> &[PaymentWinner] {
        &self.winners
    }

    pub fn check_signature(&self, winner: &PaymentWinner) -> bool {
        verify_message(&self.authority_pubkey, &winner_message(winner), &winner.sig)
    }

    pub fn sign(&self, winner: &mut PaymentWinner) -> bool {
        let Some(key) = &self.authority_key else {
            warn!("payments: no authority key to sign with");
            return false;
        };

        winner.sig = sign_message(key, &winner_message(winner));

        if !verify_message(&key.public_key_hex(), &winner_message(winner), &winner.sig) {
            warn!("payments: verify after sign failed");
            return false;
        }
        true
    }

    /// Comparator score: 64-bit distance between the hashed block hash
    /// and the hashed collateral txid. Higher wins.
    pub fn calculate_score(block_hash: Hash256, vin: &OutPoint) -> u64 {
        let n2 = Hash256::sha256(block_hash.as_bytes());
        let n3 = Hash256::sha256(vin.txid.as_bytes());
        n3.abs_diff(&n2).low_u64()
    }

    pub fn already_seen(&self, hash: &Hash256) -> bool {
        self.seen_votes.contains_key(hash)
    }

    pub fn record_seen(&mut self, winner: PaymentWinner) {
        self.seen_votes.insert(winner.hash(), winner);
    }

    /// Accept a candidate winner. At most one accepted winner per
    /// height; a competing claim replaces the stored one only with a
    /// strictly greater score.
    pub fn add_winning(&mut self, mut winner: PaymentWinner, chain: &dyn ChainView) -> bool {
        let Some(score_height) = winner.block_height.checked_sub(WINNER_SCORE_DEPTH) else {
            return false;
        };
        let Some(block_hash) = chain.block_hash(score_height) else {
            return false;
        };

        winner.score = Self::calculate_score(block_hash, &winner.vin);

        for existing in &mut self.winners {
            if existing.block_height == winner.block_height {
                if existing.score < winner.score {
                    *existing = winner.clone();
                    self.record_seen(winner);
                    return true;
                }
                return false;
            }
        }

        self.record_seen(winner.clone());
        self.winners.push(winner);
        true
    }

    pub fn winner_at(&self, block_height: u64) -> Option<&PaymentWinner> {
        self.winners
            .iter()
            .find(|w| w.block_height == block_height)
    }

    pub fn get_block_payee(&self, block_height: u64) -> Option<String> {
        self.winner_at(block_height).map(|w| w.payee.clone())
    }

    pub fn get_winning_basenode(&self, block_height: u64) -> Option<OutPoint> {
        self.winner_at(block_height).map(|w| w.vin)
    }

    /// Blocks since this node last won, or None if it never did
    pub fn last_payment(&self, mn: &Basenode, tip: u64) -> Option<u64> {
        self.winners
            .iter()
            .rev()
            .find(|w| w.vin == mn.vin)
            .map(|w| tip.saturating_sub(w.block_height))
    }

    /// Elect and record the winner for a block. Monotonic: a height at
    /// or below the last processed one is refused outright.
    pub fn process_block(
        &mut self,
        block_height: u64,
        registry: &mut BasenodeManager,
        chain: &dyn ChainView,
        sink: &mut dyn PeerSink,
        now: i64,
    ) -> bool {
        if block_height <= self.last_block_height {
            return false;
        }
        if !self.enabled {
            return false;
        }

        // one full rotation of currently enabled nodes
        let rotation = registry.count_enabled(chain, now);

        let Some(gate_height) = block_height.checked_sub(WINNER_SYNC_PAST) else {
            return false;
        };
        if chain.block_hash(gate_height).is_none() {
            return false;
        }

        debug!("payments: process block start height {block_height}");

        let mut last_payments: Vec<OutPoint> = Vec::new();
        for winner in self.winners.iter().rev() {
            // one full payment cycle collected: stop
            if last_payments.len() > rotation {
                break;
            }
            last_payments.push(winner.vin);
        }

        // prefer the oldest node that has not been paid this rotation
        let mut elected =
            registry.find_oldest_not_in_vec(chain, now, &last_payments, rotation as u32);

        // otherwise walk the recent winners backwards for one still enabled
        if elected.is_none() && rotation > 0 {
            for vin in last_payments.iter().rev() {
                if let Some(mn) = registry.find_checked(chain, now, vin) {
                    elected = Some(mn);
                    break;
                }
            }
        }

        let Some(mn) = elected else {
            return false;
        };

        let payee = public_key_to_address(&mn.pubkey);
        info!(
            "payments: winner payee {} height {} vin {}",
            payee, block_height, mn.vin
        );

        let mut winner = PaymentWinner::new(block_height, mn.vin, payee);
        if !self.sign(&mut winner) {
            return false;
        }

        if self.add_winning(winner, chain) {
            if let Some(stored) = self.winner_at(block_height).cloned() {
                sink.broadcast(&NetMessage::Winner(stored));
            }
            self.last_block_height = block_height;
            return true;
        }

        false
    }

    /// One unsolicited winner sync honored per peer per retry window
    pub fn should_honor_sync(&mut self, peer: &PeerId, now: i64) -> bool {
        if let Some(&expires) = self.sync_requests.get(peer) {
            if now < expires {
                return false;
            }
        }
        self.sync_requests
            .insert(peer.clone(), now + LIST_RETRY_SECONDS);
        true
    }

    /// Replay recent winners to a peer. Bounded window, never the full
    /// history, to limit relay amplification.
    pub fn sync(&self, peer: &PeerId, chain: &dyn ChainView, sink: &mut dyn PeerSink) {
        let tip = chain.tip_height();
        for winner in &self.winners {
            if winner.block_height + WINNER_SYNC_PAST >= tip
                && winner.block_height <= tip + WINNER_SYNC_FUTURE
            {
                sink.push(peer, &NetMessage::Winner(winner.clone()));
            }
        }
    }

    /// Drop at most one winner older than the retention window. Callers
    /// invoke this once per block; the single removal bounds per-call
    /// cost.
    pub fn clean_payment_list(&mut self, tip: u64, registry_size: usize) {
        let limit = (registry_size * 2).max(1000) as u64;

        if let Some(pos) = self
            .winners
            .iter()
            .position(|w| tip.saturating_sub(w.block_height) > limit)
        {
            let removed = self.winners.remove(pos);
            debug!(
                "payments: removing old payment winner, block {}",
                removed.block_height
            );
            self.seen_votes.remove(&removed.hash());
        }
    }
}

impl Default for BasenodePayments {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHORITY_PUBKEY.to_string())
    }
}
