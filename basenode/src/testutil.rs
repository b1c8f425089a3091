//! In-memory collaborator doubles shared by the test suites

use crate::messages::{NetMessage, PeerId, PeerSink};
use crate::node::Basenode;
use crate::scanning::LivenessProbe;
use credo_core::{ChainView, Hash256, OutPoint, SpendableOutput, WalletBridge};
use std::collections::{HashMap, HashSet};

/// Deterministic chain double. Block hashes derive from the height so
/// every test sees the same chain without fixtures.
pub struct MockChain {
    pub tip: u64,
    pub syncing: bool,
    pub time: i64,
    spent: HashSet<OutPoint>,
    owners: HashMap<OutPoint, String>,
    confirmations: HashMap<OutPoint, u32>,
}

impl MockChain {
    pub fn with_height(tip: u64) -> Self {
        MockChain {
            tip,
            syncing: false,
            time: 1_700_000_000,
            spent: HashSet::new(),
            owners: HashMap::new(),
            confirmations: HashMap::new(),
        }
    }

    pub fn spend(&mut self, outpoint: &OutPoint) {
        self.spent.insert(*outpoint);
    }

    pub fn unspend(&mut self, outpoint: &OutPoint) {
        self.spent.remove(outpoint);
    }

    pub fn set_owner(&mut self, outpoint: &OutPoint, pubkey_hex: &str) {
        self.owners.insert(*outpoint, pubkey_hex.to_string());
    }

    pub fn set_confirmations(&mut self, outpoint: &OutPoint, confirmations: u32) {
        self.confirmations.insert(*outpoint, confirmations);
    }
}

impl ChainView for MockChain {
    fn tip_height(&self) -> u64 {
        self.tip
    }

    fn block_hash(&self, height: u64) -> Option<Hash256> {
        if height > self.tip {
            return None;
        }
        Some(Hash256::sha256(format!("block-{height}").as_bytes()))
    }

    fn collateral_unspent(&self, outpoint: &OutPoint) -> bool {
        !self.spent.contains(outpoint)
    }

    fn collateral_owned_by(&self, outpoint: &OutPoint, pubkey_hex: &str) -> bool {
        match self.owners.get(outpoint) {
            Some(owner) => owner == pubkey_hex,
            None => true,
        }
    }

    fn confirmations(&self, outpoint: &OutPoint) -> u32 {
        self.confirmations.get(outpoint).copied().unwrap_or(100)
    }

    fn is_syncing(&self) -> bool {
        self.syncing
    }

    fn adjusted_time(&self) -> i64 {
        self.time
    }
}

/// Wallet double holding a fixed set of spendable outputs
#[derive(Default)]
pub struct MockWallet {
    pub locked: bool,
    pub outputs: Vec<SpendableOutput>,
    pub locked_coins: HashSet<OutPoint>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WalletBridge for MockWallet {
    fn is_locked(&self) -> bool {
        self.locked
    }

    fn collateral_outputs(&self, value: u64) -> Vec<SpendableOutput> {
        self.outputs
            .iter()
            .filter(|o| o.value == value)
            .cloned()
            .collect()
    }

    fn lock_coin(&mut self, outpoint: &OutPoint) {
        self.locked_coins.insert(*outpoint);
    }

    fn unlock_coin(&mut self, outpoint: &OutPoint) {
        self.locked_coins.remove(outpoint);
    }
}

/// Transport double recording everything the subsystem emits
#[derive(Default)]
pub struct MockSink {
    pub broadcasts: Vec<NetMessage>,
    pub pushes: Vec<(PeerId, NetMessage)>,
    pub misbehavior: Vec<(PeerId, u32)>,
    pub local_addr: Option<String>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PeerSink for MockSink {
    fn broadcast(&mut self, message: &NetMessage) {
        self.broadcasts.push(message.clone());
    }

    fn push(&mut self, peer: &PeerId, message: &NetMessage) {
        self.pushes.push((peer.clone(), message.clone()));
    }

    fn misbehaving(&mut self, peer: &PeerId, score: u32) {
        self.misbehavior.push((peer.clone(), score));
    }

    fn local_address(&self) -> Option<String> {
        self.local_addr.clone()
    }
}

/// Probe double with an allow-list of reachable addresses
#[derive(Default)]
pub struct MockProbe {
    pub reachable: HashSet<String>,
}

impl LivenessProbe for MockProbe {
    fn probe(&self, addr: &str) -> bool {
        self.reachable.contains(addr)
    }
}

/// Basenode with deterministic identity derived from a seed
pub fn test_node(seed: &[u8], now: i64) -> Basenode {
    let mut pubkey = Hash256::sha256(&[seed, b"-owner"].concat()).to_hex();
    pubkey.truncate(64);
    let mut pubkey2 = Hash256::sha256(&[seed, b"-operator"].concat()).to_hex();
    pubkey2.truncate(64);

    let mut mn = Basenode::new(
        format!("203.0.113.{}:9340", seed.first().copied().unwrap_or(1) % 250),
        OutPoint::new(Hash256::sha256(seed), 0),
        pubkey,
        vec![],
        now - 3600,
        pubkey2,
        credo_core::PROTOCOL_VERSION,
    );
    mn.update_last_seen(now);
    mn
}
