//! Basenode registry
//!
//! The authoritative in-memory table of known basenodes, plus the
//! rank/election computation and the on-disk snapshot. Lookups are
//! linear scans over the vector; at the expected network scale of a few
//! hundred nodes an index would buy nothing, so the simple form is kept
//! on purpose.

use crate::error::{BasenodeError, Result};
use crate::messages::{NetMessage, PeerId, PeerSink};
use crate::node::{Basenode, BasenodeStatus};
use crate::scanning::ScanningError;
use credo_core::{ChainView, Hash256, OutPoint, LIST_RETRY_SECONDS, MIN_PING_SECONDS};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Magic string leading every registry snapshot file
pub const SNAPSHOT_MAGIC: &str = "BasenodeCache";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct BasenodeManager {
    basenodes: Vec<Basenode>,
    /// who asked us for the basenode list, and when the request unburns
    asked_us_for_list: HashMap<PeerId, i64>,
    /// who we asked for the basenode list
    we_asked_for_list: HashMap<PeerId, i64>,
    /// which individual entries we have asked a peer for
    we_asked_for_entry: HashMap<OutPoint, i64>,
}

impl BasenodeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Rejected when the record is not enabled or when
    /// the collateral outpoint is already registered.
    pub fn add(&mut self, mn: Basenode) -> bool {
        if !mn.is_enabled() {
            return false;
        }

        if self.find(&mn.vin).is_some() {
            return false;
        }

        debug!(
            "registry: adding basenode {} - {} now",
            mn.addr,
            self.basenodes.len() + 1
        );
        self.basenodes.push(mn);
        true
    }

    pub fn find(&self, vin: &OutPoint) -> Option<&Basenode> {
        self.basenodes.iter().find(|mn| mn.vin == *vin)
    }

    pub fn find_mut(&mut self, vin: &OutPoint) -> Option<&mut Basenode> {
        self.basenodes.iter_mut().find(|mn| mn.vin == *vin)
    }

    /// Find by operating key (the key that signs pings and votes)
    pub fn find_by_operating_key(&self, pubkey2: &str) -> Option<&Basenode> {
        self.basenodes.iter().find(|mn| mn.pubkey2 == pubkey2)
    }

    /// Re-check a record and return it only if it came out enabled
    pub fn find_checked(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        vin: &OutPoint,
    ) -> Option<Basenode> {
        let mn = self.find_mut(vin)?;
        mn.check(chain, now);
        if mn.is_enabled() {
            Some(mn.clone())
        } else {
            None
        }
    }

    pub fn remove(&mut self, vin: &OutPoint) {
        if let Some(pos) = self.basenodes.iter().position(|mn| mn.vin == *vin) {
            debug!(
                "registry: removing basenode {} - {} now",
                self.basenodes[pos].addr,
                self.basenodes.len() - 1
            );
            self.basenodes.remove(pos);
        }
    }

    pub fn clear(&mut self) {
        self.basenodes.clear();
        self.asked_us_for_list.clear();
        self.we_asked_for_list.clear();
        self.we_asked_for_entry.clear();
    }

    pub fn count(&self) -> usize {
        self.basenodes.len()
    }

    pub fn nodes(&self) -> &[Basenode] {
        &self.basenodes
    }

    /// Re-evaluate every record's lifecycle state
    pub fn check(&mut self, chain: &dyn ChainView, now: i64) {
        for mn in &mut self.basenodes {
            mn.check(chain, now);
        }
    }

    /// Re-check everything, drop records flagged for removal or with
    /// spent collateral, and expire stale ask-bookkeeping entries.
    pub fn check_and_remove(&mut self, chain: &dyn ChainView, now: i64) {
        self.check(chain, now);

        self.basenodes.retain(|mn| {
            let keep =
                mn.status != BasenodeStatus::Remove && mn.status != BasenodeStatus::VinSpent;
            if !keep {
                debug!("registry: removing inactive basenode {}", mn.addr);
            }
            keep
        });

        self.asked_us_for_list.retain(|_, expires| *expires >= now);
        self.we_asked_for_list.retain(|_, expires| *expires >= now);
        self.we_asked_for_entry.retain(|_, expires| *expires >= now);
    }

    pub fn count_enabled(&mut self, chain: &dyn ChainView, now: i64) -> usize {
        self.basenodes
            .iter_mut()
            .map(|mn| {
                mn.check(chain, now);
                mn
            })
            .filter(|mn| mn.is_enabled())
            .count()
    }

    pub fn count_above_protocol(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        protocol_version: u32,
    ) -> usize {
        self.basenodes
            .iter_mut()
            .map(|mn| {
                mn.check(chain, now);
                mn
            })
            .filter(|mn| mn.protocol_version >= protocol_version && mn.is_enabled())
            .count()
    }

    /// Oldest (by collateral confirmations) enabled node not present in
    /// the exclusion list. Used to rotate payment winners.
    pub fn find_oldest_not_in_vec(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        exclude: &[OutPoint],
        min_input_age: u32,
    ) -> Option<Basenode> {
        let mut oldest: Option<(u32, Basenode)> = None;

        for mn in &mut self.basenodes {
            mn.check(chain, now);
            if !mn.is_enabled() {
                continue;
            }

            let age = chain.confirmations(&mn.vin);
            if age < min_input_age {
                continue;
            }

            if exclude.contains(&mn.vin) {
                continue;
            }

            if oldest.as_ref().map_or(true, |(best, _)| *best < age) {
                oldest = Some((age, mn.clone()));
            }
        }

        oldest.map(|(_, mn)| mn)
    }

    /// Scores for every node passing the filters, or None when the
    /// block hash at that height is unknown. Sorted descending; the
    /// sort is stable so equal scores keep insertion order.
    fn scored(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<Vec<(Hash256, OutPoint)>> {
        let block_hash = chain.block_hash(height)?;

        let mut scores: Vec<(Hash256, OutPoint)> = Vec::new();
        for mn in &mut self.basenodes {
            if mn.protocol_version < min_protocol {
                continue;
            }
            if only_active {
                mn.check(chain, now);
                if !mn.is_enabled() {
                    continue;
                }
            }
            scores.push((mn.calculate_score(block_hash), mn.vin));
        }

        scores.sort_by(|a, b| b.0.cmp(&a.0));
        Some(scores)
    }

    /// Full ranking at a height: 1-based rank paired with the record
    pub fn ranks(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        height: u64,
        min_protocol: u32,
    ) -> Vec<(usize, Basenode)> {
        let Some(scores) = self.scored(chain, now, height, min_protocol, true) else {
            return Vec::new();
        };

        scores
            .iter()
            .enumerate()
            .filter_map(|(i, (_, vin))| self.find(vin).map(|mn| (i + 1, mn.clone())))
            .collect()
    }

    /// 1-based rank of a node at a height, or -1 when it is filtered
    /// out or the block hash is unknown
    pub fn rank_of(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        vin: &OutPoint,
        height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> i64 {
        let Some(scores) = self.scored(chain, now, height, min_protocol, only_active) else {
            return -1;
        };

        scores
            .iter()
            .position(|(_, v)| v == vin)
            .map(|pos| (pos + 1) as i64)
            .unwrap_or(-1)
    }

    /// Node at a given 1-based rank, or None
    pub fn by_rank(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        rank: i64,
        height: u64,
        min_protocol: u32,
        only_active: bool,
    ) -> Option<Basenode> {
        if rank < 1 {
            return None;
        }
        let scores = self.scored(chain, now, height, min_protocol, only_active)?;
        let (_, vin) = scores.get(rank as usize - 1)?;
        self.find(vin).cloned()
    }

    /// Highest-scoring enabled node for a height
    pub fn current_winner(
        &mut self,
        chain: &dyn ChainView,
        now: i64,
        height: u64,
        min_protocol: u32,
    ) -> Option<Basenode> {
        let scores = self.scored(chain, now, height, min_protocol, true)?;
        let (_, vin) = scores.first()?;
        self.find(vin).cloned()
    }

    /// Status listing for the RPC layer; one object per record covering
    /// the list modes the CLI exposes
    pub fn list_entries(&self) -> Vec<serde_json::Value> {
        self.basenodes
            .iter()
            .map(|mn| {
                serde_json::json!({
                    "vin": mn.vin.to_string(),
                    "status": mn.status.as_str(),
                    "addr": mn.addr,
                    "pubkey": mn.pubkey,
                    "protocol": mn.protocol_version,
                    "lastseen": mn.last_seen,
                    "activeseconds": mn.active_seconds(),
                    "votes": mn.vote,
                    "pose": mn.scanning_error_count,
                })
            })
            .collect()
    }

    /// Apply a validated scanning report to its target's error counter
    pub fn apply_scanning_error(&mut self, report: &ScanningError) {
        if !report.is_valid_code() {
            return;
        }
        if let Some(mn) = self.find_mut(&report.target_vin) {
            mn.apply_scanning_error(report.block_height, report.is_success());
        }
    }

    // -- ask bookkeeping ---------------------------------------------------

    /// One unsolicited full-list request per peer per retry window
    pub fn should_honor_list_request(&mut self, peer: &PeerId, now: i64) -> bool {
        if let Some(&expires) = self.asked_us_for_list.get(peer) {
            if now < expires {
                return false;
            }
        }
        self.asked_us_for_list
            .insert(peer.clone(), now + LIST_RETRY_SECONDS);
        true
    }

    /// Ask a peer for the full basenode list, at most once per window
    pub fn request_list(&mut self, peer: &PeerId, sink: &mut dyn PeerSink, now: i64) {
        if let Some(&expires) = self.we_asked_for_list.get(peer) {
            if now < expires {
                debug!("registry: we already asked {} for the list; skipping", peer);
                return;
            }
        }
        sink.push(peer, &NetMessage::ListRequest { vin: None });
        self.we_asked_for_list
            .insert(peer.clone(), now + LIST_RETRY_SECONDS);
    }

    /// Whether we may ask for a single missing entry right now
    pub fn entry_request_allowed(&mut self, vin: &OutPoint, now: i64) -> bool {
        if let Some(&expires) = self.we_asked_for_entry.get(vin) {
            if now < expires {
                return false;
            }
        }
        self.we_asked_for_entry.insert(*vin, now + MIN_PING_SECONDS);
        true
    }

    // -- persistence -------------------------------------------------------

    /// Write the snapshot: magic string, network magic, bincode payload,
    /// then a SHA-256 of everything preceding it.
    pub fn save(&self, path: &Path, network_magic: [u8; 4]) -> Result<()> {
        let mut buf: Vec<u8> = Vec::new();
        buf.extend_from_slice(SNAPSHOT_MAGIC.as_bytes());
        buf.extend_from_slice(&network_magic);

        let body = bincode::serialize(self)
            .map_err(|e| BasenodeError::Snapshot(format!("serialize: {e}")))?;
        buf.extend_from_slice(&body);

        let checksum = Sha256::digest(&buf);
        buf.extend_from_slice(&checksum);

        fs::write(path, &buf)?;
        info!("registry: wrote {} basenodes to {}", self.count(), path.display());
        Ok(())
    }

    /// Read a snapshot back. Any mismatch fails closed: the error is
    /// returned and the caller continues with an empty registry.
    pub fn load(path: &Path, network_magic: [u8; 4]) -> Result<Self> {
        let data = fs::read(path)?;

        let header_len = SNAPSHOT_MAGIC.len() + network_magic.len();
        if data.len() < header_len + 32 {
            return Err(BasenodeError::Snapshot("file truncated".to_string()));
        }

        let (payload, checksum) = data.split_at(data.len() - 32);
        let digest = Sha256::digest(payload);
        if digest.as_slice() != checksum {
            return Err(BasenodeError::Snapshot(
                "checksum mismatch, data corrupted".to_string(),
            ));
        }

        if &payload[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC.as_bytes() {
            return Err(BasenodeError::Snapshot(
                "invalid basenode cache magic message".to_string(),
            ));
        }

        let magic_end = SNAPSHOT_MAGIC.len() + network_magic.len();
        if payload[SNAPSHOT_MAGIC.len()..magic_end] != network_magic {
            return Err(BasenodeError::Snapshot(
                "invalid network magic number".to_string(),
            ));
        }

        bincode::deserialize(&payload[magic_end..])
            .map_err(|e| BasenodeError::Snapshot(format!("deserialize: {e}")))
    }

    /// Load a snapshot, logging and falling back to an empty registry on
    /// any failure. Never fatal to the process.
    pub fn load_or_default(path: &Path, network_magic: [u8; 4]) -> Self {
        match Self::load(path, network_magic) {
            Ok(manager) => {
                info!(
                    "registry: loaded {} basenodes from {}",
                    manager.count(),
                    path.display()
                );
                manager
            }
            Err(e) => {
                warn!("registry: failed to read {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    /// Verify the on-disk snapshot parses, then overwrite it with the
    /// current state. A snapshot with an unreadable format is left alone
    /// rather than clobbered.
    pub fn dump(&self, path: &Path, network_magic: [u8; 4]) -> Result<()> {
        if path.exists() {
            match Self::load(path, network_magic) {
                Ok(_) => {}
                Err(BasenodeError::Io(_)) => {}
                Err(BasenodeError::Snapshot(ref s)) if s.contains("deserialize") => {
                    debug!("registry: stale snapshot format, recreating");
                }
                Err(e) => {
                    warn!("registry: snapshot {} unreadable ({}), not overwriting", path.display(), e);
                    return Err(e);
                }
            }
        }
        self.save(path, network_magic)
    }

    pub fn summary(&self) -> String {
        format!(
            "Basenodes: {}, peers who asked us for the list: {}, peers we asked for the list: {}, entries we asked for: {}",
            self.basenodes.len(),
            self.asked_us_for_list.len(),
            self.we_asked_for_list.len(),
            self.we_asked_for_entry.len()
        )
    }
}
