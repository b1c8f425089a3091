//! Incremental grant election engine
//!
//! Consumes blocks one at a time, maintaining every address's running
//! balance and the per-office preference snapshot. Awards are
//! recomputed at each grant interval and the whole snapshot is written
//! after every ingested block so a restart resumes instead of
//! rescanning the chain.

use crate::error::{ElectionError, Result};
use crate::stv::{Preferences, StvCount};
use crate::{
    grant_value, is_grant_award_block, DEFAULT_CUSTOM_OFFICE, FIXED_OFFICES,
    GRANT_BLOCK_INTERVAL, GRANT_PREFIX, OFFICE_COUNT, VOTE_MARKER_LIMIT,
};
use credo_core::{Block, OutPoint, TxOutput};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

/// Chain access the engine needs: whole blocks plus prevout resolution
pub trait BlockSource {
    fn block_at(&self, height: u64) -> Option<Block>;
    fn prev_output(&self, outpoint: &OutPoint) -> Option<TxOutput>;
}

/// Audit record for one office's count in the last award cycle
#[derive(Debug, Clone, Serialize)]
pub struct OfficeAudit {
    pub office: String,
    pub winner: String,
    pub wasted_votes: BTreeMap<String, i64>,
    pub support_votes: BTreeMap<String, BTreeMap<i64, String>>,
}

pub struct GrantElection {
    offices: Vec<String>,
    /// Last block folded into the snapshot, -1 before the first
    processed_height: i64,
    /// Running coin balance per address as of the processed height
    balances: BTreeMap<String, i64>,
    /// Per office: voter -> (amount -> office address)
    preferences: Vec<Preferences>,
    /// Winner per office index from the last award cycle
    pub award_winners: BTreeMap<usize, String>,
    /// Accrued grant amounts from the last award cycle
    pub grant_awards: BTreeMap<String, u64>,
    /// Count audits from the last award cycle
    pub audits: Vec<OfficeAudit>,
    db_path: PathBuf,
}

impl GrantElection {
    pub fn new(db_path: PathBuf, custom_office: Option<String>) -> Self {
        let mut offices: Vec<String> = ["dof", "tof", "sof", "mof", "bnk"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        offices.push(custom_office.unwrap_or_else(|| DEFAULT_CUSTOM_OFFICE.to_string()));

        GrantElection {
            offices,
            processed_height: -1,
            balances: BTreeMap::new(),
            preferences: vec![Preferences::new(); OFFICE_COUNT],
            award_winners: BTreeMap::new(),
            grant_awards: BTreeMap::new(),
            audits: Vec::new(),
            db_path,
        }
    }

    pub fn processed_height(&self) -> i64 {
        self.processed_height
    }

    pub fn balance_of(&self, address: &str) -> i64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn preferences_for(&self, office: usize) -> Option<&Preferences> {
        self.preferences.get(office)
    }

    /// Office index encoded in a vote address, if any. The office code
    /// sits after the prefix and version character.
    pub fn office_from_address(&self, address: &str) -> Option<usize> {
        if !address.starts_with(GRANT_PREFIX) {
            return None;
        }
        let code = address.get(4..7)?;
        self.offices.iter().position(|office| office == code)
    }

    /// Bring the snapshot up to what awards at `height` require,
    /// loading the persisted database first if nothing is in memory.
    pub fn ensure_up_to_date(&mut self, height: i64, source: &dyn BlockSource) -> Result<()> {
        let required = height - GRANT_BLOCK_INTERVAL;

        if self.processed_height == -1 {
            if let Err(e) = self.load(required) {
                debug!("election: no usable snapshot: {e}");
            }
        }

        while self.processed_height < required {
            self.process_next_block(source)?;
        }

        Ok(())
    }

    /// Awards for a height; valid only when the snapshot sits exactly
    /// one interval behind.
    pub fn awards_for_block(&mut self, height: i64) -> Result<&BTreeMap<String, u64>> {
        if self.processed_height != height - GRANT_BLOCK_INTERVAL {
            warn!(
                "election: awards requested for {} but snapshot is at {}",
                height, self.processed_height
            );
            return Err(ElectionError::Snapshot(
                "snapshot height does not match award height".to_string(),
            ));
        }
        self.compute_awards(height);
        Ok(&self.grant_awards)
    }

    /// Fold the next block into the snapshot, recompute awards when a
    /// grant block is due, and persist.
    pub fn process_next_block(&mut self, source: &dyn BlockSource) -> Result<()> {
        let next = (self.processed_height + 1) as u64;
        let block = source
            .block_at(next)
            .ok_or(ElectionError::MissingBlock(next))?;

        self.scan_block(&block, source);
        self.processed_height += 1;
        debug!(
            "election: block processed, snapshot height now {}",
            self.processed_height
        );

        if is_grant_award_block(self.processed_height + GRANT_BLOCK_INTERVAL) {
            self.compute_awards(self.processed_height + GRANT_BLOCK_INTERVAL);
        }

        self.save()
    }

    fn scan_block(&mut self, block: &Block, source: &dyn BlockSource) {
        for tx in &block.transactions {
            // vote outputs of this transaction: (office, amount, address)
            let mut votes: Vec<(usize, u64, String)> = Vec::new();

            for out in &tx.outputs {
                *self.balances.entry(out.address.clone()).or_insert(0) += out.value as i64;

                if out.value <= VOTE_MARKER_LIMIT {
                    if let Some(office) = self.office_from_address(&out.address) {
                        votes.push((office, out.value, out.address.clone()));
                    }
                }
            }

            if tx.coinbase {
                continue;
            }

            for input in &tx.inputs {
                let Some(prev) = source.prev_output(&input.prevout) else {
                    continue;
                };

                *self.balances.entry(prev.address.clone()).or_insert(0) -= prev.value as i64;

                // the spending address is the voter; the amount doubles
                // as the preference rank
                for (office, amount, vote_address) in &votes {
                    self.preferences[*office]
                        .entry(prev.address.clone())
                        .or_default()
                        .insert(*amount, vote_address.clone());
                }
            }
        }
    }

    /// Run the STV count for every office and accrue grants for the
    /// fixed ones. The working ballots are rebuilt per office and
    /// dropped afterwards; only the audit survives.
    fn compute_awards(&mut self, height: i64) {
        self.award_winners.clear();
        self.grant_awards.clear();
        self.audits.clear();

        for office in 0..self.offices.len() {
            let mut count = StvCount::new(&self.preferences[office], &self.balances);
            let winner = count.run();

            info!(
                "election: office {} winner {} at height {}",
                self.offices[office], winner, height
            );

            self.award_winners.insert(office, winner.clone());
            self.audits.push(OfficeAudit {
                office: self.offices[office].clone(),
                winner: winner.clone(),
                wasted_votes: count.wasted_votes,
                support_votes: count.support_votes,
            });

            if office < FIXED_OFFICES {
                *self.grant_awards.entry(winner).or_insert(0) += grant_value(height as u64);
            }
        }
    }

    /// Audit of the last award cycle as JSON, for the reporting layer
    pub fn audit_json(&self) -> String {
        serde_json::to_string_pretty(&self.audits).unwrap_or_default()
    }

    // -- persistence -------------------------------------------------------

    /// Plain-text line format: processed height; balance count and
    /// address/balance lines; then per fixed office the preference map.
    pub fn save(&self) -> Result<()> {
        let mut out = String::new();

        let _ = writeln!(out, "{}", self.processed_height);

        let _ = writeln!(out, "{}", self.balances.len());
        for (address, balance) in &self.balances {
            let _ = writeln!(out, "{address}");
            let _ = writeln!(out, "{balance}");
        }

        for office in 0..FIXED_OFFICES {
            let prefs = &self.preferences[office];
            let _ = writeln!(out, "{}", prefs.len());
            for (voter, list) in prefs {
                let _ = writeln!(out, "{voter}");
                let _ = writeln!(out, "{}", list.len());
                for (amount, vote_address) in list {
                    let _ = writeln!(out, "{amount}");
                    let _ = writeln!(out, "{vote_address}");
                }
            }
        }

        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.db_path, out)?;
        Ok(())
    }

    /// Load the snapshot. A persisted height beyond `max_wanted` is not
    /// trusted and the snapshot is discarded rather than reconciled;
    /// a corrupt file fails closed, leaving the in-memory state empty.
    pub fn load(&mut self, max_wanted: i64) -> Result<bool> {
        fn next_line<'a>(lines: &mut std::str::Lines<'a>, what: &str) -> Result<&'a str> {
            lines
                .next()
                .ok_or_else(|| ElectionError::Snapshot(format!("truncated at {what}")))
        }
        fn parse_i64(s: &str, what: &str) -> Result<i64> {
            s.parse()
                .map_err(|_| ElectionError::Snapshot(format!("bad number at {what}: {s}")))
        }

        let content = fs::read_to_string(&self.db_path)?;
        let mut lines = content.lines();

        let height = parse_i64(next_line(&mut lines, "height")?, "height")?;
        if height > max_wanted {
            info!(
                "election: snapshot at {} is ahead of wanted {}, discarding",
                height, max_wanted
            );
            self.processed_height = -1;
            return Ok(false);
        }

        let mut balances = BTreeMap::new();
        let balance_count = parse_i64(next_line(&mut lines, "balance count")?, "balance count")?;
        for _ in 0..balance_count {
            let address = next_line(&mut lines, "balance address")?.to_string();
            let balance = parse_i64(next_line(&mut lines, "balance value")?, "balance value")?;
            balances.insert(address, balance);
        }

        let mut preferences = vec![Preferences::new(); OFFICE_COUNT];
        for office in preferences.iter_mut().take(FIXED_OFFICES) {
            let voter_count = parse_i64(next_line(&mut lines, "voter count")?, "voter count")?;
            for _ in 0..voter_count {
                let voter = next_line(&mut lines, "voter")?.to_string();
                let entry_count =
                    parse_i64(next_line(&mut lines, "entry count")?, "entry count")?;
                let mut list = BTreeMap::new();
                for _ in 0..entry_count {
                    let amount: u64 = parse_i64(next_line(&mut lines, "amount")?, "amount")?
                        .try_into()
                        .map_err(|_| ElectionError::Snapshot("negative amount".to_string()))?;
                    let vote_address = next_line(&mut lines, "vote address")?.to_string();
                    list.insert(amount, vote_address);
                }
                office.insert(voter, list);
            }
        }

        self.processed_height = height;
        self.balances = balances;
        self.preferences = preferences;
        info!("election: loaded snapshot at height {height}");
        Ok(true)
    }
}
