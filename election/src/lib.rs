//! Credo Grant Election
//!
//! Ranked-choice grant allocation funded from block rewards. Voters
//! cast preferences by sending small marker amounts to office-tagged
//! addresses; every grant interval a single-transferable-vote count
//! elects one winner per office and the fixed offices accrue the grant
//! for that cycle.

pub mod engine;
pub mod error;
pub mod stv;

pub use engine::{BlockSource, GrantElection, OfficeAudit};
pub use error::{ElectionError, Result};
pub use stv::{Preferences, StvCount};

use credo_core::COIN;

/// Prefix identifying grant vote addresses
pub const GRANT_PREFIX: &str = "CRD";

/// Blocks between grant awards
pub const GRANT_BLOCK_INTERVAL: i64 = 1;

/// Largest output value that still counts as a vote marker
pub const VOTE_MARKER_LIMIT: u64 = 1000;

/// Offices that disburse a grant (the configurable sixth does not)
pub const FIXED_OFFICES: usize = 5;

/// Total electable offices, including the operator-configurable one
pub const OFFICE_COUNT: usize = 6;

/// Office code used when no custom office is configured
pub const DEFAULT_CUSTOM_OFFICE: &str = "vte";

/// Grants with no supported candidate are burned here
pub const SINK_ADDRESS: &str = "CRD1UnspendableGrantSink";

/// Whether awards are due at a height
pub fn is_grant_award_block(height: i64) -> bool {
    height > 0 && height % GRANT_BLOCK_INTERVAL == 0
}

/// Per-cycle grant amount. Protocol issuance schedule: halves every
/// 1,051,200 blocks.
pub fn grant_value(height: u64) -> u64 {
    let halvings = (height / 1_051_200).min(63);
    (500 * COIN) >> halvings
}
