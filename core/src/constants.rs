//! Protocol parameters
//!
//! These are consensus-adjacent constants. Changing any of them forks a
//! node off the network, so they live here rather than in config.

/// Base coin unit (1 CRD = 100,000,000 units)
pub const COIN: u64 = 100_000_000;

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 70077;

/// Minimum protocol version accepted for basenode announcements
pub const MIN_PROTO_VERSION: u32 = 70076;

/// Minimum protocol version required to take part in proof-of-service
pub const MIN_POS_PROTO_VERSION: u32 = 70076;

/// Confirmations the collateral output needs before a basenode may start
pub const MIN_CONFIRMATIONS: u32 = 15;

/// A liveness ping only refreshes a record this often
pub const MIN_PING_SECONDS: i64 = 30 * 60;

/// An announce only refreshes an existing record this often
pub const MIN_ANNOUNCE_SECONDS: i64 = 5 * 60;

/// How often the local basenode broadcasts its liveness ping
pub const PING_INTERVAL_SECONDS: i64 = 60;

/// Not seen within this window: record is expired
pub const EXPIRATION_SECONDS: i64 = 65 * 60;

/// Not seen within this window: record is removed on the next sweep
pub const REMOVAL_SECONDS: i64 = 70 * 60;

/// One unsolicited full-list request honored per peer per window
pub const LIST_RETRY_SECONDS: i64 = 3 * 60 * 60;

/// Signed timestamps may lead local adjusted time by at most this much
pub const FUTURE_DRIFT_SECONDS: i64 = 60 * 60;

/// Scanning-error count at which a basenode enters the error state
pub const SCANNING_ERROR_THRESHOLD: i32 = 6;

/// Signed scanning-error reports expire after this TTL
pub const SCANNING_ERROR_TTL_SECONDS: i64 = 60 * 60;

/// A scanning-error report older than this many blocks is rejected
pub const SCANNING_MAX_BLOCK_AGE: u64 = 10;

/// Collateral tier boundary: below this height the legacy amount applies
pub const COLLATERAL_TIER_HEIGHT: u64 = 145_000;

/// Collateral required before the tier height
pub const LEGACY_COLLATERAL: u64 = 250_000 * COIN;

/// Collateral required at and after the tier height
pub const CURRENT_COLLATERAL: u64 = 50_000 * COIN;

/// Payment winners are replayed to peers within [tip - PAST, tip + FUTURE]
pub const WINNER_SYNC_PAST: u64 = 10;
pub const WINNER_SYNC_FUTURE: u64 = 20;

/// Winner comparator scores hash the block this many blocks back
pub const WINNER_SCORE_DEPTH: u64 = 576;

/// A basenode vote value may change at most once per window
pub const VOTE_RATE_SECONDS: i64 = 60 * 60;

/// P2P port enforced for mainnet basenode announcements
pub const MAINNET_PORT: u16 = 9340;

/// Network magic bytes (mainnet)
pub const MAINNET_MAGIC: [u8; 4] = [0xc7, 0x3d, 0x91, 0x4e];

/// Collateral amount required at a given chain height
pub fn collateral_amount(height: u64) -> u64 {
    if height < COLLATERAL_TIER_HEIGHT {
        LEGACY_COLLATERAL
    } else {
        CURRENT_COLLATERAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collateral_tiers() {
        assert_eq!(collateral_amount(0), 250_000 * COIN);
        assert_eq!(collateral_amount(144_999), 250_000 * COIN);
        assert_eq!(collateral_amount(145_000), 50_000 * COIN);
        assert_eq!(collateral_amount(1_000_000), 50_000 * COIN);
    }
}
