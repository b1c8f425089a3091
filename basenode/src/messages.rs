//! Basenode wire messages and the inbound dispatcher
//!
//! Every network-facing rule lives here: signature checks against the
//! right key, timestamp drift bounds, monotonic-update gates, replay
//! dedup, rate limiting, and misbehavior scoring. Handlers never panic
//! on peer input; a bad message is dropped and, where warranted, the
//! peer is charged.

use crate::active::ActiveBasenode;
use crate::node::Basenode;
use crate::payments::{BasenodePayments, PaymentWinner};
use crate::registry::BasenodeManager;
use crate::scanning::{count_scanning_per_block, BasenodeScanning, ScanningError};
use credo_core::{
    ChainView, OutPoint, FUTURE_DRIFT_SECONDS, MAINNET_PORT, MIN_ANNOUNCE_SECONDS,
    MIN_CONFIRMATIONS, MIN_PING_SECONDS, MIN_POS_PROTO_VERSION, MIN_PROTO_VERSION,
    PROTOCOL_VERSION, SCANNING_MAX_BLOCK_AGE, VOTE_RATE_SECONDS, WINNER_SYNC_FUTURE,
    WINNER_SYNC_PAST,
};
use credo_crypto::{is_wellformed_pubkey, verify_message};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Peer identity as the transport reports it ("ip:port")
pub type PeerId = String;

/// Announce payload: a node declaring (or refreshing) its registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceData {
    pub vin: OutPoint,
    pub addr: String,
    pub sig: Vec<u8>,
    pub sig_time: i64,
    /// Collateral-owner key; signs the announce itself
    pub pubkey: String,
    /// Operating key; signs everything after the announce
    pub pubkey2: String,
    /// -1 on an original broadcast, list size on a sync reply
    pub count: i32,
    pub index: i32,
    pub last_seen: i64,
    pub protocol_version: u32,
}

/// Typed messages exchanged with peers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NetMessage {
    Announce(AnnounceData),
    Ping {
        vin: OutPoint,
        sig: Vec<u8>,
        sig_time: i64,
        stop: bool,
    },
    ListRequest {
        vin: Option<OutPoint>,
    },
    Vote {
        vin: OutPoint,
        sig: Vec<u8>,
        vote: i32,
    },
    Winner(PaymentWinner),
    WinnerSyncRequest,
    ScanningReport(ScanningError),
}

/// Transport collaborator: fan-out, targeted push, misbehavior scoring
pub trait PeerSink {
    fn broadcast(&mut self, message: &NetMessage);
    fn push(&mut self, peer: &PeerId, message: &NetMessage);
    fn misbehaving(&mut self, peer: &PeerId, score: u32);
    /// Externally visible address of this node, if the transport knows it
    fn local_address(&self) -> Option<String>;
}

/// Everything a message handler may touch, borrowed for one dispatch
pub struct NetContext<'a> {
    pub registry: &'a mut BasenodeManager,
    pub payments: &'a mut BasenodePayments,
    pub scanning: &'a mut BasenodeScanning,
    pub active: &'a mut ActiveBasenode,
    pub chain: &'a dyn ChainView,
    pub sink: &'a mut dyn PeerSink,
    pub now: i64,
}

/// Canonical announce message string (byte-exact field order)
pub fn announce_message(
    addr: &str,
    sig_time: i64,
    pubkey: &str,
    pubkey2: &str,
    protocol_version: u32,
) -> String {
    format!("{addr}{sig_time}{pubkey}{pubkey2}{protocol_version}")
}

/// Canonical liveness-ping message string
pub fn ping_message(addr: &str, sig_time: i64, stop: bool) -> String {
    format!("{addr}{sig_time}{}", stop as u8)
}

/// Canonical vote message string
pub fn vote_message(vin: &OutPoint, vote: i32) -> String {
    format!("{vin}{vote}")
}

/// RFC1918 / loopback style addresses never relay or rate-limit
pub fn is_local_address(addr: &str) -> bool {
    let host = addr.rsplit_once(':').map(|(h, _)| h).unwrap_or(addr);
    host == "localhost"
        || host == "0.0.0.0"
        || host.starts_with("127.")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
}

/// Route one inbound message. Nothing here is fatal; the worst outcome
/// for a malformed message is a dropped packet and a misbehavior charge.
pub fn process_message(ctx: &mut NetContext, peer: &PeerId, msg: NetMessage) {
    if ctx.chain.is_syncing() {
        return;
    }

    match msg {
        NetMessage::Announce(data) => handle_announce(ctx, peer, data),
        NetMessage::Ping {
            vin,
            sig,
            sig_time,
            stop,
        } => handle_ping(ctx, peer, vin, sig, sig_time, stop),
        NetMessage::ListRequest { vin } => handle_list_request(ctx, peer, vin),
        NetMessage::Vote { vin, sig, vote } => handle_vote(ctx, vin, sig, vote),
        NetMessage::Winner(winner) => handle_winner(ctx, peer, winner),
        NetMessage::WinnerSyncRequest => handle_winner_sync(ctx, peer),
        NetMessage::ScanningReport(report) => handle_scanning_report(ctx, report),
    }
}

fn handle_announce(ctx: &mut NetContext, peer: &PeerId, a: AnnounceData) {
    let now = ctx.now;

    if a.sig_time > now + FUTURE_DRIFT_SECONDS {
        debug!("announce: signature too far into the future {}", a.vin);
        return;
    }

    if a.protocol_version < MIN_PROTO_VERSION {
        debug!(
            "announce: ignoring outdated basenode {} protocol {}",
            a.vin, a.protocol_version
        );
        return;
    }

    if !is_wellformed_pubkey(&a.pubkey) || !is_wellformed_pubkey(&a.pubkey2) {
        warn!("announce: malformed pubkey from {peer}");
        ctx.sink.misbehaving(peer, 100);
        return;
    }

    let message = announce_message(&a.addr, a.sig_time, &a.pubkey, &a.pubkey2, a.protocol_version);
    if !verify_message(&a.pubkey, &message, &a.sig) {
        warn!("announce: bad signature from {peer}");
        ctx.sink.misbehaving(peer, 100);
        return;
    }

    match a.addr.rsplit_once(':').and_then(|(_, p)| p.parse::<u16>().ok()) {
        Some(port) if port == MAINNET_PORT => {}
        _ => return,
    }

    // a hot watcher with an undefined vin processes its own announce in
    // full so it can adopt the collateral reference below
    let own_pending_hot_cold = ctx.active.is_basenode()
        && ctx.active.vin.is_none()
        && ctx.active.matches_operating_key(&a.pubkey2);

    if !own_pending_hot_cold {
        let mut found = false;
        let mut relay = false;
        if let Some(existing) = ctx.registry.find_mut(&a.vin) {
            found = true;
            // count == -1 means an original broadcast rather than a
            // sync reply; only those refresh existing records
            if a.count == -1
                && existing.pubkey == a.pubkey
                && !existing.updated_within(now, MIN_ANNOUNCE_SECONDS)
            {
                existing.update_last_seen(now);

                if existing.sig_time < a.sig_time {
                    info!("announce: got updated entry for {}", a.addr);
                    existing.pubkey2 = a.pubkey2.clone();
                    existing.sig_time = a.sig_time;
                    existing.sig = a.sig.clone();
                    existing.protocol_version = a.protocol_version;
                    existing.addr = a.addr.clone();
                    existing.check(ctx.chain, now);
                    relay = existing.is_enabled();
                }
            }
        }
        if found {
            if relay {
                ctx.sink.broadcast(&NetMessage::Announce(a));
            }
            return;
        }
    }

    // the expensive checks run once per new basenode
    if !ctx.chain.collateral_owned_by(&a.vin, &a.pubkey) {
        warn!("announce: mismatched pubkey and vin from {peer}");
        ctx.sink.misbehaving(peer, 100);
        return;
    }

    if !ctx.chain.collateral_unspent(&a.vin) {
        debug!("announce: rejected entry {}, collateral not acceptable", a.vin);
        return;
    }

    if ctx.chain.confirmations(&a.vin) < MIN_CONFIRMATIONS {
        warn!(
            "announce: input must have at least {} confirmations",
            MIN_CONFIRMATIONS
        );
        ctx.sink.misbehaving(peer, 20);
        return;
    }

    debug!("announce: got new basenode entry {}", a.addr);

    let mut mn = Basenode::new(
        a.addr.clone(),
        a.vin,
        a.pubkey.clone(),
        a.sig.clone(),
        a.sig_time,
        a.pubkey2.clone(),
        a.protocol_version,
    );
    mn.update_last_seen(a.last_seen);
    ctx.registry.add(mn);

    // matches our operating key: we have been remotely activated
    if ctx.active.matches_operating_key(&a.pubkey2) && a.protocol_version == PROTOCOL_VERSION {
        ctx.active.enable_hot_cold(a.vin, a.addr.clone());
    }

    if a.count == -1 && !is_local_address(&a.addr) {
        ctx.sink.broadcast(&NetMessage::Announce(a));
    }
}

fn handle_ping(
    ctx: &mut NetContext,
    peer: &PeerId,
    vin: OutPoint,
    sig: Vec<u8>,
    sig_time: i64,
    stop: bool,
) {
    let now = ctx.now;

    if sig_time > now + FUTURE_DRIFT_SECONDS {
        debug!("ping: signature too far into the future {vin}");
        return;
    }

    if sig_time <= now - FUTURE_DRIFT_SECONDS {
        debug!("ping: signature too far into the past {vin}");
        return;
    }

    let mut known = false;
    let mut remove = false;
    let mut relay = false;

    if let Some(mn) = ctx.registry.find_mut(&vin) {
        if mn.protocol_version >= MIN_PROTO_VERSION {
            known = true;
            // monotonic: only a newer ping does anything
            if mn.last_ping < sig_time {
                let message = ping_message(&mn.addr, sig_time, stop);
                if !verify_message(&mn.pubkey2, &message, &sig) {
                    debug!("ping: bad signature for {vin}");
                    return;
                }

                mn.last_ping = sig_time;

                if stop {
                    remove = true;
                    relay = true;
                } else if !mn.updated_within(now, MIN_PING_SECONDS) {
                    mn.update_last_seen(now);
                    mn.check(ctx.chain, now);
                    if !mn.is_enabled() {
                        return;
                    }
                    relay = true;
                }
            }
        }
    }

    if known {
        if remove {
            ctx.registry.remove(&vin);
        }
        if relay {
            ctx.sink.broadcast(&NetMessage::Ping {
                vin,
                sig,
                sig_time,
                stop,
            });
        }
        return;
    }

    // unknown entry: ask the node that pinged us, once per retry window
    debug!("ping: couldn't find basenode entry {vin}, asking source");
    if ctx.registry.entry_request_allowed(&vin, now) {
        ctx.sink.push(peer, &NetMessage::ListRequest { vin: Some(vin) });
    }
}

fn handle_list_request(ctx: &mut NetContext, peer: &PeerId, vin: Option<OutPoint>) {
    if vin.is_none() && !is_local_address(peer) {
        if !ctx.registry.should_honor_list_request(peer, ctx.now) {
            warn!("list request: peer {peer} already asked for the list");
            ctx.sink.misbehaving(peer, 34);
            return;
        }
    }

    let count = ctx.registry.count() as i32;
    let mut sent = 0;
    for mn in ctx.registry.nodes() {
        if is_local_address(&mn.addr) {
            continue;
        }
        if !mn.is_enabled() {
            continue;
        }

        let entry = NetMessage::Announce(AnnounceData {
            vin: mn.vin,
            addr: mn.addr.clone(),
            sig: mn.sig.clone(),
            sig_time: mn.sig_time,
            pubkey: mn.pubkey.clone(),
            pubkey2: mn.pubkey2.clone(),
            count,
            index: sent,
            last_seen: mn.last_seen,
            protocol_version: mn.protocol_version,
        });

        match vin {
            None => {
                ctx.sink.push(peer, &entry);
                sent += 1;
            }
            Some(wanted) if wanted == mn.vin => {
                ctx.sink.push(peer, &entry);
                debug!("list request: sent single entry to {peer}");
                return;
            }
            Some(_) => {}
        }
    }

    debug!("list request: sent {sent} basenode entries to {peer}");
}

fn handle_vote(ctx: &mut NetContext, vin: OutPoint, sig: Vec<u8>, vote: i32) {
    let now = ctx.now;

    if let Some(mn) = ctx.registry.find_mut(&vin) {
        if now - mn.last_vote > VOTE_RATE_SECONDS {
            let message = vote_message(&vin, vote);
            if !verify_message(&mn.pubkey2, &message, &sig) {
                debug!("vote: bad signature for {vin}");
                return;
            }

            mn.vote = vote;
            mn.last_vote = now;

            ctx.sink.broadcast(&NetMessage::Vote { vin, sig, vote });
        }
    }
}

fn handle_winner(ctx: &mut NetContext, peer: &PeerId, winner: PaymentWinner) {
    let hash = winner.hash();
    if ctx.payments.already_seen(&hash) {
        debug!(
            "winner: seen vote {} height {}",
            hash, winner.block_height
        );
        return;
    }

    let tip = ctx.chain.tip_height();
    if winner.block_height + WINNER_SYNC_PAST < tip
        || winner.block_height > tip + WINNER_SYNC_FUTURE
    {
        warn!(
            "winner: out of range {} height {} tip {}",
            winner.vin, winner.block_height, tip
        );
        return;
    }

    if !ctx.payments.check_signature(&winner) {
        warn!("winner: invalid signature from {peer}");
        ctx.sink.misbehaving(peer, 100);
        return;
    }

    info!(
        "winner: winning vote - vin {} height {} tip {}",
        winner.vin, winner.block_height, tip
    );

    ctx.payments.record_seen(winner.clone());

    if ctx.payments.add_winning(winner.clone(), ctx.chain) {
        ctx.sink.broadcast(&NetMessage::Winner(winner));
    }
}

fn handle_winner_sync(ctx: &mut NetContext, peer: &PeerId) {
    if !ctx.payments.should_honor_sync(peer, ctx.now) {
        warn!("winner sync: peer {peer} already asked for the list");
        ctx.sink.misbehaving(peer, 20);
        return;
    }

    ctx.payments.sync(peer, ctx.chain, ctx.sink);
    debug!("winner sync: sent winners to {peer}");
}

fn handle_scanning_report(ctx: &mut NetContext, report: ScanningError) {
    if !ctx.scanning.note_seen(&report) {
        return;
    }

    if !report.is_valid_code() {
        warn!("scanning report: invalid error code {}", report.error_code);
        return;
    }

    let Some(scanner) = ctx.registry.find(&report.scanner_vin).cloned() else {
        return;
    };
    if scanner.protocol_version < MIN_POS_PROTO_VERSION {
        return;
    }

    let tip = ctx.chain.tip_height();
    if tip > report.block_height + SCANNING_MAX_BLOCK_AGE {
        warn!("scanning report: too old, height {}", report.block_height);
        return;
    }

    // lowest-ranked nodes scan the highest-ranked each block; a report
    // from outside either window is forged or stale
    let per_block = count_scanning_per_block(ctx.registry, ctx.chain, ctx.now);
    let a = ctx.registry.rank_of(
        ctx.chain,
        ctx.now,
        &report.scanner_vin,
        report.block_height,
        MIN_POS_PROTO_VERSION,
        true,
    );
    if a == -1 || a > per_block {
        if a != -1 {
            debug!("scanning report: scanner ranking too high");
        }
        return;
    }

    let eligible =
        ctx.registry
            .count_above_protocol(ctx.chain, ctx.now, MIN_POS_PROTO_VERSION) as i64;
    let b = ctx.registry.rank_of(
        ctx.chain,
        ctx.now,
        &report.target_vin,
        report.block_height,
        MIN_POS_PROTO_VERSION,
        false,
    );
    if b == -1 || b < eligible - per_block {
        if b != -1 {
            debug!("scanning report: target ranking too low");
        }
        return;
    }

    if !report.verify(&scanner.pubkey2) {
        warn!("scanning report: bad signature from {}", report.scanner_vin);
        return;
    }

    if ctx.registry.find(&report.target_vin).is_none() {
        return;
    }

    ctx.registry.apply_scanning_error(&report);
    ctx.sink.broadcast(&NetMessage::ScanningReport(report));
}
