//! Local basenode activation
//!
//! Drives this process from unregistered to announced to pinging. This
//! is the only component that mutates the node's own registration; the
//! registry is touched through its public operations only.

use crate::error::{BasenodeError, Result};
use crate::messages::{
    announce_message, ping_message, AnnounceData, NetMessage, PeerSink,
};
use crate::node::Basenode;
use crate::registry::BasenodeManager;
use credo_core::{
    collateral_amount, ChainView, OutPoint, SpendableOutput, WalletBridge, MIN_CONFIRMATIONS,
    PROTOCOL_VERSION,
};
use credo_crypto::{sign_message, verify_message, KeyPair};
use log::{info, warn};

/// Where the local node stands in the activation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPhase {
    NotProcessed,
    Capable,
    NotCapable,
    Stopped,
    InputTooNew,
    SyncInProgress,
    RemotelyEnabled,
}

/// State of this process's own basenode, if it runs one
pub struct ActiveBasenode {
    pub phase: ActivationPhase,
    pub not_capable_reason: String,
    /// Own collateral reference once determined
    pub vin: Option<OutPoint>,
    /// Own externally visible address once determined
    pub service_addr: Option<String>,
    configured_addr: Option<String>,
    configured_outpoint: Option<OutPoint>,
    operating_key: Option<KeyPair>,
    is_basenode: bool,
}

impl ActiveBasenode {
    /// A process not configured as a basenode; every pass is a no-op
    pub fn disabled() -> Self {
        ActiveBasenode {
            phase: ActivationPhase::NotProcessed,
            not_capable_reason: String::new(),
            vin: None,
            service_addr: None,
            configured_addr: None,
            configured_outpoint: None,
            operating_key: None,
            is_basenode: false,
        }
    }

    pub fn new(
        operating_privkey: &str,
        configured_addr: Option<String>,
        configured_outpoint: Option<OutPoint>,
    ) -> Result<Self> {
        let operating_key = KeyPair::from_private_key_hex(operating_privkey)
            .map_err(|e| BasenodeError::SignFailed(e.to_string()))?;

        Ok(ActiveBasenode {
            phase: ActivationPhase::NotProcessed,
            not_capable_reason: String::new(),
            vin: None,
            service_addr: None,
            configured_addr,
            configured_outpoint,
            operating_key: Some(operating_key),
            is_basenode: true,
        })
    }

    pub fn is_basenode(&self) -> bool {
        self.is_basenode
    }

    pub fn operating_key(&self) -> Option<&KeyPair> {
        self.operating_key.as_ref()
    }

    pub fn operating_pubkey(&self) -> Option<String> {
        self.operating_key.as_ref().map(|k| k.public_key_hex())
    }

    pub fn matches_operating_key(&self, pubkey2: &str) -> bool {
        self.operating_pubkey().as_deref() == Some(pubkey2)
    }

    fn not_capable(&mut self, reason: &str) {
        self.phase = ActivationPhase::NotCapable;
        self.not_capable_reason = reason.to_string();
        warn!("active: not capable: {reason}");
    }

    /// Periodic pass, invoked on a new block or timer tick. Local
    /// capability failures set a reason and retry next pass; nothing
    /// here is fatal.
    pub fn manage_status(
        &mut self,
        registry: &mut BasenodeManager,
        chain: &dyn ChainView,
        wallet: &mut dyn WalletBridge,
        sink: &mut dyn PeerSink,
        now: i64,
    ) {
        if !self.is_basenode {
            return;
        }

        if chain.is_syncing() {
            self.phase = ActivationPhase::SyncInProgress;
            info!("active: sync in progress, waiting to start");
            return;
        }

        if matches!(
            self.phase,
            ActivationPhase::InputTooNew
                | ActivationPhase::NotCapable
                | ActivationPhase::SyncInProgress
        ) {
            self.phase = ActivationPhase::NotProcessed;
        }

        if self.phase == ActivationPhase::NotProcessed {
            let addr = match self.configured_addr.clone().or_else(|| sink.local_address()) {
                Some(a) => a,
                None => {
                    self.not_capable(
                        "Can't detect external address. Set the basenode address option.",
                    );
                    return;
                }
            };
            self.service_addr = Some(addr);

            if wallet.is_locked() {
                self.not_capable("Wallet is locked.");
                return;
            }

            self.phase = ActivationPhase::NotCapable;
            self.not_capable_reason = "Unknown. Check the log for more information.".to_string();

            let amount = collateral_amount(chain.tip_height());
            let mut candidates = wallet.collateral_outputs(amount);
            let output = match &self.configured_outpoint {
                Some(wanted) => candidates.into_iter().find(|c| c.outpoint == *wanted),
                None => {
                    if candidates.is_empty() {
                        None
                    } else {
                        Some(candidates.remove(0))
                    }
                }
            };

            let Some(output) = output else {
                self.not_capable("Could not find suitable coins!");
                return;
            };

            let confirmations = chain.confirmations(&output.outpoint);
            if confirmations < MIN_CONFIRMATIONS {
                self.not_capable_reason = format!(
                    "Input must have at least {MIN_CONFIRMATIONS} confirmations - {confirmations} confirmations"
                );
                self.phase = ActivationPhase::InputTooNew;
                info!("active: {}", self.not_capable_reason);
                return;
            }

            wallet.lock_coin(&output.outpoint);
            self.vin = Some(output.outpoint);

            match self.register(&output, registry, sink, now) {
                Ok(()) => {
                    info!("active: is capable basenode!");
                    self.phase = ActivationPhase::Capable;
                    self.not_capable_reason.clear();
                }
                Err(e) => warn!("active: error on register: {e}"),
            }
            return;
        }

        if matches!(
            self.phase,
            ActivationPhase::Capable | ActivationPhase::RemotelyEnabled
        ) {
            if let Err(e) = self.send_ping(registry, sink, now, false) {
                warn!("active: error on ping: {e}");
            }
        }
    }

    /// Sign and broadcast the announce, inserting our own record
    fn register(
        &mut self,
        output: &SpendableOutput,
        registry: &mut BasenodeManager,
        sink: &mut dyn PeerSink,
        now: i64,
    ) -> Result<()> {
        let operating = self
            .operating_key
            .as_ref()
            .ok_or(BasenodeError::NoOperatingKey)?;
        let addr = self
            .service_addr
            .clone()
            .ok_or(BasenodeError::NotRunning)?;

        let owner_key = KeyPair::from_private_key_hex(&output.owner_privkey)
            .map_err(|e| BasenodeError::SignFailed(e.to_string()))?;
        let operating_pubkey = operating.public_key_hex();

        let sig_time = now;
        let message = announce_message(
            &addr,
            sig_time,
            &output.owner_pubkey,
            &operating_pubkey,
            PROTOCOL_VERSION,
        );
        let sig = sign_message(&owner_key, &message);

        // defensive self-check before anything hits the wire
        if !verify_message(&output.owner_pubkey, &message, &sig) {
            return Err(BasenodeError::VerifyFailed("announce self-check".to_string()));
        }

        if registry.find(&output.outpoint).is_none() {
            info!(
                "active: adding to basenode list, service {} vin {}",
                addr, output.outpoint
            );
            let mut mn = Basenode::new(
                addr.clone(),
                output.outpoint,
                output.owner_pubkey.clone(),
                sig.clone(),
                sig_time,
                operating_pubkey.clone(),
                PROTOCOL_VERSION,
            );
            mn.update_last_seen(sig_time);
            registry.add(mn);
        }

        sink.broadcast(&NetMessage::Announce(AnnounceData {
            vin: output.outpoint,
            addr,
            sig,
            sig_time,
            pubkey: output.owner_pubkey.clone(),
            pubkey2: operating_pubkey,
            count: -1,
            index: -1,
            last_seen: sig_time,
            protocol_version: PROTOCOL_VERSION,
        }));

        Ok(())
    }

    /// Broadcast a liveness ping for the running basenode
    pub fn send_ping(
        &mut self,
        registry: &mut BasenodeManager,
        sink: &mut dyn PeerSink,
        now: i64,
        stop: bool,
    ) -> Result<()> {
        if !matches!(
            self.phase,
            ActivationPhase::Capable | ActivationPhase::RemotelyEnabled
        ) {
            return Err(BasenodeError::NotRunning);
        }

        self.do_ping(registry, sink, now, stop)
    }

    fn do_ping(
        &mut self,
        registry: &mut BasenodeManager,
        sink: &mut dyn PeerSink,
        now: i64,
        stop: bool,
    ) -> Result<()> {
        let operating = self
            .operating_key
            .as_ref()
            .ok_or(BasenodeError::NoOperatingKey)?;
        let vin = self.vin.ok_or(BasenodeError::NotRunning)?;
        let addr = self
            .service_addr
            .clone()
            .ok_or(BasenodeError::NotRunning)?;

        let sig_time = now;
        let message = ping_message(&addr, sig_time, stop);
        let sig = sign_message(operating, &message);

        if !verify_message(&operating.public_key_hex(), &message, &sig) {
            return Err(BasenodeError::VerifyFailed("ping self-check".to_string()));
        }

        if registry.find(&vin).is_some() {
            if stop {
                registry.remove(&vin);
            } else if let Some(mn) = registry.find_mut(&vin) {
                mn.update_last_seen(now);
            }
        } else {
            // not in the list: stop pinging until the next announce pass
            let reason = format!(
                "Basenode list doesn't include our basenode {vin}, shutting down pinging"
            );
            self.not_capable(&reason);
            return Err(BasenodeError::NotFound(vin.to_string()));
        }

        sink.broadcast(&NetMessage::Ping {
            vin,
            sig,
            sig_time,
            stop,
        });

        Ok(())
    }

    /// Stop the running basenode: release the collateral lock and tell
    /// the network to drop our record.
    pub fn stop(
        &mut self,
        registry: &mut BasenodeManager,
        wallet: &mut dyn WalletBridge,
        sink: &mut dyn PeerSink,
        now: i64,
    ) -> Result<()> {
        if !matches!(
            self.phase,
            ActivationPhase::Capable | ActivationPhase::RemotelyEnabled
        ) {
            return Err(BasenodeError::NotRunning);
        }

        self.phase = ActivationPhase::Stopped;

        if let Some(vin) = self.vin {
            wallet.unlock_coin(&vin);
        }

        self.do_ping(registry, sink, now, true)
    }

    /// Hot/cold pattern: a watcher holding only the operating key adopts
    /// the collateral reference announced by a third party.
    pub fn enable_hot_cold(&mut self, vin: OutPoint, addr: String) -> bool {
        if !self.is_basenode {
            return false;
        }

        self.phase = ActivationPhase::RemotelyEnabled;
        self.vin = Some(vin);
        self.service_addr = Some(addr);

        info!("active: remotely enabled, the cold daemon may shut down");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MockChain, MockSink, MockWallet};
    use credo_core::Hash256;
    use credo_core::CURRENT_COLLATERAL;

    const NOW: i64 = 1_700_000_000;

    fn spendable(seed: &[u8], value: u64) -> SpendableOutput {
        let owner = KeyPair::generate();
        SpendableOutput {
            outpoint: OutPoint::new(Hash256::sha256(seed), 0),
            value,
            owner_pubkey: owner.public_key_hex(),
            owner_privkey: owner.private_key_hex(),
        }
    }

    fn active() -> ActiveBasenode {
        let key = KeyPair::generate();
        ActiveBasenode::new(
            &key.private_key_hex(),
            Some("198.51.100.5:9340".to_string()),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_disabled_process_does_nothing() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();

        let mut active = ActiveBasenode::disabled();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);

        assert_eq!(active.phase, ActivationPhase::NotProcessed);
        assert!(sink.broadcasts.is_empty());
    }

    #[test]
    fn test_sync_in_progress_parks() {
        let mut registry = BasenodeManager::new();
        let mut chain = MockChain::with_height(200_000);
        chain.syncing = true;
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        assert_eq!(active.phase, ActivationPhase::SyncInProgress);
        assert!(sink.broadcasts.is_empty());
    }

    #[test]
    fn test_no_coins_is_retryable_not_capable() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        assert_eq!(active.phase, ActivationPhase::NotCapable);
        assert!(active.not_capable_reason.contains("suitable coins"));

        // next pass retries from scratch
        wallet.outputs.push(spendable(b"coin", CURRENT_COLLATERAL));
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW + 60);
        assert_eq!(active.phase, ActivationPhase::Capable);
    }

    #[test]
    fn test_locked_wallet_blocks_activation() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        wallet.locked = true;
        let mut sink = MockSink::new();

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        assert_eq!(active.phase, ActivationPhase::NotCapable);
        assert_eq!(active.not_capable_reason, "Wallet is locked.");
    }

    #[test]
    fn test_young_input_parks_as_input_too_new() {
        let mut registry = BasenodeManager::new();
        let mut chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();

        let output = spendable(b"coin", CURRENT_COLLATERAL);
        chain.set_confirmations(&output.outpoint, 3);
        wallet.outputs.push(output);

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        assert_eq!(active.phase, ActivationPhase::InputTooNew);
        assert!(active.not_capable_reason.contains("confirmations"));
    }

    #[test]
    fn test_activation_announces_and_locks_coin() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();

        let output = spendable(b"coin", CURRENT_COLLATERAL);
        let outpoint = output.outpoint;
        wallet.outputs.push(output);

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);

        assert_eq!(active.phase, ActivationPhase::Capable);
        assert_eq!(active.vin, Some(outpoint));
        assert!(wallet.locked_coins.contains(&outpoint));
        assert!(registry.find(&outpoint).is_some());
        assert!(matches!(
            sink.broadcasts.as_slice(),
            [NetMessage::Announce(_)]
        ));

        // the announce carries a self-verifying signature
        if let NetMessage::Announce(a) = &sink.broadcasts[0] {
            let msg = announce_message(&a.addr, a.sig_time, &a.pubkey, &a.pubkey2, a.protocol_version);
            assert!(verify_message(&a.pubkey, &msg, &a.sig));
            assert_eq!(a.count, -1);
        }
    }

    #[test]
    fn test_capable_node_pings_each_pass() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();
        wallet.outputs.push(spendable(b"coin", CURRENT_COLLATERAL));

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW + 60);

        assert!(matches!(
            sink.broadcasts.last(),
            Some(NetMessage::Ping { stop: false, .. })
        ));

        // ping refreshed our own last-seen
        let vin = active.vin.unwrap();
        assert_eq!(registry.find(&vin).unwrap().last_seen, NOW + 60);
    }

    #[test]
    fn test_stop_removes_record_and_unlocks() {
        let mut registry = BasenodeManager::new();
        let chain = MockChain::with_height(200_000);
        let mut wallet = MockWallet::new();
        let mut sink = MockSink::new();
        wallet.outputs.push(spendable(b"coin", CURRENT_COLLATERAL));

        let mut active = active();
        active.manage_status(&mut registry, &chain, &mut wallet, &mut sink, NOW);
        let vin = active.vin.unwrap();

        active
            .stop(&mut registry, &mut wallet, &mut sink, NOW + 120)
            .unwrap();

        assert_eq!(active.phase, ActivationPhase::Stopped);
        assert!(registry.find(&vin).is_none());
        assert!(!wallet.locked_coins.contains(&vin));
        assert!(matches!(
            sink.broadcasts.last(),
            Some(NetMessage::Ping { stop: true, .. })
        ));

        // a stopped node refuses further pings
        assert!(active
            .send_ping(&mut registry, &mut sink, NOW + 180, false)
            .is_err());
    }

    #[test]
    fn test_hot_cold_adoption() {
        let mut active = active();
        let vin = OutPoint::new(Hash256::sha256(b"cold-collateral"), 1);

        assert!(active.enable_hot_cold(vin, "203.0.113.77:9340".to_string()));
        assert_eq!(active.phase, ActivationPhase::RemotelyEnabled);
        assert_eq!(active.vin, Some(vin));

        assert!(!ActiveBasenode::disabled().enable_hot_cold(vin, "x".to_string()));
    }
}
