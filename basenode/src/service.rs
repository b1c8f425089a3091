//! Coarse-locked subsystem facade
//!
//! A single logical worker reacts to two triggers: inbound P2P messages
//! and new-block/timer ticks. Each component sits behind its own mutex;
//! locks are always taken in declaration order and no component calls
//! back into the service, so the ordering is acyclic. Block and disk
//! I/O (the election engine, snapshot writes) happens outside the
//! registry lock.

use crate::active::ActiveBasenode;
use crate::messages::{process_message, NetContext, NetMessage, PeerId, PeerSink};
use crate::payments::BasenodePayments;
use crate::registry::BasenodeManager;
use crate::scanning::{BasenodeScanning, LivenessProbe};
use credo_core::{ChainView, WalletBridge, MAINNET_MAGIC};
use parking_lot::Mutex;
use std::path::Path;

pub struct BasenodeService {
    pub registry: Mutex<BasenodeManager>,
    pub payments: Mutex<BasenodePayments>,
    pub scanning: Mutex<BasenodeScanning>,
    pub active: Mutex<ActiveBasenode>,
    network_magic: [u8; 4],
}

impl BasenodeService {
    pub fn new(active: ActiveBasenode) -> Self {
        BasenodeService {
            registry: Mutex::new(BasenodeManager::new()),
            payments: Mutex::new(BasenodePayments::default()),
            scanning: Mutex::new(BasenodeScanning::new()),
            active: Mutex::new(active),
            network_magic: MAINNET_MAGIC,
        }
    }

    /// Dispatch one inbound message under the subsystem locks
    pub fn handle_message(
        &self,
        peer: &PeerId,
        msg: NetMessage,
        chain: &dyn ChainView,
        sink: &mut dyn PeerSink,
        now: i64,
    ) {
        let mut registry = self.registry.lock();
        let mut payments = self.payments.lock();
        let mut scanning = self.scanning.lock();
        let mut active = self.active.lock();

        let mut ctx = NetContext {
            registry: &mut registry,
            payments: &mut payments,
            scanning: &mut scanning,
            active: &mut active,
            chain,
            sink,
            now,
        };
        process_message(&mut ctx, peer, msg);
    }

    /// Periodic pass on a new block (or timer tick while idle)
    pub fn on_new_block(
        &self,
        chain: &dyn ChainView,
        wallet: &mut dyn WalletBridge,
        probe: &dyn LivenessProbe,
        sink: &mut dyn PeerSink,
        now: i64,
    ) {
        {
            let mut registry = self.registry.lock();
            registry.check_and_remove(chain, now);

            let mut active = self.active.lock();
            active.manage_status(&mut registry, chain, wallet, sink, now);

            let mut scanning = self.scanning.lock();
            scanning.do_checks(&mut registry, &active, chain, probe, sink, now);
            scanning.clean(now);
        }

        let mut registry = self.registry.lock();
        let mut payments = self.payments.lock();
        let registry_size = registry.count();
        payments.process_block(chain.tip_height(), &mut registry, chain, sink, now);
        payments.clean_payment_list(chain.tip_height(), registry_size);
    }

    /// Persist the registry snapshot
    pub fn dump_registry(&self, path: &Path) -> crate::error::Result<()> {
        self.registry.lock().dump(path, self.network_magic)
    }

    /// Restore the registry snapshot, failing closed to an empty table
    pub fn load_registry(&self, path: &Path, chain: &dyn ChainView, now: i64) {
        let mut loaded = BasenodeManager::load_or_default(path, self.network_magic);
        loaded.check_and_remove(chain, now);
        *self.registry.lock() = loaded;
    }
}
