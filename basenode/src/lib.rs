//! Credo Basenode Module
//!
//! The collateral-backed service-node subsystem: the peer-announced
//! registry, local activation and liveness pinging, proof-of-service
//! scanning, and the payment-winner ledger. The blockchain, wallet and
//! transport are collaborators reached through the narrow traits in
//! `credo-core`.

pub mod active;
pub mod config;
pub mod error;
pub mod messages;
pub mod node;
pub mod payments;
pub mod registry;
pub mod scanning;
pub mod service;
pub mod testutil;

pub use active::{ActivationPhase, ActiveBasenode};
pub use config::{BasenodeConfig, BasenodeConfigEntry};
pub use error::{BasenodeError, Result};
pub use messages::{process_message, AnnounceData, NetContext, NetMessage, PeerId, PeerSink};
pub use node::{Basenode, BasenodeStatus};
pub use payments::{BasenodePayments, PaymentWinner};
pub use registry::BasenodeManager;
pub use scanning::{BasenodeScanning, LivenessProbe, ScanningError};
pub use service::BasenodeService;

/// Basenode module version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
