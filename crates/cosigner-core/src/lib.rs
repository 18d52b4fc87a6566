//! # Cosigner Core
//!
//! Signing-round orchestration for an m-of-n threshold cosigner cluster.
//!
//! Every cosigner holds one Shamir share of a split key. To sign a consensus
//! vote it needs one ephemeral nonce contribution per participating peer for
//! the vote's height/round/step. This crate provides:
//! - HRS parsing and the sign-bytes layout
//! - The [`Cosigner`] capability trait and its local implementation
//! - The [`EphemeralPartStore`] that enforces the nonce-reuse invariant
//! - The [`SigningOrchestrator`] that fans out to peers under per-peer timeouts
//!
//! ## Example
//!
//! ```rust,ignore
//! use cosigner_core::{SigningOrchestrator, OrchestratorConfig, SignRequest};
//!
//! let orchestrator = SigningOrchestrator::new(local, peers, OrchestratorConfig::default());
//! let response = orchestrator.sign(&SignRequest { sign_bytes }).await?;
//! ```

pub mod cosigner;
pub mod crypto;
pub mod error;
pub mod hrs;
pub mod key;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use cosigner::{Cosigner, LocalCosigner};
pub use error::{Error, Result};
pub use hrs::{Hrs, SignBytes, Step};
pub use key::{deal_key_shares, CosignerKey, PeerIdentity};
pub use orchestrator::{OrchestratorConfig, OrchestratorStats, SigningOrchestrator, StatsSnapshot};
pub use store::EphemeralPartStore;
pub use types::{
    CosignerId, EphemeralSecretPart, GetEphemeralPartRequest, HasEphemeralPartRequest,
    HasEphemeralPartResponse, SetEphemeralPartRequest, SignRequest, SignResponse,
};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default per-peer timeout for the ephemeral part exchange
pub const DEFAULT_PEER_TIMEOUT_MS: u64 = 1000;

/// Default number of HRS entries the ephemeral part store keeps
pub const DEFAULT_STORE_CAPACITY: usize = 256;
