//! Signing-round orchestration
//!
//! [`SigningOrchestrator::sign`] collects the ephemeral parts it can from every
//! peer, each branch bounded by its own timeout, then asks the local cosigner
//! for a signature share. [`SigningOrchestrator::serve_ephemeral_secret_part`]
//! answers the same request when it comes from a peer.

use crate::cosigner::Cosigner;
use crate::hrs::{unpack_hrs, Hrs};
use crate::types::{
    CosignerId, EphemeralSecretPart, GetEphemeralPartRequest, HasEphemeralPartRequest,
    SetEphemeralPartRequest, SignRequest, SignResponse,
};
use crate::{Error, Result, DEFAULT_PEER_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling on one peer's ephemeral part exchange
    pub peer_timeout: Duration,
    /// Keep every peer branch open for its whole window, even after it finished
    pub hold_full_window: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            peer_timeout: Duration::from_millis(DEFAULT_PEER_TIMEOUT_MS),
            hold_full_window: true,
        }
    }
}

/// Counters for outcomes that are otherwise only visible in logs
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    rounds: AtomicU64,
    contributions_collected: AtomicU64,
    contributions_already_held: AtomicU64,
    peer_timeouts: AtomicU64,
    peer_failures: AtomicU64,
    authentication_failures: AtomicU64,
    nonce_conflicts: AtomicU64,
    soft_misses_served: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub rounds: u64,
    pub contributions_collected: u64,
    pub contributions_already_held: u64,
    pub peer_timeouts: u64,
    pub peer_failures: u64,
    pub authentication_failures: u64,
    pub nonce_conflicts: u64,
    pub soft_misses_served: u64,
}

impl OrchestratorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            contributions_collected: self.contributions_collected.load(Ordering::Relaxed),
            contributions_already_held: self.contributions_already_held.load(Ordering::Relaxed),
            peer_timeouts: self.peer_timeouts.load(Ordering::Relaxed),
            peer_failures: self.peer_failures.load(Ordering::Relaxed),
            authentication_failures: self.authentication_failures.load(Ordering::Relaxed),
            nonce_conflicts: self.nonce_conflicts.load(Ordering::Relaxed),
            soft_misses_served: self.soft_misses_served.load(Ordering::Relaxed),
        }
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// How one peer branch settled
#[derive(Debug)]
enum PeerOutcome {
    AlreadyHeld,
    Collected,
    TimedOut,
    Failed(Error),
}

/// Coordinates signing rounds for one local cosigner and its peers
pub struct SigningOrchestrator {
    local: Arc<dyn Cosigner>,
    peers: Vec<Arc<dyn Cosigner>>,
    config: OrchestratorConfig,
    stats: OrchestratorStats,
}

impl SigningOrchestrator {
    pub fn new(
        local: Arc<dyn Cosigner>,
        peers: Vec<Arc<dyn Cosigner>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            local,
            peers,
            config,
            stats: OrchestratorStats::default(),
        }
    }

    pub fn local(&self) -> &Arc<dyn Cosigner> {
        &self.local
    }

    pub fn peer_ids(&self) -> Vec<CosignerId> {
        self.peers.iter().map(|p| p.id()).collect()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Gather ephemeral parts from all peers, then produce the local signature share.
    ///
    /// Only a decoding failure or the local cosigner's own refusal (too few
    /// contributions, double-sign protection) is returned to the caller; peer
    /// failures just shrink the set of contributions.
    #[instrument(skip(self, req), fields(cosigner = self.local.id()))]
    pub async fn sign(&self, req: &SignRequest) -> Result<SignResponse> {
        let hrs = unpack_hrs(&req.sign_bytes)?;
        // sign repeats this check; this one only avoids a wasted fan-out
        self.local.check_hrs(hrs).await?;
        bump(&self.stats.rounds);

        let mut tasks = JoinSet::new();
        for peer in &self.peers {
            let local = Arc::clone(&self.local);
            let peer = Arc::clone(peer);
            let config = self.config.clone();

            tasks.spawn(async move {
                let peer_id = peer.id();
                let deadline = Instant::now() + config.peer_timeout;

                let outcome =
                    match timeout_at(deadline, exchange(local.as_ref(), peer.as_ref(), hrs)).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(e)) => PeerOutcome::Failed(e),
                        Err(_) => PeerOutcome::TimedOut,
                    };

                // a held part completes its branch at once
                let settled = matches!(outcome, PeerOutcome::AlreadyHeld);
                if config.hold_full_window && !settled {
                    sleep_until(deadline).await;
                }
                (peer_id, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer_id, outcome)) => self.record(peer_id, hrs, outcome),
                Err(e) => error!(error = %e, "Peer task aborted"),
            }
        }

        let response = self.local.sign(req).await?;
        info!(%hrs, "Signing round complete");
        Ok(response)
    }

    /// Answer a peer's request for our contribution.
    ///
    /// Local failures become an empty part so the caller sees a soft miss
    /// rather than a transport error.
    #[instrument(skip(self), fields(cosigner = self.local.id()))]
    pub async fn serve_ephemeral_secret_part(
        &self,
        req: &GetEphemeralPartRequest,
    ) -> EphemeralSecretPart {
        match self.local.get_ephemeral_secret_part(req).await {
            Ok(part) => part,
            Err(e) => {
                bump(&self.stats.soft_misses_served);
                warn!(
                    requester = req.requester_id,
                    hrs = %req.hrs,
                    error = %e,
                    "Serving empty ephemeral part"
                );
                EphemeralSecretPart::default()
            }
        }
    }

    fn record(&self, peer_id: CosignerId, hrs: Hrs, outcome: PeerOutcome) {
        match outcome {
            PeerOutcome::AlreadyHeld => {
                bump(&self.stats.contributions_already_held);
                debug!(peer = peer_id, %hrs, "Ephemeral part already held");
            }
            PeerOutcome::Collected => {
                bump(&self.stats.contributions_collected);
                debug!(peer = peer_id, %hrs, "Collected ephemeral part");
            }
            PeerOutcome::TimedOut => {
                bump(&self.stats.peer_timeouts);
                warn!(peer = peer_id, %hrs, "Peer timed out");
            }
            PeerOutcome::Failed(e @ Error::Authentication { .. }) => {
                bump(&self.stats.authentication_failures);
                warn!(kind = "authentication", peer = peer_id, %hrs, error = %e, "Discarded peer part");
            }
            PeerOutcome::Failed(e @ Error::NonceReuse { .. }) => {
                bump(&self.stats.nonce_conflicts);
                error!(kind = "nonce_reuse", peer = peer_id, %hrs, error = %e, "Peer sent conflicting part");
            }
            PeerOutcome::Failed(e) if e.is_peer_fault() => {
                bump(&self.stats.peer_failures);
                warn!(peer = peer_id, %hrs, error = %e, "Peer exchange failed");
            }
            PeerOutcome::Failed(e) => {
                bump(&self.stats.peer_failures);
                error!(peer = peer_id, %hrs, error = %e, "Local failure during peer exchange");
            }
        }
    }
}

/// One peer branch: skip if already held, otherwise fetch and store
async fn exchange(local: &dyn Cosigner, peer: &dyn Cosigner, hrs: Hrs) -> Result<PeerOutcome> {
    let peer_id = peer.id();
    let held = local.has_ephemeral_secret_part(&HasEphemeralPartRequest { id: peer_id, hrs })?;
    if held.exists {
        return Ok(PeerOutcome::AlreadyHeld);
    }

    let part = peer
        .get_ephemeral_secret_part(&GetEphemeralPartRequest {
            requester_id: local.id(),
            hrs,
        })
        .await?;
    if part.is_empty() {
        return Err(Error::NoContribution(peer_id));
    }
    if part.source_id != peer_id {
        return Err(Error::Authentication {
            source_id: part.source_id,
            reason: format!("part relayed by cosigner {}", peer_id),
        });
    }

    local.set_ephemeral_secret_part(&SetEphemeralPartRequest { hrs, part })?;
    Ok(PeerOutcome::Collected)
}
