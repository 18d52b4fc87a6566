//! Per-HRS store of ephemeral nonce contributions
//!
//! Every mutation for an HRS happens under that HRS's map entry lock, so
//! concurrent fan-out tasks and inbound peer requests cannot interleave a
//! check-then-insert for the same (HRS, source).
//!
//! The number of HRS entries is capped. When a new HRS arrives at capacity,
//! the highest other HRS is evicted; the signing frontier is always the lowest
//! live entry, so far-future requests only ever displace each other.

use crate::crypto::{point_to_bytes, Polynomial};
use crate::hrs::Hrs;
use crate::types::{CosignerId, EphemeralSecretPart};
use crate::{Error, Result, DEFAULT_STORE_CAPACITY};
use dashmap::DashMap;
use k256::Scalar;
use std::collections::{BTreeMap, HashMap};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

/// A decrypted, authenticated contribution
#[derive(Clone)]
pub struct StoredPart {
    /// Source's nonce commitment (compressed point)
    pub ephemeral_public_key: Vec<u8>,
    /// Source's polynomial evaluated at our index
    pub share: Scalar,
}

impl StoredPart {
    fn same_as(&self, other: &StoredPart) -> bool {
        self.ephemeral_public_key == other.ephemeral_public_key
            && bool::from(self.share.ct_eq(&other.share))
    }
}

#[derive(Default)]
struct HrsEntry {
    /// Our own nonce polynomial, drawn once per HRS
    polynomial: Option<Polynomial>,
    /// Parts already handed out, by recipient
    issued: HashMap<CosignerId, EphemeralSecretPart>,
    /// Contributions usable for our signature share, by source
    received: BTreeMap<CosignerId, StoredPart>,
}

/// Shared, internally synchronized ephemeral part store
pub struct EphemeralPartStore {
    entries: DashMap<Hrs, HrsEntry>,
    capacity: usize,
}

impl Default for EphemeralPartStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_STORE_CAPACITY)
    }
}

impl EphemeralPartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding at most `capacity` HRS entries (never fewer than two)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(2),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Evict the highest HRS other than `hrs` until a new entry fits.
    ///
    /// Must be called without holding any entry guard.
    fn make_room(&self, hrs: &Hrs) {
        if self.entries.contains_key(hrs) {
            return;
        }
        while self.entries.len() >= self.capacity {
            let victim = self
                .entries
                .iter()
                .map(|entry| *entry.key())
                .filter(|key| key != hrs)
                .max();
            match victim {
                Some(victim) => {
                    self.entries.remove(&victim);
                    warn!(evicted = %victim, incoming = %hrs, "Ephemeral part store full");
                }
                None => return,
            }
        }
    }

    /// Return the part already issued to `recipient` for `hrs`, or issue one.
    ///
    /// Our polynomial for `hrs` is drawn on first use and our own evaluation
    /// is recorded as a contribution. `issue` runs at most once per
    /// (hrs, recipient).
    pub fn get_or_issue<F>(
        &self,
        hrs: Hrs,
        own_id: CosignerId,
        threshold: usize,
        recipient: CosignerId,
        issue: F,
    ) -> Result<EphemeralSecretPart>
    where
        F: FnOnce(&Polynomial) -> Result<EphemeralSecretPart>,
    {
        self.make_room(&hrs);
        let mut entry = self.entries.entry(hrs).or_default();
        ensure_polynomial(&mut entry, own_id, threshold);

        if let Some(part) = entry.issued.get(&recipient) {
            return Ok(part.clone());
        }

        let polynomial = entry
            .polynomial
            .as_ref()
            .ok_or_else(|| Error::Internal("nonce polynomial missing".into()))?;
        let part = issue(polynomial)?;
        entry.issued.insert(recipient, part.clone());

        debug!(%hrs, recipient, "Issued ephemeral part");
        Ok(part)
    }

    /// Make sure our own contribution exists for `hrs`
    pub fn ensure_own_contribution(&self, hrs: Hrs, own_id: CosignerId, threshold: usize) {
        self.make_room(&hrs);
        let mut entry = self.entries.entry(hrs).or_default();
        ensure_polynomial(&mut entry, own_id, threshold);
    }

    /// Nonce commitment stored for `source` at `hrs`, if any
    pub fn lookup(&self, source: CosignerId, hrs: &Hrs) -> Option<Vec<u8>> {
        self.entries
            .get(hrs)
            .and_then(|entry| entry.received.get(&source).map(|p| p.ephemeral_public_key.clone()))
    }

    /// Store a contribution.
    ///
    /// Storing the identical contribution twice is a no-op; a different one
    /// for an already-filled (hrs, source) slot is rejected.
    pub fn insert(&self, hrs: Hrs, source: CosignerId, part: StoredPart) -> Result<()> {
        self.make_room(&hrs);
        let mut entry = self.entries.entry(hrs).or_default();

        match entry.received.get(&source) {
            Some(existing) if existing.same_as(&part) => Ok(()),
            Some(_) => Err(Error::NonceReuse {
                source_id: source,
                hrs,
            }),
            None => {
                entry.received.insert(source, part);
                Ok(())
            }
        }
    }

    /// Snapshot of the contributions for `hrs`, ordered by source
    pub fn contributions(&self, hrs: &Hrs) -> Vec<(CosignerId, StoredPart)> {
        self.entries
            .get(hrs)
            .map(|entry| {
                entry
                    .received
                    .iter()
                    .map(|(id, part)| (*id, part.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop every entry strictly older than `hrs`
    pub fn prune_below(&self, hrs: &Hrs) {
        self.entries.retain(|key, _| key >= hrs);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn ensure_polynomial(entry: &mut HrsEntry, own_id: CosignerId, threshold: usize) {
    if entry.polynomial.is_some() {
        return;
    }
    let polynomial = Polynomial::random(threshold);
    entry.received.insert(
        own_id,
        StoredPart {
            ephemeral_public_key: point_to_bytes(&polynomial.commitment()),
            share: polynomial.evaluate(own_id),
        },
    );
    entry.polynomial = Some(polynomial);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::random_scalar;
    use crate::hrs::Step;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Barrier;

    fn part(share: Scalar) -> StoredPart {
        StoredPart {
            ephemeral_public_key: vec![2; 33],
            share,
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = EphemeralPartStore::new();
        let hrs = Hrs::new(1, 0, Step::Propose);
        let share = random_scalar();

        store.insert(hrs, 2, part(share)).unwrap();
        store.insert(hrs, 2, part(share)).unwrap();

        assert_eq!(store.contributions(&hrs).len(), 1);
        assert!(store.lookup(2, &hrs).is_some());
    }

    #[test]
    fn test_conflicting_insert_rejected() {
        let store = EphemeralPartStore::new();
        let hrs = Hrs::new(1, 0, Step::Propose);
        let share = random_scalar();

        store.insert(hrs, 2, part(share)).unwrap();
        let err = store.insert(hrs, 2, part(random_scalar())).unwrap_err();
        assert!(matches!(err, Error::NonceReuse { source_id: 2, .. }));

        let stored = store.contributions(&hrs);
        assert_eq!(stored[0].1.share, share);
    }

    #[test]
    fn test_issue_runs_once_per_recipient() {
        let store = EphemeralPartStore::new();
        let hrs = Hrs::new(7, 1, Step::Prevote);
        let mut calls = 0;

        for _ in 0..2 {
            store
                .get_or_issue(hrs, 1, 2, 3, |poly| {
                    calls += 1;
                    Ok(EphemeralSecretPart {
                        source_id: 1,
                        source_ephemeral_public_key: point_to_bytes(&poly.commitment()),
                        encrypted_share_part: vec![1],
                        source_sig: vec![2],
                    })
                })
                .unwrap();
        }

        assert_eq!(calls, 1);
        // own contribution recorded alongside the issued part
        assert!(store.lookup(1, &hrs).is_some());
    }

    #[test]
    fn test_prune_below() {
        let store = EphemeralPartStore::new();
        for height in 1..=3 {
            store.ensure_own_contribution(Hrs::new(height, 0, Step::Precommit), 1, 2);
        }

        store.prune_below(&Hrs::new(2, 0, Step::Precommit));
        assert_eq!(store.len(), 2);
        assert!(store.lookup(1, &Hrs::new(1, 0, Step::Precommit)).is_none());
    }

    #[test]
    fn test_far_future_entries_bounded() {
        let store = EphemeralPartStore::with_capacity(8);
        for h in 0..1000 {
            store.ensure_own_contribution(Hrs::new(i64::MAX - h, 0, Step::Propose), 1, 2);
        }
        assert_eq!(store.len(), 8);

        let current = Hrs::new(5, 0, Step::Precommit);
        store.ensure_own_contribution(current, 1, 2);
        store.insert(current, 2, part(random_scalar())).unwrap();
        assert_eq!(store.len(), 8);
        assert_eq!(store.contributions(&current).len(), 2);

        // later far-future requests displace each other, never the current round
        for h in 1000..1100 {
            store.ensure_own_contribution(Hrs::new(i64::MAX - h, 0, Step::Propose), 1, 2);
        }
        assert_eq!(store.len(), 8);
        assert_eq!(store.contributions(&current).len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts_for_one_slot() {
        const TASKS: usize = 16;
        let store = Arc::new(EphemeralPartStore::new());
        let barrier = Arc::new(Barrier::new(TASKS));
        let hrs = Hrs::new(3, 1, Step::Prevote);

        let mut tasks = Vec::new();
        for _ in 0..TASKS {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move {
                let share = random_scalar();
                barrier.wait().await;
                store.insert(hrs, 2, part(share)).map(|_| share)
            }));
        }

        let mut accepted = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(share) => accepted.push(share),
                Err(e) => assert!(matches!(e, Error::NonceReuse { source_id: 2, .. })),
            }
        }

        assert_eq!(accepted.len(), 1);
        let stored = store.contributions(&hrs);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1.share, accepted[0]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_issue_for_one_recipient() {
        const TASKS: usize = 16;
        let store = Arc::new(EphemeralPartStore::new());
        let barrier = Arc::new(Barrier::new(TASKS));
        let issued = Arc::new(AtomicUsize::new(0));
        let hrs = Hrs::new(3, 1, Step::Prevote);

        let mut tasks = Vec::new();
        for _ in 0..TASKS {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let issued = Arc::clone(&issued);
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                store.get_or_issue(hrs, 1, 2, 3, |poly| {
                    issued.fetch_add(1, Ordering::SeqCst);
                    Ok(EphemeralSecretPart {
                        source_id: 1,
                        source_ephemeral_public_key: point_to_bytes(&poly.commitment()),
                        encrypted_share_part: random_scalar().to_bytes().to_vec(),
                        source_sig: vec![2],
                    })
                })
            }));
        }

        let mut parts = Vec::new();
        for task in tasks {
            parts.push(task.await.unwrap().unwrap());
        }

        assert_eq!(issued.load(Ordering::SeqCst), 1);
        assert!(parts.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.contributions(&hrs).len(), 1);
    }
}
