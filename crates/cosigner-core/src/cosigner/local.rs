//! Cosigner backed by a local key share

use super::{async_trait, Cosigner};
use crate::crypto::{
    challenge, decrypt_share, encrypt_share, part_digest, point_from_bytes, point_to_bytes,
};
use crate::hrs::{Hrs, SignBytes};
use crate::key::CosignerKey;
use crate::store::{EphemeralPartStore, StoredPart};
use crate::types::{
    CosignerId, EphemeralSecretPart, GetEphemeralPartRequest, HasEphemeralPartRequest,
    HasEphemeralPartResponse, SetEphemeralPartRequest, SignRequest, SignResponse,
};
use crate::{Error, Result};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use k256::{ProjectivePoint, Scalar};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use x25519_dalek::StaticSecret;

/// Last vote this cosigner produced a share for
struct SignedVote {
    hrs: Hrs,
    sign_bytes: Vec<u8>,
    response: SignResponse,
}

#[derive(Default)]
struct SignState {
    last: Option<SignedVote>,
}

/// Authoritative cosigner: holds the key share and the ephemeral part store
pub struct LocalCosigner {
    key: CosignerKey,
    secret_share: Scalar,
    signing_key: SigningKey,
    encryption_secret: StaticSecret,
    store: Arc<EphemeralPartStore>,
    /// Held across issuance and signing so pruning never races a new issue
    sign_state: Mutex<SignState>,
}

impl LocalCosigner {
    pub fn new(key: CosignerKey, store: Arc<EphemeralPartStore>) -> Result<Self> {
        key.validate()?;
        Ok(Self {
            secret_share: key.secret_share()?,
            signing_key: key.signing_key(),
            encryption_secret: key.encryption_secret(),
            key,
            store,
            sign_state: Mutex::new(SignState::default()),
        })
    }

    pub fn threshold(&self) -> usize {
        self.key.threshold
    }

    pub fn group_public_key(&self) -> &[u8] {
        &self.key.group_public_key
    }

    pub fn store(&self) -> &Arc<EphemeralPartStore> {
        &self.store
    }

    fn check_not_regressed(state: &SignState, hrs: Hrs) -> Result<()> {
        match &state.last {
            Some(last) if hrs < last.hrs => Err(Error::HeightRegression {
                requested: hrs,
                last: last.hrs,
            }),
            _ => Ok(()),
        }
    }

    fn verify_part(&self, hrs: &Hrs, part: &EphemeralSecretPart) -> Result<()> {
        let source = self
            .key
            .peer(part.source_id)
            .ok_or(Error::UnknownCosigner(part.source_id))?;
        let auth_error = |reason: String| Error::Authentication {
            source_id: part.source_id,
            reason,
        };

        let verifying_key =
            VerifyingKey::from_bytes(&source.verify_key).map_err(|e| auth_error(e.to_string()))?;
        let signature =
            Signature::from_slice(&part.source_sig).map_err(|e| auth_error(e.to_string()))?;
        let digest = part_digest(
            hrs,
            part.source_id,
            self.id(),
            &part.source_ephemeral_public_key,
            &part.encrypted_share_part,
        );

        verifying_key
            .verify(&digest, &signature)
            .map_err(|e| auth_error(e.to_string()))
    }
}

#[async_trait]
impl Cosigner for LocalCosigner {
    fn id(&self) -> CosignerId {
        self.key.id
    }

    #[instrument(skip(self), fields(cosigner = self.key.id))]
    async fn get_ephemeral_secret_part(
        &self,
        req: &GetEphemeralPartRequest,
    ) -> Result<EphemeralSecretPart> {
        let own_id = self.id();
        if req.requester_id == own_id {
            return Err(Error::InvalidConfig(
                "cosigner cannot request its own ephemeral part".into(),
            ));
        }
        let recipient = self
            .key
            .peer(req.requester_id)
            .ok_or(Error::UnknownCosigner(req.requester_id))?;

        let state = self.sign_state.lock().await;
        Self::check_not_regressed(&state, req.hrs)?;

        let hrs = req.hrs;
        let part = self.store.get_or_issue(
            hrs,
            own_id,
            self.key.threshold,
            req.requester_id,
            |polynomial| {
                let ephemeral_public_key = point_to_bytes(&polynomial.commitment());
                let encrypted_share_part = encrypt_share(
                    &self.encryption_secret,
                    &recipient.encryption_key,
                    &hrs,
                    own_id,
                    req.requester_id,
                    &polynomial.evaluate(req.requester_id),
                )?;
                let digest = part_digest(
                    &hrs,
                    own_id,
                    req.requester_id,
                    &ephemeral_public_key,
                    &encrypted_share_part,
                );

                Ok(EphemeralSecretPart {
                    source_id: own_id,
                    source_ephemeral_public_key: ephemeral_public_key,
                    encrypted_share_part,
                    source_sig: self.signing_key.sign(&digest).to_bytes().to_vec(),
                })
            },
        )?;
        drop(state);

        Ok(part)
    }

    fn set_ephemeral_secret_part(&self, req: &SetEphemeralPartRequest) -> Result<()> {
        let part = &req.part;
        if part.source_id == self.id() {
            return Err(Error::Authentication {
                source_id: part.source_id,
                reason: "part claims to originate from this cosigner".into(),
            });
        }

        if let Err(e) = self.verify_part(&req.hrs, part) {
            warn!(
                kind = "authentication",
                source = part.source_id,
                hrs = %req.hrs,
                error = %e,
                "Rejected ephemeral part"
            );
            return Err(e);
        }

        point_from_bytes(&part.source_ephemeral_public_key)
            .map_err(|e| Error::Decoding(format!("ephemeral public key: {}", e)))?;
        let source = self
            .key
            .peer(part.source_id)
            .ok_or(Error::UnknownCosigner(part.source_id))?;
        let share = decrypt_share(
            &self.encryption_secret,
            &source.encryption_key,
            &req.hrs,
            part.source_id,
            self.id(),
            &part.encrypted_share_part,
        )?;

        let stored = StoredPart {
            ephemeral_public_key: part.source_ephemeral_public_key.clone(),
            share,
        };
        if let Err(e) = self.store.insert(req.hrs, part.source_id, stored) {
            error!(
                kind = "nonce_reuse",
                source = part.source_id,
                hrs = %req.hrs,
                "Conflicting ephemeral part rejected"
            );
            return Err(e);
        }

        debug!(source = part.source_id, hrs = %req.hrs, "Stored ephemeral part");
        Ok(())
    }

    fn has_ephemeral_secret_part(
        &self,
        req: &HasEphemeralPartRequest,
    ) -> Result<HasEphemeralPartResponse> {
        let ephemeral_public_key = self.store.lookup(req.id, &req.hrs);
        Ok(HasEphemeralPartResponse {
            exists: ephemeral_public_key.is_some(),
            ephemeral_public_key,
        })
    }

    async fn check_hrs(&self, hrs: Hrs) -> Result<()> {
        let state = self.sign_state.lock().await;
        Self::check_not_regressed(&state, hrs)
    }

    #[instrument(skip(self, req), fields(cosigner = self.key.id))]
    async fn sign(&self, req: &SignRequest) -> Result<SignResponse> {
        let sign_bytes = SignBytes::decode(&req.sign_bytes)?;
        let hrs = sign_bytes.hrs;

        let mut state = self.sign_state.lock().await;
        Self::check_not_regressed(&state, hrs)?;
        if let Some(last) = state.last.as_ref().filter(|last| last.hrs == hrs) {
            if last.sign_bytes == req.sign_bytes {
                debug!(%hrs, "Returning cached signature share");
                return Ok(last.response.clone());
            }
            return Err(Error::ConflictingSignBytes(hrs));
        }

        self.store
            .ensure_own_contribution(hrs, self.id(), self.key.threshold);
        let contributions = self.store.contributions(&hrs);
        if contributions.len() < self.key.threshold {
            return Err(Error::InsufficientContributions {
                required: self.key.threshold,
                actual: contributions.len(),
            });
        }

        let mut nonce_share = Scalar::ZERO;
        let mut nonce_public = ProjectivePoint::IDENTITY;
        for (_, part) in &contributions {
            nonce_share += part.share;
            nonce_public += point_from_bytes(&part.ephemeral_public_key)?;
        }

        let nonce_public = point_to_bytes(&nonce_public);
        let e = challenge(&nonce_public, &self.key.group_public_key, &req.sign_bytes);
        let s = nonce_share + e * self.secret_share;

        let mut signature = nonce_public;
        signature.extend_from_slice(&s.to_bytes());

        let response = SignResponse {
            timestamp: sign_bytes.timestamp(),
            signature,
        };
        state.last = Some(SignedVote {
            hrs,
            sign_bytes: req.sign_bytes.clone(),
            response: response.clone(),
        });
        drop(state);

        self.store.prune_below(&hrs);

        info!(
            %hrs,
            contributors = ?contributions.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            "Produced signature share"
        );
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{combine_signature_shares, verify_signature};
    use crate::hrs::Step;
    use crate::key::deal_key_shares;

    fn cluster(threshold: usize, total: usize) -> Vec<LocalCosigner> {
        deal_key_shares(threshold, total)
            .unwrap()
            .into_iter()
            .map(|key| LocalCosigner::new(key, Arc::new(EphemeralPartStore::new())).unwrap())
            .collect()
    }

    fn sign_bytes(height: i64, payload: &[u8]) -> Vec<u8> {
        SignBytes {
            hrs: Hrs::new(height, 0, Step::Precommit),
            timestamp_nanos: 1_000,
            payload: payload.to_vec(),
        }
        .encode()
    }

    async fn exchange(from: &LocalCosigner, to: &LocalCosigner, hrs: Hrs) -> Result<()> {
        let part = from
            .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                requester_id: to.id(),
                hrs,
            })
            .await?;
        to.set_ephemeral_secret_part(&SetEphemeralPartRequest { hrs, part })
    }

    #[tokio::test]
    async fn test_get_part_is_idempotent() {
        let cosigners = cluster(2, 3);
        let req = GetEphemeralPartRequest {
            requester_id: 2,
            hrs: Hrs::new(100, 0, Step::Precommit),
        };

        let first = cosigners[0].get_ephemeral_secret_part(&req).await.unwrap();
        let second = cosigners[0].get_ephemeral_secret_part(&req).await.unwrap();
        assert_eq!(first, second);

        let other = cosigners[0]
            .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                requester_id: 3,
                ..req
            })
            .await
            .unwrap();
        assert_eq!(other.source_ephemeral_public_key, first.source_ephemeral_public_key);
        assert_ne!(other.encrypted_share_part, first.encrypted_share_part);
    }

    #[tokio::test]
    async fn test_set_and_has_part() {
        let cosigners = cluster(2, 3);
        let hrs = Hrs::new(100, 0, Step::Precommit);
        let has = HasEphemeralPartRequest { id: 1, hrs };

        assert!(!cosigners[1].has_ephemeral_secret_part(&has).unwrap().exists);
        exchange(&cosigners[0], &cosigners[1], hrs).await.unwrap();

        let resp = cosigners[1].has_ephemeral_secret_part(&has).unwrap();
        assert!(resp.exists);
        assert_eq!(resp.ephemeral_public_key.unwrap().len(), 33);

        // storing the same part again is a no-op
        exchange(&cosigners[0], &cosigners[1], hrs).await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_part_rejected() {
        let cosigners = cluster(2, 3);
        let hrs = Hrs::new(100, 0, Step::Precommit);

        let mut part = cosigners[0]
            .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                requester_id: 2,
                hrs,
            })
            .await
            .unwrap();
        part.source_sig[0] ^= 0xff;

        let err = cosigners[1]
            .set_ephemeral_secret_part(&SetEphemeralPartRequest { hrs, part })
            .unwrap_err();
        assert!(matches!(err, Error::Authentication { source_id: 1, .. }));
        assert!(
            !cosigners[1]
                .has_ephemeral_secret_part(&HasEphemeralPartRequest { id: 1, hrs })
                .unwrap()
                .exists
        );
    }

    #[tokio::test]
    async fn test_regenerated_part_rejected() {
        let keys = deal_key_shares(2, 3).unwrap();
        let first = LocalCosigner::new(keys[0].clone(), Arc::new(EphemeralPartStore::new())).unwrap();
        // same key, fresh store: draws a new polynomial for the same HRS
        let restarted =
            LocalCosigner::new(keys[0].clone(), Arc::new(EphemeralPartStore::new())).unwrap();
        let receiver = LocalCosigner::new(keys[1].clone(), Arc::new(EphemeralPartStore::new())).unwrap();
        let hrs = Hrs::new(100, 0, Step::Precommit);

        exchange(&first, &receiver, hrs).await.unwrap();
        let before = receiver
            .has_ephemeral_secret_part(&HasEphemeralPartRequest { id: 1, hrs })
            .unwrap();

        let err = exchange(&restarted, &receiver, hrs).await.unwrap_err();
        assert!(matches!(err, Error::NonceReuse { source_id: 1, .. }));

        let after = receiver
            .has_ephemeral_secret_part(&HasEphemeralPartRequest { id: 1, hrs })
            .unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_threshold_enforced() {
        let cosigners = cluster(2, 3);
        let req = SignRequest {
            sign_bytes: sign_bytes(100, b"vote"),
        };

        let err = cosigners[0].sign(&req).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientContributions {
                required: 2,
                actual: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_shares_combine_to_valid_signature() {
        let cosigners = cluster(2, 3);
        let bytes = sign_bytes(100, b"vote");
        let hrs = SignBytes::decode(&bytes).unwrap().hrs;

        exchange(&cosigners[1], &cosigners[0], hrs).await.unwrap();
        exchange(&cosigners[0], &cosigners[1], hrs).await.unwrap();

        let req = SignRequest { sign_bytes: bytes.clone() };
        let a = cosigners[0].sign(&req).await.unwrap();
        let b = cosigners[1].sign(&req).await.unwrap();
        assert_eq!(a.timestamp.timestamp_nanos_opt(), Some(1_000));

        let signature =
            combine_signature_shares(&[(1, a.signature), (2, b.signature)]).unwrap();
        verify_signature(cosigners[0].group_public_key(), &bytes, &signature).unwrap();
    }

    #[tokio::test]
    async fn test_double_sign_protection() {
        let cosigners = cluster(2, 2);
        let bytes = sign_bytes(50, b"vote");
        let hrs = SignBytes::decode(&bytes).unwrap().hrs;
        exchange(&cosigners[1], &cosigners[0], hrs).await.unwrap();

        let req = SignRequest { sign_bytes: bytes };
        let first = cosigners[0].sign(&req).await.unwrap();
        let again = cosigners[0].sign(&req).await.unwrap();
        assert_eq!(first, again);

        let conflicting = SignRequest {
            sign_bytes: sign_bytes(50, b"other"),
        };
        assert!(matches!(
            cosigners[0].sign(&conflicting).await,
            Err(Error::ConflictingSignBytes(_))
        ));

        assert!(cosigners[0].check_hrs(hrs).await.is_ok());
        assert!(matches!(
            cosigners[0].check_hrs(Hrs::new(49, 0, Step::Precommit)).await,
            Err(Error::HeightRegression { .. })
        ));

        let older = SignRequest {
            sign_bytes: sign_bytes(49, b"vote"),
        };
        assert!(matches!(
            cosigners[0].sign(&older).await,
            Err(Error::HeightRegression { .. })
        ));
        assert!(matches!(
            cosigners[0]
                .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                    requester_id: 2,
                    hrs: Hrs::new(49, 0, Step::Precommit),
                })
                .await,
            Err(Error::HeightRegression { .. })
        ));
    }

    #[tokio::test]
    async fn test_far_future_requests_do_not_grow_store() {
        let keys = deal_key_shares(2, 2).unwrap();
        let store = Arc::new(EphemeralPartStore::with_capacity(16));
        let local = LocalCosigner::new(keys[0].clone(), Arc::clone(&store)).unwrap();
        let peer = LocalCosigner::new(keys[1].clone(), Arc::new(EphemeralPartStore::new())).unwrap();

        for h in 0..1000 {
            local
                .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                    requester_id: 2,
                    hrs: Hrs::new(i64::MAX - h, 0, Step::Precommit),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.len(), 16);

        let bytes = sign_bytes(5, b"vote");
        let hrs = SignBytes::decode(&bytes).unwrap().hrs;
        exchange(&peer, &local, hrs).await.unwrap();
        local.sign(&SignRequest { sign_bytes: bytes }).await.unwrap();

        assert!(store.len() <= 16);
        assert_eq!(store.contributions(&hrs).len(), 2);
    }
}
