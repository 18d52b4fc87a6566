//! Cosigner key material and trusted-dealer share generation

use crate::crypto::{point_to_bytes, random_scalar, scalar_from_bytes, Polynomial};
use crate::types::CosignerId;
use crate::{Error, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use std::path::Path;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Public identity of one cluster member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    pub id: CosignerId,
    /// Ed25519 key that signs ephemeral parts
    #[serde(with = "hex_bytes")]
    pub verify_key: [u8; 32],
    /// X25519 key that ephemeral parts are encrypted to
    #[serde(with = "hex_bytes")]
    pub encryption_key: [u8; 32],
}

/// Everything one cosigner process needs to participate in signing
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct CosignerKey {
    /// This cosigner's Shamir index
    pub id: CosignerId,

    /// Shares required to sign
    pub threshold: usize,

    /// Cluster size
    pub total: usize,

    /// Shamir share of the group secret
    #[serde(with = "hex_bytes")]
    pub secret_share: [u8; 32],

    /// Compressed group public key
    #[zeroize(skip)]
    #[serde(with = "hex::serde")]
    pub group_public_key: Vec<u8>,

    /// Ed25519 identity secret
    #[serde(with = "hex_bytes")]
    pub identity_secret: [u8; 32],

    /// X25519 encryption secret
    #[serde(with = "hex_bytes")]
    pub encryption_secret: [u8; 32],

    /// Public identity of every member, this one included
    #[zeroize(skip)]
    pub cluster: Vec<PeerIdentity>,
}

impl CosignerKey {
    /// Check internal consistency of a loaded key
    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::InvalidConfig("cosigner id must be positive".into()));
        }
        if self.threshold < 2 || self.threshold > self.total {
            return Err(Error::InvalidConfig(format!(
                "threshold {} invalid for {} cosigners",
                self.threshold, self.total
            )));
        }
        if self.cluster.len() != self.total {
            return Err(Error::InvalidConfig(format!(
                "cluster lists {} members, expected {}",
                self.cluster.len(),
                self.total
            )));
        }
        if self.peer(self.id).is_none() {
            return Err(Error::UnknownCosigner(self.id));
        }
        Ok(())
    }

    pub fn secret_share(&self) -> Result<Scalar> {
        scalar_from_bytes(&self.secret_share)
    }

    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.identity_secret)
    }

    pub fn encryption_secret(&self) -> StaticSecret {
        StaticSecret::from(self.encryption_secret)
    }

    pub fn peer(&self, id: CosignerId) -> Option<&PeerIdentity> {
        self.cluster.iter().find(|p| p.id == id)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidConfig(format!("reading {}: {}", path.display(), e)))?;
        let key: CosignerKey =
            serde_json::from_str(&json).map_err(|e| Error::Deserialization(e.to_string()))?;
        key.validate()?;
        Ok(key)
    }
}

/// Split a fresh group key into `total` shares with a trusted dealer
pub fn deal_key_shares(threshold: usize, total: usize) -> Result<Vec<CosignerKey>> {
    if threshold < 2 {
        return Err(Error::InvalidConfig("Threshold must be at least 2".into()));
    }
    if threshold > total {
        return Err(Error::InvalidConfig(
            "Threshold cannot exceed number of cosigners".into(),
        ));
    }

    let secret = random_scalar();
    let polynomial = Polynomial::with_secret(secret, threshold);
    let group_public_key = point_to_bytes(&(ProjectivePoint::GENERATOR * secret));

    let identities: Vec<([u8; 32], [u8; 32])> =
        (0..total).map(|_| (rand::random(), rand::random())).collect();

    let cluster: Vec<PeerIdentity> = identities
        .iter()
        .zip(1..)
        .map(|((identity, encryption), id)| PeerIdentity {
            id,
            verify_key: VerifyingKey::from(&SigningKey::from_bytes(identity)).to_bytes(),
            encryption_key: X25519Public::from(&StaticSecret::from(*encryption)).to_bytes(),
        })
        .collect();

    let keys = identities
        .into_iter()
        .zip(1..)
        .map(|((identity_secret, encryption_secret), id)| CosignerKey {
            id,
            threshold,
            total,
            secret_share: polynomial.evaluate(id).to_bytes().into(),
            group_public_key: group_public_key.clone(),
            identity_secret,
            encryption_secret,
            cluster: cluster.clone(),
        })
        .collect();

    Ok(keys)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_key_shares() {
        let keys = deal_key_shares(2, 3).unwrap();

        assert_eq!(keys.len(), 3);
        for (key, id) in keys.iter().zip(1..) {
            assert_eq!(key.id, id);
            key.validate().unwrap();
        }
        assert_eq!(keys[0].cluster, keys[2].cluster);
    }

    #[test]
    fn test_key_json() {
        let keys = deal_key_shares(2, 2).unwrap();
        let json = serde_json::to_string(&keys[1]).unwrap();
        let restored: CosignerKey = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, 2);
        assert_eq!(restored.secret_share, keys[1].secret_share);
        assert_eq!(restored.cluster, keys[1].cluster);
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(deal_key_shares(1, 3).is_err());
        assert!(deal_key_shares(4, 3).is_err());
    }
}
