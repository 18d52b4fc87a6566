//! Request and response types shared by every cosigner variant

use crate::hrs::Hrs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shamir share index of a cluster member (1, 2, ...)
pub type CosignerId = u32;

/// One source's nonce contribution for one HRS, encrypted for one recipient
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralSecretPart {
    /// Cosigner that generated the part
    pub source_id: CosignerId,
    /// Public commitment to the source's nonce polynomial (compressed point)
    pub source_ephemeral_public_key: Vec<u8>,
    /// Nonce share for the recipient: `nonce || ciphertext`
    pub encrypted_share_part: Vec<u8>,
    /// Ed25519 signature by the source over the part
    pub source_sig: Vec<u8>,
}

impl EphemeralSecretPart {
    /// Whether this is the "no contribution" placeholder
    pub fn is_empty(&self) -> bool {
        self.source_id == 0
            && self.source_ephemeral_public_key.is_empty()
            && self.encrypted_share_part.is_empty()
            && self.source_sig.is_empty()
    }
}

/// Ask a cosigner for its contribution to `hrs`, encrypted for `requester_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetEphemeralPartRequest {
    pub requester_id: CosignerId,
    pub hrs: Hrs,
}

/// Ask whether the part from cosigner `id` for `hrs` is already stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasEphemeralPartRequest {
    pub id: CosignerId,
    pub hrs: Hrs,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HasEphemeralPartResponse {
    pub exists: bool,
    pub ephemeral_public_key: Option<Vec<u8>>,
}

/// Store a part received from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetEphemeralPartRequest {
    pub hrs: Hrs,
    pub part: EphemeralSecretPart,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// Opaque, HRS-encoded bytes from the consensus engine
    pub sign_bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    pub timestamp: DateTime<Utc>,
    /// Signature share: `R (33 bytes) || s_i (32 bytes)`
    pub signature: Vec<u8>,
}
