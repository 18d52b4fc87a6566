//! Cosigner capability trait

use crate::hrs::Hrs;
use crate::types::{
    CosignerId, EphemeralSecretPart, GetEphemeralPartRequest, HasEphemeralPartRequest,
    HasEphemeralPartResponse, SetEphemeralPartRequest, SignRequest, SignResponse,
};
use crate::Result;

pub use ::async_trait::async_trait;

mod local;

pub use local::LocalCosigner;

/// One member of an m-of-n threshold signing cluster.
///
/// Implemented by [`LocalCosigner`], which owns a key share, and by network
/// proxies to peer processes. Orchestration code only ever sees this trait.
#[async_trait]
pub trait Cosigner: Send + Sync {
    /// Shamir index of this cosigner
    fn id(&self) -> CosignerId;

    /// This cosigner's nonce contribution for `req.hrs`, encrypted for the requester
    async fn get_ephemeral_secret_part(
        &self,
        req: &GetEphemeralPartRequest,
    ) -> Result<EphemeralSecretPart>;

    /// Authenticate and store a contribution received from a peer.
    ///
    /// Local state only; never performs network I/O.
    fn set_ephemeral_secret_part(&self, req: &SetEphemeralPartRequest) -> Result<()>;

    /// Whether a contribution from `req.id` for `req.hrs` is already held.
    ///
    /// Local state only; never performs network I/O.
    fn has_ephemeral_secret_part(&self, req: &HasEphemeralPartRequest)
        -> Result<HasEphemeralPartResponse>;

    /// Refuse an HRS this cosigner will never sign.
    ///
    /// Proxies keep no sign state, so the default accepts everything.
    async fn check_hrs(&self, _hrs: Hrs) -> Result<()> {
        Ok(())
    }

    /// Produce a signature share over `req.sign_bytes`
    async fn sign(&self, req: &SignRequest) -> Result<SignResponse>;
}
