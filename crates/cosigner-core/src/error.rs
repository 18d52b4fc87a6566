//! Error types for cosigner operations

use crate::hrs::Hrs;
use crate::types::CosignerId;
use thiserror::Error;

/// Result type alias for cosigner operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating or producing a signature
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed sign bytes or wire fields
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Invalid cluster configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cosigner ID not part of the cluster
    #[error("Unknown cosigner: {0}")]
    UnknownCosigner(CosignerId),

    /// Source signature on an ephemeral part did not verify
    #[error("Authentication failed for part from cosigner {source_id}: {reason}")]
    Authentication { source_id: CosignerId, reason: String },

    /// A different ephemeral part was already committed for this HRS and source
    #[error("Nonce reuse: cosigner {source_id} already committed a different part for {hrs}")]
    NonceReuse { source_id: CosignerId, hrs: Hrs },

    /// Too few ephemeral parts to reach the signing threshold
    #[error("Insufficient contributions: required {required}, got {actual}")]
    InsufficientContributions { required: usize, actual: usize },

    /// Request for an HRS older than the last one signed
    #[error("Height regression: requested {requested}, last signed {last}")]
    HeightRegression { requested: Hrs, last: Hrs },

    /// Same HRS as the last signature but different sign bytes
    #[error("Conflicting sign bytes for {0}")]
    ConflictingSignBytes(Hrs),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Transport error talking to a peer
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout waiting for a peer
    #[error("Timeout waiting for {0}")]
    Timeout(String),

    /// Peer answered but had no contribution to offer
    #[error("No contribution from cosigner {0}")]
    NoContribution(CosignerId),

    /// Peer returned an error status
    #[error("Remote error: {0}")]
    Remote(String),

    /// Operation not available on this cosigner variant
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Errors a peer branch absorbs as a missing contribution.
    ///
    /// Nonce reuse is deliberately excluded: it is never downgraded.
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout(_)
                | Error::NoContribution(_)
                | Error::Remote(_)
                | Error::Authentication { .. }
                | Error::Decoding(_)
                | Error::Deserialization(_)
                | Error::Crypto(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
