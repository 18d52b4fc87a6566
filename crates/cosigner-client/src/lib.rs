//! Remote Cosigner Client
//!
//! [`RemoteCosigner`] implements the cosigner trait by calling a peer's RPC
//! service. Every call is an independent HTTP round-trip and may fail on its own.

use cosigner_core::cosigner::{async_trait, Cosigner};
use cosigner_core::{
    CosignerId, EphemeralSecretPart, Error, GetEphemeralPartRequest, HasEphemeralPartRequest,
    HasEphemeralPartResponse, Result, SetEphemeralPartRequest, SignRequest, SignResponse,
};
use cosigner_rpc::{
    EphemeralPartRpcRequest, EphemeralPartRpcResponse, ErrorBody, SignRpcRequest, SignRpcResponse,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, instrument};

/// HTTP proxy to a peer cosigner
pub struct RemoteCosigner {
    /// Peer's Shamir index
    id: CosignerId,
    /// HTTP client
    client: Client,
    /// Peer service URL
    url: String,
    /// Request timeout
    timeout: Duration,
}

impl RemoteCosigner {
    /// Create a new remote cosigner
    pub fn new(id: CosignerId, url: &str) -> Self {
        Self {
            id,
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Parse a successful body, or turn an error status into [`Error::Remote`]
async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => String::from("no error body"),
        };
        return Err(Error::Remote(format!("{}: {}", status, message)));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Deserialization(e.to_string()))
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else {
        Error::Network(e.to_string())
    }
}

#[async_trait]
impl Cosigner for RemoteCosigner {
    fn id(&self) -> CosignerId {
        self.id
    }

    #[instrument(skip(self), fields(peer = self.id))]
    async fn get_ephemeral_secret_part(
        &self,
        req: &GetEphemeralPartRequest,
    ) -> Result<EphemeralSecretPart> {
        let response = self
            .client
            .post(format!("{}/v1/ephemeral-part", self.url))
            .json(&EphemeralPartRpcRequest::from(req))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let body: EphemeralPartRpcResponse = read_response(response).await?;
        let part = EphemeralSecretPart::from(body);
        if part.is_empty() {
            return Err(Error::NoContribution(self.id));
        }

        debug!(hrs = %req.hrs, "Received ephemeral part");
        Ok(part)
    }

    fn set_ephemeral_secret_part(&self, _req: &SetEphemeralPartRequest) -> Result<()> {
        Err(Error::Unsupported(
            "ephemeral parts are stored by the local cosigner",
        ))
    }

    /// A proxy keeps no ephemeral state, so nothing is ever held
    fn has_ephemeral_secret_part(
        &self,
        _req: &HasEphemeralPartRequest,
    ) -> Result<HasEphemeralPartResponse> {
        Ok(HasEphemeralPartResponse::default())
    }

    #[instrument(skip(self, req), fields(peer = self.id))]
    async fn sign(&self, req: &SignRequest) -> Result<SignResponse> {
        let response = self
            .client
            .post(format!("{}/v1/sign", self.url))
            .json(&SignRpcRequest {
                sign_bytes: req.sign_bytes.clone(),
            })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let body: SignRpcResponse = read_response(response).await?;
        Ok(body.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cosigner_core::{Hrs, Step};

    #[tokio::test]
    async fn test_unreachable_peer() {
        // port 9 (discard) on localhost is almost never listening
        let peer = RemoteCosigner::new(2, "http://127.0.0.1:9/")
            .with_timeout(Duration::from_millis(500));
        assert_eq!(peer.url(), "http://127.0.0.1:9");

        let err = peer
            .get_ephemeral_secret_part(&GetEphemeralPartRequest {
                requester_id: 1,
                hrs: Hrs::new(1, 0, Step::Propose),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Network(_) | Error::Timeout(_)));
    }

    #[test]
    fn test_local_only_operations() {
        let peer = RemoteCosigner::new(3, "http://127.0.0.1:1");
        let hrs = Hrs::new(1, 0, Step::Propose);

        let has = peer
            .has_ephemeral_secret_part(&HasEphemeralPartRequest { id: 1, hrs })
            .unwrap();
        assert!(!has.exists);
        assert!(peer
            .set_ephemeral_secret_part(&SetEphemeralPartRequest {
                hrs,
                part: EphemeralSecretPart::default(),
            })
            .is_err());
    }
}
