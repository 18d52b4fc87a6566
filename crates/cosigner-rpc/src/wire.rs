//! JSON request/response bodies; byte fields are base64

use chrono::{DateTime, Utc};
use cosigner_core::{
    CosignerId, EphemeralSecretPart, GetEphemeralPartRequest, Hrs, Result, SignResponse,
};
use serde::{Deserialize, Serialize};

/// `POST /v1/sign`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRpcRequest {
    #[serde(with = "b64")]
    pub sign_bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRpcResponse {
    pub timestamp: DateTime<Utc>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

impl From<SignResponse> for SignRpcResponse {
    fn from(resp: SignResponse) -> Self {
        Self {
            timestamp: resp.timestamp,
            signature: resp.signature,
        }
    }
}

impl From<SignRpcResponse> for SignResponse {
    fn from(resp: SignRpcResponse) -> Self {
        Self {
            timestamp: resp.timestamp,
            signature: resp.signature,
        }
    }
}

/// `POST /v1/ephemeral-part`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralPartRpcRequest {
    pub requester_id: CosignerId,
    pub height: i64,
    pub round: i64,
    pub step: u8,
}

impl EphemeralPartRpcRequest {
    pub fn to_request(&self) -> Result<GetEphemeralPartRequest> {
        Ok(GetEphemeralPartRequest {
            requester_id: self.requester_id,
            hrs: Hrs::from_parts(self.height, self.round, self.step)?,
        })
    }
}

impl From<&GetEphemeralPartRequest> for EphemeralPartRpcRequest {
    fn from(req: &GetEphemeralPartRequest) -> Self {
        Self {
            requester_id: req.requester_id,
            height: req.hrs.height,
            round: req.hrs.round,
            step: req.hrs.step.as_u8(),
        }
    }
}

/// Every field defaults, so `{}` decodes as "no contribution"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralPartRpcResponse {
    #[serde(default)]
    pub source_id: CosignerId,
    #[serde(default, with = "b64")]
    pub source_ephemeral_public_key: Vec<u8>,
    #[serde(default, with = "b64")]
    pub encrypted_share_part: Vec<u8>,
    #[serde(default, with = "b64")]
    pub source_sig: Vec<u8>,
}

impl From<EphemeralSecretPart> for EphemeralPartRpcResponse {
    fn from(part: EphemeralSecretPart) -> Self {
        Self {
            source_id: part.source_id,
            source_ephemeral_public_key: part.source_ephemeral_public_key,
            encrypted_share_part: part.encrypted_share_part,
            source_sig: part.source_sig,
        }
    }
}

impl From<EphemeralPartRpcResponse> for EphemeralSecretPart {
    fn from(resp: EphemeralPartRpcResponse) -> Self {
        Self {
            source_id: resp.source_id,
            source_ephemeral_public_key: resp.source_ephemeral_public_key,
            encrypted_share_part: resp.encrypted_share_part,
            source_sig: resp.source_sig,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
