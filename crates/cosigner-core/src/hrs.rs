//! Height/round/step signing context and the sign-bytes layout

use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consensus step a vote is cast for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Step {
    Propose = 1,
    Prevote = 2,
    Precommit = 3,
}

impl Step {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Step {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Step::Propose),
            2 => Ok(Step::Prevote),
            3 => Ok(Step::Precommit),
            other => Err(Error::Decoding(format!("unknown step {}", other))),
        }
    }
}

/// Unique coordinate of one consensus decision.
///
/// Ordering is lexicographic over (height, round, step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hrs {
    pub height: i64,
    pub round: i64,
    pub step: Step,
}

impl Hrs {
    pub fn new(height: i64, round: i64, step: Step) -> Self {
        Self {
            height,
            round,
            step,
        }
    }

    /// Build from raw wire fields, validating ranges
    pub fn from_parts(height: i64, round: i64, step: u8) -> Result<Self> {
        if height < 0 {
            return Err(Error::Decoding(format!("negative height {}", height)));
        }
        if round < 0 {
            return Err(Error::Decoding(format!("negative round {}", round)));
        }
        Ok(Self::new(height, round, Step::try_from(step)?))
    }

    /// Fixed-width encoding used for digests and AAD
    pub fn to_bytes(&self) -> [u8; 17] {
        let mut out = [0u8; 17];
        out[..8].copy_from_slice(&self.height.to_be_bytes());
        out[8..16].copy_from_slice(&self.round.to_be_bytes());
        out[16] = self.step.as_u8();
        out
    }
}

impl fmt::Display for Hrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:?}", self.height, self.round, self.step)
    }
}

/// Decoded view of the bytes the consensus engine asks us to sign.
///
/// Layout: `height:i64 BE | round:i64 BE | step:u8 | timestamp_nanos:i64 BE | payload`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignBytes {
    pub hrs: Hrs,
    pub timestamp_nanos: i64,
    pub payload: Vec<u8>,
}

impl SignBytes {
    /// Length of the fixed header
    pub const HEADER_LEN: usize = 25;

    /// Parse sign bytes, failing on truncated or out-of-range input
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_LEN {
            return Err(Error::Decoding(format!(
                "sign bytes too short: {} < {}",
                bytes.len(),
                Self::HEADER_LEN
            )));
        }

        let height = read_i64(&bytes[0..8])?;
        let round = read_i64(&bytes[8..16])?;
        let hrs = Hrs::from_parts(height, round, bytes[16])?;
        let timestamp_nanos = read_i64(&bytes[17..25])?;

        Ok(Self {
            hrs,
            timestamp_nanos,
            payload: bytes[Self::HEADER_LEN..].to_vec(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.hrs.to_bytes());
        out.extend_from_slice(&self.timestamp_nanos.to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.timestamp_nanos)
    }
}

/// Extract only the HRS from sign bytes
pub fn unpack_hrs(bytes: &[u8]) -> Result<Hrs> {
    SignBytes::decode(bytes).map(|sb| sb.hrs)
}

fn read_i64(bytes: &[u8]) -> Result<i64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Decoding("invalid integer width".into()))?;
    Ok(i64::from_be_bytes(array))
}
