//! Cosigner RPC Service
//!
//! HTTP surface of a cosigner process: `Sign` for the local consensus engine
//! and `GetEphemeralSecretPart` for peer cosigners, plus health and stats.

pub mod server;
pub mod wire;

pub use server::{CosignerServer, CosignerServerConfig, RunningServer, ServerError};
pub use wire::{
    EphemeralPartRpcRequest, EphemeralPartRpcResponse, ErrorBody, SignRpcRequest, SignRpcResponse,
};
