//! Cosigner HTTP service

use crate::wire::{
    EphemeralPartRpcRequest, EphemeralPartRpcResponse, ErrorBody, SignRpcRequest, SignRpcResponse,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cosigner_core::{Error, SignRequest, SigningOrchestrator, StatsSnapshot};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, ThisError)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
}

pub struct CosignerServerConfig {
    /// `host:port`, optionally prefixed with `tcp://`
    pub listen_address: String,
    pub orchestrator: Arc<SigningOrchestrator>,
}

/// Serves `Sign` to the consensus engine and `GetEphemeralSecretPart` to peers
pub struct CosignerServer {
    listen_address: String,
    orchestrator: Arc<SigningOrchestrator>,
}

impl CosignerServer {
    pub fn new(config: CosignerServerConfig) -> Self {
        Self {
            listen_address: config.listen_address,
            orchestrator: config.orchestrator,
        }
    }

    pub fn router(orchestrator: Arc<SigningOrchestrator>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/v1/sign", post(sign))
            .route("/v1/ephemeral-part", post(ephemeral_part))
            .route("/v1/stats", get(stats))
            .layer(TraceLayer::new_for_http())
            .with_state(orchestrator)
    }

    /// Bind and serve in the background; returns once the socket is accepting
    pub async fn start(self) -> Result<RunningServer, ServerError> {
        let address = parse_listen_address(&self.listen_address)?;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;

        let app = Self::router(self.orchestrator);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "Failed to serve");
            }
        });

        info!(address = %local_addr, "Cosigner RPC listening");

        Ok(RunningServer {
            local_addr,
            shutdown: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle to a server started with [`CosignerServer::start`]
pub struct RunningServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Server task ended abnormally");
        }
    }
}

fn parse_listen_address(address: &str) -> Result<SocketAddr, ServerError> {
    let stripped = address.strip_prefix("tcp://").unwrap_or(address);
    stripped
        .parse()
        .map_err(|_| ServerError::InvalidAddress(address.to_string()))
}

/// Error returned from the sign endpoint
struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Decoding(_) => StatusCode::BAD_REQUEST,
            Error::HeightRegression { .. } | Error::ConflictingSignBytes(_) => StatusCode::CONFLICT,
            Error::InsufficientContributions { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "cosigner-rpc",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn sign(
    State(orchestrator): State<Arc<SigningOrchestrator>>,
    Json(req): Json<SignRpcRequest>,
) -> Result<Json<SignRpcResponse>, ApiError> {
    let response = orchestrator
        .sign(&SignRequest {
            sign_bytes: req.sign_bytes,
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Sign request failed");
            ApiError(e)
        })?;
    Ok(Json(response.into()))
}

async fn ephemeral_part(
    State(orchestrator): State<Arc<SigningOrchestrator>>,
    Json(req): Json<EphemeralPartRpcRequest>,
) -> Json<EphemeralPartRpcResponse> {
    match req.to_request() {
        Ok(request) => Json(orchestrator.serve_ephemeral_secret_part(&request).await.into()),
        Err(e) => {
            warn!(requester = req.requester_id, error = %e, "Malformed ephemeral part request");
            Json(EphemeralPartRpcResponse::default())
        }
    }
}

async fn stats(State(orchestrator): State<Arc<SigningOrchestrator>>) -> Json<StatsSnapshot> {
    Json(orchestrator.stats())
}
