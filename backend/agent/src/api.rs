//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::{AgentError, RejectReason, Result};
use crate::records::ProjectRecordStore;
use crate::session::{SessionRegistry, WalletAddress};
use crate::subscription::SubscriptionGate;
use crate::trigger::FundraiseTrigger;
use crate::upload::{FilePayload, UploadCoordinator};

pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    pub gate: Arc<SubscriptionGate>,
    pub uploads: Arc<UploadCoordinator>,
    pub trigger: Arc<FundraiseTrigger>,
    pub records: Arc<ProjectRecordStore>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub address: String,
    pub chain_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectRequest {
    pub address: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub signed_tx: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendRequest {
    pub signed_tx: String,
    pub token_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendPrepareQuery {
    pub token_id: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub address: String,
    pub chain_id: u64,
    pub connected_at: String,
}

#[derive(Serialize)]
pub struct DisconnectResponse {
    pub disconnected: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /session/connect`
pub async fn connect(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    let result = async {
        let wallet = WalletAddress::parse(&req.address)?;
        state.registry.connect(wallet, req.chain_id).await
    }
    .await;

    match result {
        Ok(session) => (
            StatusCode::OK,
            Json(SessionResponse {
                address: session.address.to_string(),
                chain_id: session.chain_id,
                connected_at: session.connected_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /session/disconnect`
pub async fn disconnect(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<DisconnectRequest>,
) -> Response {
    match WalletAddress::parse(&req.address) {
        Ok(wallet) => {
            let disconnected = state.registry.disconnect(&wallet).await;
            (StatusCode::OK, Json(DisconnectResponse { disconnected })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /session/:address/subscription`
///
/// Returns the gate state, re-validated against on-chain expiry.
pub async fn subscription_status(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        state.gate.refresh(&session).await
    }
    .await;

    match result {
        Ok(gate) => (StatusCode::OK, Json(gate)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /session/:address/subscribe/prepare`
///
/// Builds the mint transaction (priced by a live `subscriptionCost()` read)
/// for the wallet to sign.
pub async fn prepare_mint(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        state.gate.prepare_mint(&session).await
    }
    .await;

    match result {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /session/:address/subscribe`
pub async fn subscribe(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Json(req): Json<SubscribeRequest>,
) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        state.gate.subscribe(&session, &req.signed_tx).await
    }
    .await;

    match result {
        Ok(gate) => (StatusCode::OK, Json(gate)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /session/:address/extend/prepare?tokenId=N`
pub async fn prepare_extend(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(query): Query<ExtendPrepareQuery>,
) -> Response {
    let result = async {
        lookup(&state, &address).await?;
        state.gate.prepare_extend(query.token_id).await
    }
    .await;

    match result {
        Ok(tx) => (StatusCode::OK, Json(tx)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /session/:address/extend`
pub async fn extend(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Json(req): Json<ExtendRequest>,
) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        state
            .gate
            .extend(&session, &req.signed_tx, req.token_id)
            .await
    }
    .await;

    match result {
        Ok(gate) => (StatusCode::OK, Json(gate)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /session/:address/upload`
///
/// Accepts a single multipart file part and runs it through the upload
/// pipeline.
pub async fn upload_file(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        let file = read_file_part(&mut multipart).await?;
        state.uploads.upload(&session, file).await
    }
    .await;

    match result {
        Ok(asset) => (StatusCode::OK, Json(asset)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /session/:address/process`
pub async fn process(State(state): State<Arc<ApiState>>, Path(address): Path<String>) -> Response {
    let result = async {
        let session = lookup(&state, &address).await?;
        state.trigger.start(&session).await
    }
    .await;

    match result {
        Ok(processing) => (StatusCode::OK, Json(processing)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /projects/:address`
pub async fn get_project(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Response {
    let result = async {
        let wallet = WalletAddress::parse(&address)?;
        state.records.get(&wallet).await
    }
    .await;

    match result {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No project record for {address}"),
            }),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

// ─────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────

async fn lookup(
    state: &ApiState,
    address: &str,
) -> Result<Arc<crate::session::SessionContext>> {
    let wallet = WalletAddress::parse(address)?;
    state.registry.get(&wallet).await
}

async fn read_file_part(multipart: &mut Multipart) -> Result<FilePayload> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AgentError::Validation(format!("Malformed multipart body: {e}")))?
        .ok_or_else(|| AgentError::Validation("Missing file part".to_string()))?;

    let display_name = field
        .file_name()
        .map(str::to_string)
        .unwrap_or_else(|| field.name().unwrap_or("upload").to_string());
    let mime = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let bytes = field
        .bytes()
        .await
        .map_err(|e| AgentError::Validation(format!("Failed to read file part: {e}")))?;

    Ok(FilePayload {
        display_name,
        mime,
        bytes: bytes.to_vec(),
    })
}

fn error_response(err: AgentError) -> Response {
    let status = match &err {
        AgentError::Validation(_) => StatusCode::BAD_REQUEST,
        AgentError::Auth(_) => StatusCode::UNAUTHORIZED,
        AgentError::Rejected(RejectReason::Cooldown) => StatusCode::TOO_MANY_REQUESTS,
        AgentError::Rejected(_) => StatusCode::CONFLICT,
        AgentError::Chain(_)
        | AgentError::Storage(_)
        | AgentError::Webhook(_)
        | AgentError::Http(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}
