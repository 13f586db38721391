//! HTTP façade over a node's replication actor.
//!
//! | Mode | Route | Action |
//! |---|---|---|
//! | CRDT | `GET /{key}` | local read |
//! | CRDT | `PUT /{key}` | local write, replicated in the background |
//! | Raft | `GET /{key}` | read of the node's applied state |
//! | Raft | `POST /{key}` | replicated write, answered after commit |
//! | Raft | `DELETE /{key}` | replicated delete, answered after commit |
//!
//! Request bodies are JSON strings (`"value"`); successful reads return the
//! value the same way. A missing key answers `404 Key not found`.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use thiserror::Error;
use tracing::{debug, error};

use crate::crdt::CrdtHandle;
use crate::error::{ClientError, TransportError};
use crate::raft::RaftHandle;

// =============================================================================
// Errors
// =============================================================================

/// Failure of a façade request, mapped onto an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The body is not a JSON string.
    #[error("malformed body: {0}")]
    BadRequest(String),

    /// The key has no value.
    #[error("Key not found")]
    NotFound,

    /// Writes must go to the leader.
    #[error("not the leader")]
    NotLeader,

    /// The replication actor did not answer in time.
    #[error("request timed out")]
    Timeout,

    /// Anything else. Details are logged, not returned.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => ApiError::Timeout,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::NotLeader => ApiError::NotLeader,
            ClientError::Transport(transport) => transport.into(),
            superseded @ ClientError::Superseded { .. } => ApiError::Internal(superseded.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::NotLeader => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(detail) => {
                error!(error = %detail, "request failed");
                return (StatusCode::INTERNAL_SERVER_ERROR, "internal error").into_response();
            }
        };
        (status, self.to_string()).into_response()
    }
}

fn parse_value(body: &[u8]) -> Result<String, ApiError> {
    serde_json::from_slice(body).map_err(|err| ApiError::BadRequest(err.to_string()))
}

// =============================================================================
// CRDT
// =============================================================================

/// Router serving a CRDT node.
pub fn crdt_router(node: CrdtHandle) -> Router {
    Router::new()
        .route("/:key", get(crdt_get).put(crdt_put))
        .with_state(node)
}

async fn crdt_get(
    State(node): State<CrdtHandle>,
    Path(key): Path<String>,
) -> Result<Json<String>, ApiError> {
    node.read(&key).await?.map(Json).ok_or(ApiError::NotFound)
}

async fn crdt_put(
    State(node): State<CrdtHandle>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let value = parse_value(&body)?;
    debug!(key = %key, "crdt write");
    node.write(key, value)?;
    Ok(StatusCode::OK)
}

// =============================================================================
// Raft
// =============================================================================

/// Router serving a Raft node.
pub fn raft_router(node: RaftHandle) -> Router {
    Router::new()
        .route("/:key", get(raft_get).post(raft_post).delete(raft_delete))
        .with_state(node)
}

async fn raft_get(
    State(node): State<RaftHandle>,
    Path(key): Path<String>,
) -> Result<Json<String>, ApiError> {
    node.get(&key).await?.map(Json).ok_or(ApiError::NotFound)
}

async fn raft_post(
    State(node): State<RaftHandle>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let value = parse_value(&body)?;
    let id = node.set(key, value).await?;
    debug!(id, "raft write committed");
    Ok(StatusCode::OK)
}

async fn raft_delete(
    State(node): State<RaftHandle>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = node.delete(key).await?;
    debug!(id, "raft delete committed");
    Ok(StatusCode::OK)
}
