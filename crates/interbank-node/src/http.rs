//! The interbank HTTP endpoint.
//!
//! `POST /interbank` with the caller's API key in `X-Api-Key` and a JSON
//! [`Message`] body.
//!
//! | Outcome                          | Status |
//! |----------------------------------|--------|
//! | missing / unknown API key        | 401    |
//! | malformed body                   | 400    |
//! | `NEW_TX`                         | 200 + vote |
//! | `COMMIT_TX` / `ROLLBACK_TX`      | 204    |
//! | validation or protocol failure   | 400    |
//! | anything else                    | 500    |

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use interbank_executor::{InboundReply, InterbankExecutor};
use interbank_types::{InterbankError, Message, RoutingNumber, constants};
use serde::Serialize;
use tracing::{debug, error, warn};

/// Shared state of the HTTP layer.
pub struct AppState {
    pub executor: Arc<InterbankExecutor>,
}

impl AppState {
    #[must_use]
    pub fn new(executor: Arc<InterbankExecutor>) -> Arc<Self> {
        Arc::new(Self { executor })
    }
}

/// Router serving the interbank endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(constants::INTERBANK_PATH, post(receive_message))
        .with_state(state)
}

/// Error body returned for every non-2xx answer.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// An HTTP failure: status plus message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<InterbankError> for ApiError {
    fn from(err: InterbankError) -> Self {
        let status = match &err {
            InterbankError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            InterbankError::ProtocolViolation(_) => StatusCode::BAD_REQUEST,
            e if e.is_validation() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// `POST /interbank`.
pub async fn receive_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Message>, JsonRejection>,
) -> Result<Response, ApiError> {
    let sender = authenticate(&state, &headers)?;
    let Json(message) = body.map_err(|rejection| {
        warn!(sender = %sender, error = %rejection.body_text(), "Malformed interbank message");
        ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;
    debug!(sender = %sender, kind = message.kind(), key = %message.idempotence_key(), "Inbound message");

    let executor = Arc::clone(&state.executor);
    let reply = tokio::task::spawn_blocking(move || executor.handle_message(sender, message))
        .await
        .map_err(|e| {
            error!(error = %e, "Inbound handler task failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "handler task failed")
        })?;

    match reply {
        Ok(InboundReply::Vote(vote)) => Ok((StatusCode::OK, Json(vote)).into_response()),
        Ok(InboundReply::Accepted) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e) => {
            let api = ApiError::from(e);
            if api.status.is_server_error() {
                error!(sender = %sender, error = %api.message, "Inbound message failed");
            } else {
                warn!(sender = %sender, error = %api.message, "Inbound message rejected");
            }
            Err(api)
        }
    }
}

/// Resolve the `X-Api-Key` header to the peer that owns it.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<RoutingNumber, ApiError> {
    let key = headers
        .get(constants::API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing API key"))?;
    state
        .executor
        .routes()
        .peer_by_api_key(key)
        .map(|peer| peer.routing_number)
        .ok_or_else(|| {
            warn!("Inbound request with unknown API key");
            ApiError::new(StatusCode::UNAUTHORIZED, "unknown API key")
        })
}
