use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cdc_core::Lsn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::actor::ControllerHandle;

/// The admin surface (§4.11): a small JSON API fronting the controller
/// actor's mailbox, mirroring the teacher's "thin axum router, fat handler
/// delegates to a single backing service" shape.
pub fn router(handle: ControllerHandle) -> Router {
    Router::new()
        .route("/api/replication/init", post(init))
        .route("/api/replication/status", get(status))
        .route("/api/replication/health", get(health))
        .route("/api/replication/cleanup", post(cleanup))
        .route("/api/replication/verify", get(verify))
        .route("/api/replication/peek", get(peek))
        .route("/api/replication/clients", get(clients))
        .route("/api/replication/clients/cleanup", post(clients_cleanup))
        .fallback(not_found)
        .with_state(handle)
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

fn error_response(err: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody { success: false, error: err }),
    )
        .into_response()
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"success": false, "error": "not found"}))).into_response()
}

async fn init(State(handle): State<ControllerHandle>) -> Response {
    match handle.init().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn status(State(handle): State<ControllerHandle>) -> Response {
    match handle.status().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn health(State(handle): State<ControllerHandle>) -> Response {
    let result = handle.health().await;
    let code = if result.healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(result)).into_response()
}

async fn verify(State(handle): State<ControllerHandle>) -> Response {
    let result = handle.verify().await;
    let code = if result.ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(result)).into_response()
}

async fn cleanup(State(handle): State<ControllerHandle>) -> Response {
    match handle.cleanup().await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
struct PeekParams {
    from_lsn: Option<String>,
    limit: Option<usize>,
}

async fn peek(State(handle): State<ControllerHandle>, Query(params): Query<PeekParams>) -> Response {
    let from_lsn = match params.from_lsn.as_deref() {
        Some(s) => match Lsn::parse(s) {
            Ok(lsn) => lsn,
            Err(e) => return error_response(e.to_string()),
        },
        None => Lsn::ZERO,
    };
    let limit = params.limit.unwrap_or(100).min(1000);

    match handle.peek(from_lsn, limit).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => error_response(e),
    }
}

async fn clients(State(handle): State<ControllerHandle>) -> Response {
    Json(handle.list_clients().await).into_response()
}

async fn clients_cleanup(State(handle): State<ControllerHandle>) -> Response {
    Json(handle.cleanup_clients().await).into_response()
}
