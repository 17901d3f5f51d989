use crate::api::KvNode;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

type JsonResponse = (StatusCode, Json<Value>);

#[derive(Deserialize)]
struct SetRequest {
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct JoinRequest {
    #[serde(default)]
    node_id: String,
    #[serde(default)]
    addr: String,
}

/// HttpServer exposes a node's key-value and membership operations as JSON over HTTP.
pub struct HttpServer {
    logger: slog::Logger,
    node: Arc<KvNode>,
}

impl HttpServer {
    pub fn new(logger: slog::Logger, node: Arc<KvNode>) -> Self {
        HttpServer { logger, node }
    }

    pub fn router(&self) -> Router {
        let state = AppState {
            logger: self.logger.clone(),
            node: self.node.clone(),
        };

        Router::new()
            .route("/kv/:key", get(handle_get).put(handle_set).delete(handle_delete))
            .route("/join", post(handle_join))
            .route("/status", get(handle_status))
            .with_state(state)
    }

    /// Serves until `shutdown_signal` resolves, then drains in-flight requests.
    pub async fn run(self, listener: TcpListener, shutdown_signal: impl Future<Output = ()> + Send + 'static) -> io::Result<()> {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", listener.local_addr()?);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
        result
    }
}

#[derive(Clone)]
struct AppState {
    logger: slog::Logger,
    node: Arc<KvNode>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> JsonResponse {
    (status, Json(json!({ "error": message.into() })))
}

fn ok_response() -> JsonResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn handle_get(State(state): State<AppState>, Path(key): Path<String>) -> JsonResponse {
    match state.node.get(&key) {
        Some(value) => (StatusCode::OK, Json(json!({ "key": key, "value": value }))),
        None => error_response(StatusCode::NOT_FOUND, "key not found"),
    }
}

async fn handle_set(
    State(state): State<AppState>,
    Path(key): Path<String>,
    request: Result<Json<SetRequest>, JsonRejection>,
) -> JsonResponse {
    let Json(request) = match request {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
    };

    match state.node.set(key.as_str(), request.value).await {
        Ok(()) => ok_response(),
        Err(e) => {
            slog::warn!(state.logger, "Set failed"; "key" => &key, "error" => %e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn handle_delete(State(state): State<AppState>, Path(key): Path<String>) -> JsonResponse {
    match state.node.delete(key.as_str()).await {
        Ok(()) => ok_response(),
        Err(e) => {
            slog::warn!(state.logger, "Delete failed"; "key" => &key, "error" => %e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn handle_join(State(state): State<AppState>, request: Result<Json<JoinRequest>, JsonRejection>) -> JsonResponse {
    let Json(request) = match request {
        Ok(request) => request,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request"),
    };

    match state.node.join(&request.node_id, &request.addr).await {
        Ok(()) => ok_response(),
        Err(e) => {
            slog::warn!(state.logger, "Join failed"; "node_id" => &request.node_id, "addr" => &request.addr, "error" => %e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn handle_status(State(state): State<AppState>) -> JsonResponse {
    (
        StatusCode::OK,
        Json(json!({
            "leader": state.node.leader().unwrap_or_default(),
            "state": state.node.state().to_string(),
        })),
    )
}
