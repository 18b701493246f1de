//! Local HTTP control surface for operators.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mentor_delivery::{CounterpartyId, DeliveryRuntime};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;

use crate::KnownCounterpartyStore;

pub const GREETINGS_ENDPOINT: &str = "/greetings";
pub const COUNTERPARTIES_ENDPOINT: &str = "/counterparties";
pub const COUNTERPARTY_ENDPOINT: &str = "/counterparties/{id}";
pub const RATE_LIMIT_STATS_ENDPOINT: &str = "/rate-limit/stats";

#[derive(Debug, Deserialize)]
struct GreetingRequest {
    handle: String,
}

#[derive(Debug, Deserialize)]
struct CounterpartyRequest {
    id: CounterpartyId,
}

/// Shared handler state. Without a store, known-set changes live in memory only.
#[derive(Clone)]
pub struct ControlState {
    pub runtime: Arc<DeliveryRuntime>,
    pub store: Option<KnownCounterpartyStore>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn persistence_failure(counterparty: CounterpartyId, error: anyhow::Error) -> Response {
    tracing::warn!(
        counterparty,
        error = %format!("{error:#}"),
        "failed to persist known counterparty change"
    );
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "failed to persist known counterparties",
    )
}

pub fn build_control_router(state: ControlState) -> Router {
    Router::new()
        .route(GREETINGS_ENDPOINT, post(handle_enqueue_greeting))
        .route(COUNTERPARTIES_ENDPOINT, post(handle_register_counterparty))
        .route(COUNTERPARTY_ENDPOINT, delete(handle_forget_counterparty))
        .route(RATE_LIMIT_STATS_ENDPOINT, get(handle_rate_limit_stats))
        .with_state(Arc::new(state))
}

async fn handle_enqueue_greeting(
    State(state): State<Arc<ControlState>>,
    Json(request): Json<GreetingRequest>,
) -> Response {
    let handle = request.handle.trim();
    if mentor_delivery::normalize_handle(handle).is_none() {
        return error_response(StatusCode::BAD_REQUEST, "handle must not be empty");
    }
    match state.runtime.enqueue_greeting(handle) {
        Ok(pending) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "queued", "pending": pending })),
        )
            .into_response(),
        Err(error) => error_response(StatusCode::SERVICE_UNAVAILABLE, &error.to_string()),
    }
}

async fn handle_register_counterparty(
    State(state): State<Arc<ControlState>>,
    Json(request): Json<CounterpartyRequest>,
) -> Response {
    if state.runtime.register_known_counterparty(request.id) {
        tracing::info!(counterparty = request.id, "registered known counterparty");
    }
    if let Some(store) = state.store.as_ref() {
        if let Err(error) = store.record(request.id) {
            return persistence_failure(request.id, error);
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_forget_counterparty(
    State(state): State<Arc<ControlState>>,
    Path(id): Path<CounterpartyId>,
) -> Response {
    let known = state.runtime.forget_known_counterparty(id);
    let persisted = match state.store.as_ref().map(|store| store.forget(id)) {
        Some(Ok(removed)) => removed,
        Some(Err(error)) => return persistence_failure(id, error),
        None => false,
    };
    if known || persisted {
        tracing::info!(counterparty = id, "forgot known counterparty");
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "counterparty is not known")
    }
}

async fn handle_rate_limit_stats(State(state): State<Arc<ControlState>>) -> Response {
    Json(state.runtime.rate_limiter_stats()).into_response()
}

/// Serves the control router on `bind` until `shutdown` resolves.
pub async fn serve_control_surface<F>(
    bind: &str,
    state: ControlState,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind control surface on {bind}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve control surface address")?;
    tracing::info!(addr = %local_addr, "control surface listening");
    axum::serve(listener, build_control_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("control surface server failed")
}
