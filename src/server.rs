//! HTTP surface: the inbound webhook endpoints.
//!
//! Status mapping: unknown tenant → 404, validation failure → 400, a
//! notification we recorded but could not process → 200 (the failure lives on
//! the WebhookEvent row), storage unavailable → 500. Microsoft's subscription
//! handshake answers 200 with the escaped validation token as plain text.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::error::CalendarError;
use crate::models::CalendarProvider;
use crate::webhooks::{WebhookOutcome, WebhookPipeline};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub pipeline: Arc<WebhookPipeline>,
}

/// Creates and configures the application router.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/webhooks/google-calendar/{tenant_id}/",
            post(google_webhook),
        )
        .route(
            "/webhooks/microsoft-calendar/{tenant_id}/",
            post(microsoft_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the server with the given configuration.
pub async fn run_server(config: AppConfig, state: AppState) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "webhook server listening");
    axum::serve(listener, create_app(state)).await?;
    Ok(())
}

async fn healthz(State(state): State<AppState>) -> Response {
    match db::health_check(&state.db).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            error!(error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unavailable").into_response()
        }
    }
}

async fn google_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    dispatch(state, CalendarProvider::Google, tenant_id, headers, query, body).await
}

async fn microsoft_webhook(
    State(state): State<AppState>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    dispatch(
        state,
        CalendarProvider::Microsoft,
        tenant_id,
        headers,
        query,
        body,
    )
    .await
}

async fn dispatch(
    state: AppState,
    provider: CalendarProvider,
    tenant_id: Uuid,
    headers: HeaderMap,
    query: HashMap<String, String>,
    body: String,
) -> Response {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();

    match state
        .pipeline
        .handle(provider, tenant_id, header_map, query, &body)
        .await
    {
        Ok(WebhookOutcome::Accepted) => StatusCode::OK.into_response(),
        Ok(WebhookOutcome::Challenge(token)) => (
            StatusCode::OK,
            [("content-type", "text/plain")],
            token,
        )
            .into_response(),
        Err(CalendarError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(CalendarError::WebhookValidationFailed(reason)) => {
            (StatusCode::BAD_REQUEST, reason).into_response()
        }
        Err(err) => {
            // Only reachable when the WebhookEvent itself could not be
            // recorded; providers may retry.
            error!(error = %err, "webhook persistence failure");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
