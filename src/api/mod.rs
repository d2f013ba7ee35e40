//! HTTP API
//!
//! Thin JSON layer over the façade: request validation happens here, the
//! engine work happens in `engine::facade`.

mod metadata;
mod query;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

pub use metadata::MetadataRequest;
pub use query::QueryRequest;

/// Builds the application router
pub fn router() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(query::run_query))
        .route("/api/metadata", post(metadata::run_metadata))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Binds the configured address and serves until the process exits
pub async fn serve(config: &AppConfig) -> std::io::Result<()> {
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Starting HTTP server on http://{}", addr);

    axum::serve(listener, router()).await
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// `{error}` body with the given status
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_response(StatusCode::BAD_REQUEST, rejection.body_text())
}

/// Treats absent and blank fields alike
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}
