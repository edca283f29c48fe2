use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use super::AppContext;

pub fn status_routes() -> Router<AppContext> {
    Router::new()
        .route("/status", get(status))
        .route("/health", get(health))
}

async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(ctx.live.status_report(ctx.playlist.min_ready))
}

async fn health(State(ctx): State<AppContext>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "streaming": ctx.live.is_enabled(),
    }))
}
