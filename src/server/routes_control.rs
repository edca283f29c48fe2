//! Runtime stream control and device command pass-through.

use axum::{
    body::Bytes,
    extract::State,
    http::Uri,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::control::{DeviceCommand, DEVICE_GROUPS};
use super::error::ApiError;
use super::AppContext;
use crate::config::{persist, StreamingMode};

pub fn control_routes() -> Router<AppContext> {
    let mut router = Router::new()
        .route("/stream/enable", post(enable_stream))
        .route("/stream/disable", post(disable_stream))
        .route("/stream/mode", post(set_mode));

    for group in DEVICE_GROUPS {
        router = router.route(&format!("/{}/*action", group), post(forward_command));
    }

    router
}

async fn enable_stream(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.live.set_enabled(true);
    save_stream_settings(&ctx);
    Json(ctx.live.status_report(ctx.playlist.min_ready))
}

async fn disable_stream(State(ctx): State<AppContext>) -> impl IntoResponse {
    ctx.live.set_enabled(false);
    save_stream_settings(&ctx);
    Json(ctx.live.status_report(ctx.playlist.min_ready))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

async fn set_mode(
    State(ctx): State<AppContext>,
    Json(request): Json<ModeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mode: StreamingMode = request.mode.parse().map_err(ApiError::InvalidRequest)?;
    ctx.live.set_mode(mode);
    save_stream_settings(&ctx);

    Ok(Json(serde_json::json!({
        "status": "success",
        "mode": mode,
    })))
}

/// Forward `/torch/*`, `/camera/*`, ... to the device controller.
async fn forward_command(
    State(ctx): State<AppContext>,
    uri: Uri,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let payload: Option<Value> = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(&body)
                .map_err(|e| ApiError::InvalidRequest(format!("invalid JSON body: {}", e)))?,
        )
    };

    let command = DeviceCommand::from_path(uri.path(), payload).ok_or(ApiError::NotFound)?;
    let controller = ctx.device.as_ref().ok_or_else(|| {
        tracing::debug!(group = %command.group, action = %command.action, "No device controller");
        ApiError::NoController
    })?;

    tracing::info!(
        controller = controller.name(),
        group = %command.group,
        action = %command.action,
        "Forwarding device command"
    );
    let result = controller.execute(&command).await.map_err(|e| {
        tracing::warn!(group = %command.group, action = %command.action, error = %e, "Device command failed");
        ApiError::Control(e)
    })?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "command": command,
        "result": result,
    })))
}

/// Write the enabled flag and mode back to the loaded config file.
fn save_stream_settings(ctx: &AppContext) {
    let Some(path) = &ctx.config_path else {
        return;
    };
    if let Err(e) = persist::update_stream_settings(path, ctx.live.is_enabled(), ctx.live.mode())
    {
        tracing::warn!(path = ?path, error = %e, "Failed to persist stream settings");
    }
}
