//! HTTP error mapping for the relay endpoints.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use liverelay_media::{LookupError, Unavailable};
use serde_json::json;

use super::control::ControlError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid fragment id: {0}")]
    InvalidFragmentId(String),

    #[error("fragment not available")]
    Fragment(#[from] LookupError),

    #[error("stream not ready: {0}")]
    NotReady(#[from] Unavailable),

    #[error("initialization segment not available")]
    InitMissing,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no device controller configured")]
    NoController,

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error("not found")]
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidFragmentId(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Fragment(_) | Self::InitMissing | Self::NotFound => StatusCode::NOT_FOUND,
            Self::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoController => StatusCode::NOT_IMPLEMENTED,
            Self::Control(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFragmentId(_) => "invalid_fragment_id",
            Self::Fragment(_) => "fragment_not_found",
            Self::NotReady(reason) => reason.reason(),
            Self::InitMissing => "init_missing",
            Self::InvalidRequest(_) => "validation_error",
            Self::NoController => "no_controller",
            Self::Control(_) => "device_error",
            Self::NotFound => "not_found",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Plain text for players polling the playlist
        if let Self::NotReady(reason) = &self {
            return (
                status,
                [
                    (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
                ],
                reason.message(),
            )
                .into_response();
        }

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "Request failed");
        }

        let body = json!({
            "error": self.to_string(),
            "code": self.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_reasons_share_one_message() {
        let reasons = [
            LookupError::Stale {
                requested: 1,
                oldest: 6,
            },
            LookupError::Future {
                requested: 30,
                latest: 20,
            },
            LookupError::Evicted(7),
        ];
        for reason in reasons {
            let error = ApiError::from(reason);
            assert_eq!(error.to_string(), "fragment not available");
            assert_eq!(error.code(), "fragment_not_found");
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::InvalidFragmentId("abc".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(LookupError::Stale {
                requested: 1,
                oldest: 6
            })
            .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(LookupError::Evicted(7)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(Unavailable::Initializing).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ApiError::NoController.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(
            ApiError::from(ControlError::Unavailable("offline".into())).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_not_ready_is_plain_text() {
        let response = ApiError::from(Unavailable::Buffering {
            ready: 1,
            required: 2,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            ApiError::from(LookupError::Future {
                requested: 30,
                latest: 20
            })
            .code(),
            "fragment_not_found"
        );
        assert_eq!(ApiError::from(Unavailable::Disabled).code(), "disabled");
    }
}
