use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::engine::EngineError;
use crate::model::BookingId;

/// HTTP-facing error: status plus `{"error": ...}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    conflicting_id: Option<BookingId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conflicting_id: Option<BookingId>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            conflicting_id: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "booking not found")
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => Self::bad_request(e.message()),
            EngineError::Conflict { existing } => Self {
                status: StatusCode::CONFLICT,
                message: "time slot conflicts with an existing booking".into(),
                conflicting_id: Some(existing),
            },
            EngineError::NotFound(_) => Self::not_found(),
            // Details were logged by the engine; keep them off the wire.
            EngineError::StoreUnavailable(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            conflicting_id: self.conflicting_id,
        };
        (self.status, Json(body)).into_response()
    }
}
