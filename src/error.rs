use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::ride::RideState;

/// Recoverable outcomes of booking commands.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BookingError {
    #[error("a ride is already in progress")]
    BookingInProgress,

    #[error("invalid pickup or dropoff location")]
    InvalidLocation,

    #[error("no drivers are currently available in your area")]
    NoDriversAvailable,

    #[error("booking was cancelled or overridden before it completed")]
    Superseded,

    #[error("ride {0} is not the current ride")]
    RideNotFound(Uuid),

    #[error("ride cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: RideState, to: RideState },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Booking(#[from] BookingError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Booking(err) => match err {
                BookingError::BookingInProgress
                | BookingError::Superseded
                | BookingError::InvalidTransition { .. } => StatusCode::CONFLICT,
                BookingError::InvalidLocation => StatusCode::BAD_REQUEST,
                BookingError::NoDriversAvailable => StatusCode::SERVICE_UNAVAILABLE,
                BookingError::RideNotFound(_) => StatusCode::NOT_FOUND,
            },
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            AppError::NotFound(msg) | AppError::BadRequest(msg) | AppError::Internal(msg) => {
                msg.clone()
            }
            AppError::Booking(err) => err.to_string(),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
