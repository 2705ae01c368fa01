use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Validation error: {0}")]
    RequestValidation(#[from] validator::ValidationErrors),

    /// No default payment method registered. Requires operator action;
    /// callers must not retry automatically.
    #[error("No default payment method for business ({business_id})")]
    NoDefaultMethod { business_id: String },

    /// The gateway rejected a charge or refund request.
    #[error("Payment request failed ({code}): {message}")]
    PaymentRequest { code: String, message: String },

    /// The gateway request timed out: outcome unknown, schedule untouched.
    #[error("Payment request timed out, outcome unknown")]
    RequestTimeout,

    #[error("Nothing to refund for business ({business_id})")]
    NothingToRefund { business_id: String },

    /// The single-forward-schedule invariant was violated. Alert-worthy,
    /// not user-recoverable.
    #[error("Duplicate schedule state for business ({business_id})")]
    DuplicateSchedule { business_id: String },

    #[error("Invalid schedule transition: {from} + {event}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<mongodb::bson::ser::Error> for BillingError {
    fn from(err: mongodb::bson::ser::Error) -> Self {
        BillingError::Internal(anyhow::Error::new(err))
    }
}

impl BillingError {
    /// Stable machine-readable code returned to API callers so they can
    /// distinguish retryable from terminal conditions.
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Validation(_) | BillingError::RequestValidation(_) => "validation_error",
            BillingError::NoDefaultMethod { .. } => "no_default_method",
            BillingError::PaymentRequest { .. } => "payment_request_error",
            BillingError::RequestTimeout => "request_timeout",
            BillingError::NothingToRefund { .. } => "nothing_to_refund",
            BillingError::DuplicateSchedule { .. } => "duplicate_schedule",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::NotFound(_) => "not_found",
            BillingError::Unauthorized(_) => "unauthorized",
            BillingError::Database(_) => "database_error",
            BillingError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error_code: &'static str,
            message: String,
        }

        let status = match &self {
            BillingError::Validation(_) | BillingError::RequestValidation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            BillingError::NoDefaultMethod { .. } => StatusCode::CONFLICT,
            BillingError::PaymentRequest { .. } => StatusCode::BAD_GATEWAY,
            BillingError::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            BillingError::NothingToRefund { .. } => StatusCode::CONFLICT,
            BillingError::DuplicateSchedule { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BillingError::InvalidTransition { .. } => StatusCode::CONFLICT,
            BillingError::NotFound(_) => StatusCode::NOT_FOUND,
            BillingError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BillingError::Database(_) | BillingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error_code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
