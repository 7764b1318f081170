// Error types and their HTTP mapping

use crate::chain::ChainError;
use crate::db::LedgerError;
use crate::payment::{ChallengeBody, GateError, PaymentError, Rejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Payment Required")]
    PaymentRequired(Box<ChallengeBody>),

    #[error(transparent)]
    Payment(#[from] Rejection),

    #[error("Database error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Execution failed: {0}")]
    Settlement(#[from] PaymentError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Misconfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::UnknownResource(id) => AppError::NotFound(format!("resource `{id}`")),
            GateError::PaymentRequired(challenge) => {
                AppError::PaymentRequired(Box::new(ChallengeBody::from(&*challenge)))
            }
            GateError::Rejected(rejection) => AppError::Payment(rejection),
            GateError::Ledger(e) => AppError::Ledger(e),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::PaymentRequired(_) => StatusCode::PAYMENT_REQUIRED,
            AppError::Payment(rejection) => rejection.status_code(),
            AppError::Ledger(LedgerError::Conflict(_)) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Ledger(_)
            | AppError::Chain(_)
            | AppError::Settlement(_)
            | AppError::Misconfigured(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            AppError::PaymentRequired(challenge) => {
                return (status, Json(*challenge)).into_response();
            }
            AppError::Ledger(LedgerError::Conflict(_)) => "Duplicate transaction hash".to_string(),
            AppError::Ledger(e) => {
                tracing::error!("Ledger error: {}", e);
                "Database error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                "Internal server error".to_string()
            }
            other => {
                if status.is_server_error() {
                    tracing::error!("{}", other);
                }
                other.to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
