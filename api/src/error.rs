use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ledger::LedgerError;
use rules::RuleError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Http { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Http { status: StatusCode::UNPROCESSABLE_ENTITY, message: message.into() }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

fn ledger_status(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
        LedgerError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::AlreadyReversed(_) => StatusCode::CONFLICT,
        LedgerError::IdempotencyConflict(_) => StatusCode::CONFLICT,
        LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn rule_status(err: &RuleError) -> StatusCode {
    match err {
        RuleError::InvalidRule(_) => StatusCode::BAD_REQUEST,
        RuleError::NotFound(_) => StatusCode::NOT_FOUND,
        RuleError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Http { status, message } => (*status, message.clone()),
            ApiError::Ledger(err) => (ledger_status(err), err.to_string()),
            ApiError::Rule(err) => (rule_status(err), err.to_string()),
        };

        if status.is_server_error() {
            tracing::error!(%message, "request failed");
        } else {
            tracing::warn!(%message, %status, "request rejected");
        }

        (status, Json(ErrorEnvelope { error: message, detail: None })).into_response()
    }
}
