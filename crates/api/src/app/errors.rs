use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use dispensary_core::DomainError;
use dispensary_dispensing::DispenseError;
use dispensary_inventory::InventoryError;

pub fn dispense_error_to_response(err: DispenseError) -> Response {
    let retryable = err.is_retryable();
    let (status, code) = match &err {
        DispenseError::InsufficientStock(_) => (StatusCode::CONFLICT, "insufficient_stock"),
        DispenseError::ConcurrencyConflict(_) => (StatusCode::CONFLICT, "concurrency_conflict"),
        DispenseError::InvalidAllocation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_allocation"),
        DispenseError::IncompleteAllocation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "incomplete_allocation"),
        DispenseError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        DispenseError::RollbackFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "rollback_failed"),
        DispenseError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "dispense request failed");
    }
    error_body(status, code, err.to_string(), retryable)
}

pub fn inventory_error_to_response(err: InventoryError) -> Response {
    let retryable = err.is_retryable();
    let (status, code) = match &err {
        InventoryError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        InventoryError::InsufficientStock { .. } => (StatusCode::CONFLICT, "insufficient_stock"),
        InventoryError::Invalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_batch_operation"),
        InventoryError::Conflict(_) => (StatusCode::CONFLICT, "concurrency_conflict"),
        InventoryError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "inventory request failed");
    }
    error_body(status, code, err.to_string(), retryable)
}

/// Malformed input that never reached the engine.
pub fn validation_error(err: DomainError) -> Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", err.to_string())
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    error_body(status, code, message.into(), false)
}

fn error_body(status: StatusCode, code: &'static str, message: String, retryable: bool) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message,
            "retryable": retryable,
        })),
    )
        .into_response()
}

pub fn parse_id<T>(raw: &str, what: &'static str) -> Result<T, Response>
where
    T: std::str::FromStr,
{
    raw.parse()
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id")))
}
