use thiserror::Error;

use dispensary_core::DomainError;
use dispensary_inventory::InventoryError;

/// Dispensing error taxonomy.
///
/// Validation always runs before any stock is touched, so every variant except
/// `RollbackFailed` means nothing was written.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispenseError {
    /// Stock cannot satisfy the request (automatic proposal or commit-time race).
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// The allocation breaks an invariant (over required, over batch stock,
    /// wrong medication, missing cancellation reason, wrong state).
    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    /// A complete dispense left at least one line unsatisfied.
    #[error("incomplete allocation: {0}")]
    IncompleteAllocation(String),

    /// Lost an optimistic race at commit time. Safe to retry as-is.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A compensating release failed; stock for the listed reservations is
    /// still held and needs manual correction.
    #[error("rollback failed after '{cause}': {unreleased} reservation(s) still held")]
    RollbackFailed { cause: String, unreleased: usize },

    #[error("store failure: {0}")]
    Store(String),
}

impl DispenseError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidAllocation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Only lost races are worth a blind retry; everything else needs new input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispenseError::ConcurrencyConflict(_))
    }
}

impl From<InventoryError> for DispenseError {
    fn from(value: InventoryError) -> Self {
        match value {
            InventoryError::NotFound(batch_id) => DispenseError::NotFound(format!("batch {batch_id}")),
            e @ InventoryError::InsufficientStock { .. } => DispenseError::InsufficientStock(e.to_string()),
            InventoryError::Invalid(msg) => DispenseError::InvalidAllocation(msg),
            InventoryError::Conflict(msg) => DispenseError::ConcurrencyConflict(msg),
            InventoryError::Store(msg) => DispenseError::Store(msg),
        }
    }
}

impl From<DomainError> for DispenseError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg)
            | DomainError::InvariantViolation(msg)
            | DomainError::InvalidId(msg) => DispenseError::InvalidAllocation(msg),
            DomainError::NotFound(what) => DispenseError::NotFound(what),
            DomainError::Conflict(msg) => DispenseError::ConcurrencyConflict(msg),
            e @ DomainError::InsufficientStock { .. } => DispenseError::InsufficientStock(e.to_string()),
        }
    }
}
