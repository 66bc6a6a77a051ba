//! The batch inventory port.
//!
//! Listing is read-only and may be stale; `reserve` is the only path that
//! decrements stock and is where oversell is prevented.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use dispensary_core::MedicationId;

use crate::batch::{BatchId, BatchSnapshot, sort_fefo};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("batch {0} not found")]
    NotFound(BatchId),

    #[error("insufficient stock in batch {batch_id}: requested {requested}, available {available}")]
    InsufficientStock {
        batch_id: BatchId,
        requested: u64,
        available: u64,
    },

    /// The request breaks a batch rule (expired lot, zero quantity, over-release).
    #[error("invalid batch operation: {0}")]
    Invalid(String),

    /// Optimistic retry budget exhausted while racing other writers.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("inventory store failure: {0}")]
    Store(String),
}

impl InventoryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::Conflict(_))
    }
}

/// FEFO-ordered candidates for one medication.
///
/// Finite and restartable: iterate as often as needed, or ask the inventory
/// again for a fresher view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailableBatches {
    batches: Vec<BatchSnapshot>,
}

impl AvailableBatches {
    /// Keep only batches available on `as_of`, then sort into FEFO order.
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = BatchSnapshot>, as_of: NaiveDate) -> Self {
        let mut batches: Vec<_> = snapshots
            .into_iter()
            .filter(|b| b.is_available(as_of))
            .collect();
        sort_fefo(&mut batches);
        Self { batches }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BatchSnapshot> {
        self.batches.iter()
    }

    pub fn as_slice(&self) -> &[BatchSnapshot] {
        &self.batches
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn total_available(&self) -> u64 {
        self.batches.iter().map(|b| b.available_quantity).sum()
    }

    pub fn into_vec(self) -> Vec<BatchSnapshot> {
        self.batches
    }
}

impl<'a> IntoIterator for &'a AvailableBatches {
    type Item = &'a BatchSnapshot;
    type IntoIter = std::slice::Iter<'a, BatchSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.iter()
    }
}

impl IntoIterator for AvailableBatches {
    type Item = BatchSnapshot;
    type IntoIter = std::vec::IntoIter<BatchSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.batches.into_iter()
    }
}

pub trait BatchInventory: Send + Sync {
    /// Active, unexpired, non-empty batches of a medication in FEFO order.
    fn list_available_batches(
        &self,
        medication_id: MedicationId,
        as_of: NaiveDate,
    ) -> Result<AvailableBatches, InventoryError>;

    /// Current view of one batch, whatever its state.
    fn batch(&self, batch_id: BatchId) -> Result<BatchSnapshot, InventoryError>;

    /// Atomically decrement `available_quantity`.
    ///
    /// Fails with `InsufficientStock` when `quantity` exceeds what remains, and
    /// with `Conflict` when concurrent writers exhaust the retry budget.
    fn reserve(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError>;

    /// Give back units taken by `reserve` in a commit that was aborted.
    fn release(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError>;
}

impl<I> BatchInventory for Arc<I>
where
    I: BatchInventory + ?Sized,
{
    fn list_available_batches(
        &self,
        medication_id: MedicationId,
        as_of: NaiveDate,
    ) -> Result<AvailableBatches, InventoryError> {
        (**self).list_available_batches(medication_id, as_of)
    }

    fn batch(&self, batch_id: BatchId) -> Result<BatchSnapshot, InventoryError> {
        (**self).batch(batch_id)
    }

    fn reserve(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError> {
        (**self).reserve(batch_id, quantity, occurred_at)
    }

    fn release(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError> {
        (**self).release(batch_id, quantity, occurred_at)
    }
}
