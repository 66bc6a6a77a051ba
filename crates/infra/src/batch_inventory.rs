//! Event-sourced `BatchInventory`.
//!
//! Writes go through the command dispatcher (one stream per batch, optimistic
//! append). Listings come from the availability projection, which is updated
//! synchronously from each committed event. Single-batch reads rehydrate from
//! the store so validation always sees the latest committed state.

use std::thread;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use dispensary_core::MedicationId;
use dispensary_events::{EventBus, EventEnvelope};
use dispensary_inventory::{
    AvailableBatches, Batch, BatchCommand, BatchId, BatchInventory, BatchSnapshot, ExpireBatch,
    InventoryError, ReceiveBatch, ReleaseStock, ReserveStock,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::RetryPolicy;
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{BatchAvailabilityProjection, BatchProjectionError};

pub const BATCH_AGGREGATE_TYPE: &str = "pharmacy.batch";

pub struct EventSourcedBatchInventory<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    projection: BatchAvailabilityProjection,
    retry: RetryPolicy,
}

impl<S, B> EventSourcedBatchInventory<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, retry: RetryPolicy) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            projection: BatchAvailabilityProjection::new(),
            retry,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    /// Register a newly received lot.
    pub fn receive_batch(&self, cmd: ReceiveBatch) -> Result<BatchSnapshot, InventoryError> {
        let batch_id = cmd.batch_id;
        let committed = self
            .dispatcher
            .dispatch(batch_id.0, BATCH_AGGREGATE_TYPE, BatchCommand::ReceiveBatch(cmd), make_batch)
            .map_err(|e| to_inventory_error(batch_id, e))?;
        let snapshot = self.project(batch_id, &committed)?;
        info!(%batch_id, lot = %snapshot.lot_number, quantity = snapshot.initial_quantity, "batch received");
        Ok(snapshot)
    }

    /// Administratively expire a lot; it stops being dispensable at once.
    pub fn expire_batch(
        &self,
        batch_id: BatchId,
        reason: Option<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError> {
        let cmd = BatchCommand::ExpireBatch(ExpireBatch {
            batch_id,
            reason,
            occurred_at,
        });
        let committed = self
            .with_retry(batch_id, "expire", || {
                self.dispatcher
                    .dispatch(batch_id.0, BATCH_AGGREGATE_TYPE, cmd.clone(), make_batch)
            })?;
        info!(%batch_id, "batch expired");
        self.project(batch_id, &committed)
    }

    /// Rebuild the availability view from the full event history.
    pub fn rebuild_projection(&self, history: Vec<StoredEvent>) -> Result<(), InventoryError> {
        self.projection
            .rebuild_from_scratch(history.iter().map(StoredEvent::to_envelope))
            .map_err(|e| InventoryError::Store(e.to_string()))
    }

    /// Retry on lost optimistic races, reloading the stream every attempt.
    fn with_retry(
        &self,
        batch_id: BatchId,
        op: &'static str,
        mut attempt_once: impl FnMut() -> Result<Vec<StoredEvent>, DispatchError>,
    ) -> Result<Vec<StoredEvent>, InventoryError> {
        let mut attempt = 1;
        loop {
            match attempt_once() {
                Ok(committed) => return Ok(committed),
                Err(DispatchError::Concurrency(msg)) if attempt < self.retry.max_attempts => {
                    debug!(%batch_id, op, attempt, reason = %msg, "lost optimistic race; retrying");
                    thread::sleep(self.retry.delay_after(attempt));
                    attempt += 1;
                }
                Err(DispatchError::Concurrency(msg)) => {
                    warn!(%batch_id, op, attempts = attempt, "retry budget exhausted");
                    return Err(InventoryError::Conflict(format!(
                        "{op} on batch {batch_id} lost {attempt} optimistic race(s): {msg}"
                    )));
                }
                Err(other) => return Err(to_inventory_error(batch_id, other)),
            }
        }
    }

    /// Apply committed events to the projection; rebuild the stream on a gap
    /// left by a concurrent writer.
    fn project(&self, batch_id: BatchId, committed: &[StoredEvent]) -> Result<BatchSnapshot, InventoryError> {
        for stored in committed {
            match self.projection.apply_envelope(&stored.to_envelope()) {
                Ok(()) => {}
                Err(BatchProjectionError::NonMonotonicSequence { last, found }) => {
                    debug!(%batch_id, last, found, "projection behind; rebuilding stream");
                    let history = self
                        .dispatcher
                        .store()
                        .load_stream(batch_id.0)
                        .map_err(|e| InventoryError::Store(e.to_string()))?;
                    self.projection
                        .rebuild_stream(batch_id.0, history.iter().map(StoredEvent::to_envelope))
                        .map_err(|e| InventoryError::Store(e.to_string()))?;
                    break;
                }
                Err(e) => return Err(InventoryError::Store(e.to_string())),
            }
        }
        self.projection
            .get(batch_id)
            .map_err(|e| InventoryError::Store(e.to_string()))?
            .ok_or(InventoryError::NotFound(batch_id))
    }
}

impl<S, B> BatchInventory for EventSourcedBatchInventory<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn list_available_batches(
        &self,
        medication_id: MedicationId,
        as_of: NaiveDate,
    ) -> Result<AvailableBatches, InventoryError> {
        let snapshots = self
            .projection
            .list_for_medication(medication_id)
            .map_err(|e| InventoryError::Store(e.to_string()))?;
        Ok(AvailableBatches::from_snapshots(snapshots, as_of))
    }

    fn batch(&self, batch_id: BatchId) -> Result<BatchSnapshot, InventoryError> {
        let (batch, _) = self
            .dispatcher
            .load(batch_id.0, make_batch)
            .map_err(|e| to_inventory_error(batch_id, e))?;
        batch.snapshot().ok_or(InventoryError::NotFound(batch_id))
    }

    fn reserve(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError> {
        let cmd = BatchCommand::ReserveStock(ReserveStock {
            batch_id,
            quantity,
            occurred_at,
        });
        let committed = self.with_retry(batch_id, "reserve", || {
            self.dispatcher
                .dispatch(batch_id.0, BATCH_AGGREGATE_TYPE, cmd.clone(), make_batch)
        })?;
        self.project(batch_id, &committed)
    }

    fn release(
        &self,
        batch_id: BatchId,
        quantity: u64,
        occurred_at: DateTime<Utc>,
    ) -> Result<BatchSnapshot, InventoryError> {
        let cmd = BatchCommand::ReleaseStock(ReleaseStock {
            batch_id,
            quantity,
            occurred_at,
        });
        let committed = self.with_retry(batch_id, "release", || {
            self.dispatcher
                .dispatch(batch_id.0, BATCH_AGGREGATE_TYPE, cmd.clone(), make_batch)
        })?;
        self.project(batch_id, &committed)
    }
}

fn make_batch(id: dispensary_core::AggregateId) -> Batch {
    Batch::empty(BatchId::new(id))
}

fn to_inventory_error(batch_id: BatchId, err: DispatchError) -> InventoryError {
    match err {
        DispatchError::NotFound(_) => InventoryError::NotFound(batch_id),
        DispatchError::InsufficientStock { requested, available } => InventoryError::InsufficientStock {
            batch_id,
            requested,
            available,
        },
        DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) | DispatchError::Conflict(msg) => {
            InventoryError::Invalid(msg)
        }
        DispatchError::Concurrency(msg) => InventoryError::Conflict(msg),
        e @ (DispatchError::Deserialize(_) | DispatchError::Store(_)) => InventoryError::Store(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeZone;
    use dispensary_events::InMemoryEventBus;
    use dispensary_inventory::BatchState;

    use crate::event_store::InMemoryEventStore;

    type Inventory = EventSourcedBatchInventory<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>>;

    fn inventory() -> Inventory {
        EventSourcedBatchInventory::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
            RetryPolicy::new(3, Duration::ZERO),
        )
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn receive(inv: &Inventory, medication_id: MedicationId, lot: &str, exp: NaiveDate, qty: u64) -> BatchId {
        let batch_id = BatchId::generate();
        inv.receive_batch(ReceiveBatch {
            batch_id,
            medication_id,
            lot_number: lot.to_string(),
            expiration_date: exp,
            manufacturing_date: date(2024, 1, 1),
            quantity: qty,
            occurred_at: at(2024, 6, 1),
        })
        .unwrap();
        batch_id
    }

    #[test]
    fn listing_is_fefo_and_excludes_unavailable() {
        let inv = inventory();
        let medication_id = MedicationId::new();
        let late = receive(&inv, medication_id, "Late", date(2025, 6, 1), 25);
        let early = receive(&inv, medication_id, "Early", date(2025, 1, 1), 10);
        let gone = receive(&inv, medication_id, "Gone", date(2025, 3, 1), 5);
        inv.reserve(gone, 5, at(2024, 12, 1)).unwrap();
        let pulled = receive(&inv, medication_id, "Pulled", date(2025, 2, 1), 5);
        inv.expire_batch(pulled, Some("recall".into()), at(2024, 12, 1)).unwrap();
        receive(&inv, medication_id, "Today", date(2024, 12, 1), 5);

        let listing = inv.list_available_batches(medication_id, date(2024, 12, 1)).unwrap();
        let ids: Vec<BatchId> = listing.iter().map(|b| b.batch_id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[test]
    fn reserve_and_release_move_stock() {
        let inv = inventory();
        let batch_id = receive(&inv, MedicationId::new(), "L", date(2025, 1, 1), 10);

        let after = inv.reserve(batch_id, 10, at(2024, 12, 1)).unwrap();
        assert_eq!(after.available_quantity, 0);
        assert_eq!(after.state, BatchState::Depleted);

        let after = inv.release(batch_id, 4, at(2024, 12, 1)).unwrap();
        assert_eq!(after.available_quantity, 4);
        assert_eq!(inv.batch(batch_id).unwrap().state, BatchState::Active);
    }

    #[test]
    fn oversell_is_refused_with_current_availability() {
        let inv = inventory();
        let batch_id = receive(&inv, MedicationId::new(), "L", date(2025, 1, 1), 10);
        inv.reserve(batch_id, 8, at(2024, 12, 1)).unwrap();

        let err = inv.reserve(batch_id, 8, at(2024, 12, 1)).unwrap_err();
        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                batch_id,
                requested: 8,
                available: 2
            }
        );
    }

    #[test]
    fn unknown_batch_is_not_found() {
        let inv = inventory();
        let batch_id = BatchId::generate();
        assert_eq!(inv.batch(batch_id).unwrap_err(), InventoryError::NotFound(batch_id));
        assert_eq!(
            inv.reserve(batch_id, 1, at(2024, 12, 1)).unwrap_err(),
            InventoryError::NotFound(batch_id)
        );
    }

    #[test]
    fn expiring_twice_is_invalid() {
        let inv = inventory();
        let batch_id = receive(&inv, MedicationId::new(), "L", date(2025, 1, 1), 10);
        inv.expire_batch(batch_id, None, at(2024, 12, 1)).unwrap();

        let err = inv.expire_batch(batch_id, None, at(2024, 12, 2)).unwrap_err();
        assert!(matches!(err, InventoryError::Invalid(_)));
    }

    #[test]
    fn projection_can_be_rebuilt_from_the_store() {
        let inv = inventory();
        let medication_id = MedicationId::new();
        let batch_id = receive(&inv, medication_id, "L", date(2025, 1, 1), 10);
        inv.reserve(batch_id, 3, at(2024, 12, 1)).unwrap();

        let history = inv.dispatcher().store().all_events().unwrap();
        inv.rebuild_projection(history).unwrap();

        let listing = inv.list_available_batches(medication_id, date(2024, 12, 1)).unwrap();
        assert_eq!(listing.total_available(), 7);
    }
}
