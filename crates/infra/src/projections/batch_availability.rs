use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use dispensary_core::{AggregateId, MedicationId};
use dispensary_events::EventEnvelope;
use dispensary_inventory::{BatchEvent, BatchId, BatchSnapshot, BatchState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchProjectionError {
    #[error("failed to deserialize batch event: {0}")]
    Deserialize(String),

    #[error("event for batch {event} arrived on stream {stream}")]
    StreamMismatch { stream: AggregateId, event: AggregateId },

    /// A gap or reordering: the caller should rebuild the stream.
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("event for batch {0} before it was received")]
    UnknownBatch(BatchId),

    #[error("projection lock poisoned")]
    Poisoned,
}

#[derive(Debug, Default)]
struct State {
    batches: HashMap<BatchId, BatchSnapshot>,
    by_medication: HashMap<MedicationId, BTreeSet<BatchId>>,
    cursors: HashMap<AggregateId, u64>,
}

/// Current batch views indexed by medication, for FEFO listings.
///
/// Consumes published batch envelopes (JSON payloads). Each stream must be
/// applied in sequence order; duplicates are ignored.
#[derive(Debug, Default)]
pub struct BatchAvailabilityProjection {
    state: RwLock<State>,
}

impl BatchAvailabilityProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, batch_id: BatchId) -> Result<Option<BatchSnapshot>, BatchProjectionError> {
        let state = self.state.read().map_err(|_| BatchProjectionError::Poisoned)?;
        Ok(state.batches.get(&batch_id).cloned())
    }

    /// Every known batch of a medication, whatever its state.
    pub fn list_for_medication(&self, medication_id: MedicationId) -> Result<Vec<BatchSnapshot>, BatchProjectionError> {
        let state = self.state.read().map_err(|_| BatchProjectionError::Poisoned)?;
        Ok(state
            .by_medication
            .get(&medication_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.batches.get(id).cloned())
            .collect())
    }

    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), BatchProjectionError> {
        let mut state = self.state.write().map_err(|_| BatchProjectionError::Poisoned)?;
        apply(&mut state, envelope)
    }

    /// Replace one stream's view with a replay of its full history.
    pub fn rebuild_stream(
        &self,
        aggregate_id: AggregateId,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BatchProjectionError> {
        let mut state = self.state.write().map_err(|_| BatchProjectionError::Poisoned)?;
        forget(&mut state, BatchId::new(aggregate_id));

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| e.sequence_number());
        for env in &envs {
            apply(&mut state, env)?;
        }
        Ok(())
    }

    /// Drop everything and replay, ordered by stream then sequence.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), BatchProjectionError> {
        let mut state = self.state.write().map_err(|_| BatchProjectionError::Poisoned)?;
        *state = State::default();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));
        for env in &envs {
            apply(&mut state, env)?;
        }
        Ok(())
    }
}

fn forget(state: &mut State, batch_id: BatchId) {
    state.cursors.remove(&batch_id.0);
    if let Some(old) = state.batches.remove(&batch_id) {
        if let Some(ids) = state.by_medication.get_mut(&old.medication_id) {
            ids.remove(&batch_id);
        }
    }
}

fn apply(state: &mut State, envelope: &EventEnvelope<JsonValue>) -> Result<(), BatchProjectionError> {
    let aggregate_id = envelope.aggregate_id();
    let seq = envelope.sequence_number();
    let last = state.cursors.get(&aggregate_id).copied().unwrap_or(0);

    if seq != 0 && seq <= last {
        return Ok(());
    }
    if seq != last + 1 {
        return Err(BatchProjectionError::NonMonotonicSequence { last, found: seq });
    }

    let event: BatchEvent = serde_json::from_value(envelope.payload().clone())
        .map_err(|e| BatchProjectionError::Deserialize(e.to_string()))?;
    let batch_id = event.batch_id();
    if batch_id.0 != aggregate_id {
        return Err(BatchProjectionError::StreamMismatch {
            stream: aggregate_id,
            event: batch_id.0,
        });
    }

    match event {
        BatchEvent::BatchReceived(e) => {
            state.by_medication.entry(e.medication_id).or_default().insert(batch_id);
            state.batches.insert(
                batch_id,
                BatchSnapshot {
                    batch_id,
                    medication_id: e.medication_id,
                    lot_number: e.lot_number,
                    expiration_date: e.expiration_date,
                    manufacturing_date: e.manufacturing_date,
                    initial_quantity: e.quantity,
                    available_quantity: e.quantity,
                    state: BatchState::Active,
                    version: seq,
                },
            );
        }
        other => {
            let snapshot = state
                .batches
                .get_mut(&batch_id)
                .ok_or(BatchProjectionError::UnknownBatch(batch_id))?;
            match other {
                BatchEvent::StockReserved(e) => {
                    snapshot.available_quantity = e.remaining;
                    if e.remaining == 0 && snapshot.state == BatchState::Active {
                        snapshot.state = BatchState::Depleted;
                    }
                }
                BatchEvent::StockReleased(e) => {
                    snapshot.available_quantity = e.remaining;
                    if e.remaining > 0 && snapshot.state == BatchState::Depleted {
                        snapshot.state = BatchState::Active;
                    }
                }
                BatchEvent::BatchExpired(_) => snapshot.state = BatchState::Expired,
                BatchEvent::BatchReceived(_) => {}
            }
            snapshot.version = seq;
        }
    }

    state.cursors.insert(aggregate_id, seq);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use dispensary_inventory::{BatchReceived, StockReleased, StockReserved};
    use uuid::Uuid;

    fn envelope(batch_id: BatchId, seq: u64, event: BatchEvent) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            Uuid::now_v7(),
            batch_id.0,
            "pharmacy.batch",
            seq,
            serde_json::to_value(event).unwrap(),
        )
    }

    fn received(batch_id: BatchId, medication_id: MedicationId, quantity: u64) -> BatchEvent {
        BatchEvent::BatchReceived(BatchReceived {
            batch_id,
            medication_id,
            lot_number: "L-7".to_string(),
            expiration_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
            manufacturing_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            quantity,
            occurred_at: Utc::now(),
        })
    }

    fn reserved(batch_id: BatchId, quantity: u64, remaining: u64) -> BatchEvent {
        BatchEvent::StockReserved(StockReserved {
            batch_id,
            quantity,
            remaining,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn tracks_quantity_and_depletion() {
        let projection = BatchAvailabilityProjection::new();
        let (batch_id, medication_id) = (BatchId::generate(), MedicationId::new());

        projection.apply_envelope(&envelope(batch_id, 1, received(batch_id, medication_id, 10))).unwrap();
        projection.apply_envelope(&envelope(batch_id, 2, reserved(batch_id, 10, 0))).unwrap();

        let snapshot = projection.get(batch_id).unwrap().unwrap();
        assert_eq!(snapshot.available_quantity, 0);
        assert_eq!(snapshot.state, BatchState::Depleted);
        assert_eq!(snapshot.version, 2);

        projection
            .apply_envelope(&envelope(
                batch_id,
                3,
                BatchEvent::StockReleased(StockReleased {
                    batch_id,
                    quantity: 4,
                    remaining: 4,
                    occurred_at: Utc::now(),
                }),
            ))
            .unwrap();
        assert_eq!(projection.get(batch_id).unwrap().unwrap().state, BatchState::Active);
        assert_eq!(projection.list_for_medication(medication_id).unwrap().len(), 1);
    }

    #[test]
    fn duplicates_are_ignored_and_gaps_rejected() {
        let projection = BatchAvailabilityProjection::new();
        let (batch_id, medication_id) = (BatchId::generate(), MedicationId::new());
        let first = envelope(batch_id, 1, received(batch_id, medication_id, 10));

        projection.apply_envelope(&first).unwrap();
        projection.apply_envelope(&first).unwrap();
        assert_eq!(projection.get(batch_id).unwrap().unwrap().version, 1);

        let err = projection
            .apply_envelope(&envelope(batch_id, 3, reserved(batch_id, 1, 9)))
            .unwrap_err();
        assert_eq!(err, BatchProjectionError::NonMonotonicSequence { last: 1, found: 3 });
    }

    #[test]
    fn rebuild_stream_recovers_from_a_gap() {
        let projection = BatchAvailabilityProjection::new();
        let (batch_id, medication_id) = (BatchId::generate(), MedicationId::new());
        let history = vec![
            envelope(batch_id, 2, reserved(batch_id, 3, 7)),
            envelope(batch_id, 1, received(batch_id, medication_id, 10)),
            envelope(batch_id, 3, reserved(batch_id, 2, 5)),
        ];
        projection.apply_envelope(&history[1]).unwrap();

        projection.rebuild_stream(batch_id.0, history).unwrap();
        let snapshot = projection.get(batch_id).unwrap().unwrap();
        assert_eq!(snapshot.available_quantity, 5);
        assert_eq!(snapshot.version, 3);
    }

    #[test]
    fn event_on_the_wrong_stream_is_rejected() {
        let projection = BatchAvailabilityProjection::new();
        let batch_id = BatchId::generate();
        let other = BatchId::generate();

        let err = projection
            .apply_envelope(&envelope(other, 1, received(batch_id, MedicationId::new(), 1)))
            .unwrap_err();
        assert!(matches!(err, BatchProjectionError::StreamMismatch { .. }));
    }

    #[test]
    fn reads_fail_loudly_once_the_lock_is_poisoned() {
        let projection = std::sync::Arc::new(BatchAvailabilityProjection::new());
        let (batch_id, medication_id) = (BatchId::generate(), MedicationId::new());
        projection.apply_envelope(&envelope(batch_id, 1, received(batch_id, medication_id, 10))).unwrap();

        let writer = std::sync::Arc::clone(&projection);
        let crashed = std::thread::spawn(move || {
            let _guard = writer.state.write().unwrap();
            panic!("writer crashed mid-update");
        })
        .join();
        assert!(crashed.is_err());

        assert_eq!(projection.get(batch_id), Err(BatchProjectionError::Poisoned));
        assert_eq!(
            projection.list_for_medication(medication_id),
            Err(BatchProjectionError::Poisoned)
        );
    }
}
