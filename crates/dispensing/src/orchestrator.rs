//! Entry points consumed by the API layer.
//!
//! The persisted `DispenseRecord` is the only source of truth once a dispense
//! is confirmed: where a prescription stands is re-derived from its records on
//! every call. Confirmations and cancellations of one prescription are
//! serialized so two callers cannot both pass that check.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use dispensary_core::{Clock, MedicationId, SystemClock, UserId};
use dispensary_events::{Event, EventBus, EventEnvelope};
use dispensary_inventory::{AvailableBatches, BatchId, BatchInventory, BatchSnapshot};

use crate::allocation::{AllocationDraft, FefoAllocator};
use crate::error::DispenseError;
use crate::ports::{DispenseRecordStore, PrescriptionSource};
use crate::prescription::{Prescription, PrescriptionId};
use crate::reconciliation::{ReconciliationCalculator, ReconciliationStats};
use crate::record::{DispenseEvent, DispenseId, DispenseMode, DispenseRecord};
use crate::validator::{ConfirmContext, DispenseHistory, DispenseValidator, PendingDispense};

pub const DISPENSE_AGGREGATE_TYPE: &str = "pharmacy.dispense";

pub struct DispenseOrchestrator<P, I, R, B> {
    prescriptions: P,
    validator: DispenseValidator<I>,
    records: R,
    bus: B,
    clock: Arc<dyn Clock>,
    guards: Mutex<HashMap<PrescriptionId, Arc<Mutex<()>>>>,
}

impl<P, I, R, B> DispenseOrchestrator<P, I, R, B>
where
    P: PrescriptionSource,
    I: BatchInventory,
    R: DispenseRecordStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(prescriptions: P, inventory: I, records: R, bus: B) -> Self {
        Self {
            prescriptions,
            validator: DispenseValidator::new(inventory),
            records,
            bus,
            clock: Arc::new(SystemClock),
            guards: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn inventory(&self) -> &I {
        self.validator.inventory()
    }

    /// Dispensable batches of a medication as of today, FEFO-ordered.
    pub fn available_batches(&self, medication_id: MedicationId) -> Result<AvailableBatches, DispenseError> {
        Ok(self
            .inventory()
            .list_available_batches(medication_id, self.clock.today())?)
    }

    /// Automatic complete-dispense proposal for what is still owed. Reads
    /// only; nothing is reserved.
    ///
    /// Lines that share a medication draw from the same batches: units proposed
    /// for an earlier line are not offered again to a later one.
    #[instrument(skip_all, fields(prescription_id = %prescription_id))]
    pub fn propose(&self, prescription_id: PrescriptionId) -> Result<AllocationDraft, DispenseError> {
        let prescription = self.prescriptions.get_prescription(prescription_id)?;
        let history = DispenseHistory::from_records(&self.records.list_for_prescription(prescription_id)?);
        history.ensure_open(&prescription)?;
        let prescription = history.outstanding(&prescription);
        let as_of = self.clock.today();

        let mut listings: HashMap<MedicationId, Vec<BatchSnapshot>> = HashMap::new();
        let mut proposed: HashMap<BatchId, u64> = HashMap::new();
        let mut draft = AllocationDraft::new();

        for line in prescription.lines() {
            if !listings.contains_key(&line.medication_id) {
                let listing = self
                    .inventory()
                    .list_available_batches(line.medication_id, as_of)?
                    .into_vec();
                listings.insert(line.medication_id, listing);
            }
            let candidates: Vec<BatchSnapshot> = listings
                .get(&line.medication_id)
                .map(Vec::as_slice)
                .unwrap_or_default()
                .iter()
                .cloned()
                .map(|mut b| {
                    let taken = proposed.get(&b.batch_id).copied().unwrap_or(0);
                    b.available_quantity = b.available_quantity.saturating_sub(taken);
                    b
                })
                .collect();

            for pick in FefoAllocator::propose_complete(line, &candidates)? {
                *proposed.entry(pick.batch_id).or_insert(0) += pick.allocated_quantity;
                draft.stage(pick);
            }
        }

        debug!(lines = draft.lines().len(), "allocation proposed");
        Ok(draft)
    }

    /// Validate and commit a complete or partial dispense, then persist it.
    ///
    /// Cancellation goes through [`cancel`](Self::cancel).
    #[instrument(skip_all, fields(prescription_id = %prescription_id, %mode))]
    pub fn confirm(
        &self,
        prescription_id: PrescriptionId,
        mode: DispenseMode,
        draft: AllocationDraft,
        notes: Option<String>,
        performed_by: UserId,
    ) -> Result<DispenseRecord, DispenseError> {
        let guard = self.guard(prescription_id)?;
        let _held = guard.lock().map_err(|_| poisoned())?;

        let prescription = self.prescriptions.get_prescription(prescription_id)?;
        let history = self.open_history(&prescription)?;
        let ctx = ConfirmContext {
            performed_by,
            notes,
            occurred_at: self.clock.now(),
        };
        let mut pending = PendingDispense::new(history.outstanding(&prescription), draft);

        let record = match mode {
            DispenseMode::Complete => self.validator.confirm_complete(&mut pending, ctx)?,
            DispenseMode::Partial => self.validator.confirm_partial(&mut pending, ctx)?,
            DispenseMode::Cancelled => {
                return Err(DispenseError::invalid(
                    "cancellation requires a reason; use the cancel operation",
                ));
            }
        };

        if let Err(e) = self.records.append(record.clone()) {
            warn!(dispense_id = %record.id_typed(), error = %e, "persisting dispense failed; releasing stock");
            self.validator.compensate(&record, self.clock.now())?;
            return Err(e);
        }

        self.publish(&record);
        Ok(record)
    }

    /// Record a cancellation. Stock is never touched. Allowed after partial
    /// dispenses; it closes whatever they left undispensed.
    #[instrument(skip_all, fields(prescription_id = %prescription_id))]
    pub fn cancel(
        &self,
        prescription_id: PrescriptionId,
        reason: &str,
        notes: Option<String>,
        performed_by: UserId,
    ) -> Result<DispenseRecord, DispenseError> {
        let guard = self.guard(prescription_id)?;
        let _held = guard.lock().map_err(|_| poisoned())?;

        let prescription = self.prescriptions.get_prescription(prescription_id)?;
        self.open_history(&prescription)?;
        let ctx = ConfirmContext {
            performed_by,
            notes,
            occurred_at: self.clock.now(),
        };
        let mut pending = PendingDispense::new(prescription, AllocationDraft::new());
        let record = self.validator.confirm_cancelled(&mut pending, reason, ctx)?;

        self.records.append(record.clone())?;
        self.publish(&record);
        Ok(record)
    }

    /// Statistics for a persisted record against the current prescription.
    pub fn reconcile(&self, dispense_id: DispenseId) -> Result<ReconciliationStats, DispenseError> {
        let record = self.records.get(dispense_id)?;
        let prescription = self.prescriptions.get_prescription(record.prescription_id())?;
        Ok(ReconciliationCalculator::reconcile(&record, &prescription))
    }

    /// Every record for a prescription, oldest first.
    pub fn history(&self, prescription_id: PrescriptionId) -> Result<Vec<DispenseRecord>, DispenseError> {
        self.records.list_for_prescription(prescription_id)
    }

    fn open_history(&self, prescription: &Prescription) -> Result<DispenseHistory, DispenseError> {
        let history = DispenseHistory::from_records(&self.records.list_for_prescription(prescription.id)?);
        if let Err(e) = history.ensure_open(prescription) {
            warn!(prescription_id = %prescription.id, state = ?history.state(), "dispense refused");
            return Err(e);
        }
        Ok(history)
    }

    /// One lock per prescription, held from the history check to the append.
    fn guard(&self, prescription_id: PrescriptionId) -> Result<Arc<Mutex<()>>, DispenseError> {
        let mut guards = self.guards.lock().map_err(|_| poisoned())?;
        Ok(guards.entry(prescription_id).or_default().clone())
    }

    /// Best effort: the record is already persisted, so a failed publish is
    /// only logged.
    fn publish(&self, record: &DispenseRecord) {
        let event = DispenseEvent::Recorded(record.clone());
        let data = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!(dispense_id = %record.id_typed(), error = %e, "dispense event not serializable");
                return;
            }
        };

        let mut payload = serde_json::Map::new();
        payload.insert("event_type".into(), event.event_type().into());
        payload.insert("event_version".into(), event.version().into());
        payload.insert("data".into(), data);

        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            record.id_typed().0,
            DISPENSE_AGGREGATE_TYPE,
            1,
            JsonValue::Object(payload),
        );
        match self.bus.publish(envelope) {
            Ok(()) => info!(dispense_id = %record.id_typed(), event_type = event.event_type(), "dispense event published"),
            Err(e) => warn!(dispense_id = %record.id_typed(), error = ?e, "dispense event publish failed"),
        }
    }
}

fn poisoned() -> DispenseError {
    DispenseError::Store("prescription guard poisoned".into())
}
