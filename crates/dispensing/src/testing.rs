//! Hand-rolled fakes shared by this crate's unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use dispensary_core::MedicationId;
use dispensary_inventory::{
    AvailableBatches, BatchId, BatchInventory, BatchSnapshot, BatchState, InventoryError,
};

use crate::allocation::AllocationLine;
use crate::error::DispenseError;
use crate::ports::{DispenseRecordStore, PrescriptionSource};
use crate::prescription::{Prescription, PrescriptionId, PrescriptionLine};
use crate::record::{DispenseId, DispenseRecord};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn pick(line: &PrescriptionLine, batch_id: BatchId, quantity: u64) -> AllocationLine {
    AllocationLine {
        prescription_line_id: line.id,
        medication_id: line.medication_id,
        batch_id,
        allocated_quantity: quantity,
    }
}

#[derive(Default)]
struct FakeState {
    batches: HashMap<BatchId, BatchSnapshot>,
    fail_reserve: HashMap<BatchId, InventoryError>,
    fail_release: HashSet<BatchId>,
    reserve_calls: usize,
    release_calls: usize,
}

/// Batch inventory over a plain map, with injectable failures.
#[derive(Default)]
pub struct FakeInventory {
    state: Mutex<FakeState>,
}

impl FakeInventory {
    pub fn add(&self, medication_id: MedicationId, lot: &str, expiration_date: NaiveDate, quantity: u64) -> BatchId {
        let batch_id = BatchId::generate();
        self.state.lock().unwrap().batches.insert(
            batch_id,
            BatchSnapshot {
                batch_id,
                medication_id,
                lot_number: lot.to_string(),
                expiration_date,
                manufacturing_date: date(2023, 1, 1),
                initial_quantity: quantity,
                available_quantity: quantity,
                state: BatchState::Active,
                version: 1,
            },
        );
        batch_id
    }

    pub fn fail_reserve(&self, batch_id: BatchId, error: InventoryError) {
        self.state.lock().unwrap().fail_reserve.insert(batch_id, error);
    }

    pub fn fail_release(&self, batch_id: BatchId) {
        self.state.lock().unwrap().fail_release.insert(batch_id);
    }

    pub fn available(&self, batch_id: BatchId) -> u64 {
        self.state.lock().unwrap().batches[&batch_id].available_quantity
    }

    pub fn state(&self, batch_id: BatchId) -> BatchState {
        self.state.lock().unwrap().batches[&batch_id].state
    }

    pub fn reserve_calls(&self) -> usize {
        self.state.lock().unwrap().reserve_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().unwrap().release_calls
    }
}

impl BatchInventory for FakeInventory {
    fn list_available_batches(
        &self,
        medication_id: MedicationId,
        as_of: NaiveDate,
    ) -> Result<AvailableBatches, InventoryError> {
        let state = self.state.lock().unwrap();
        Ok(AvailableBatches::from_snapshots(
            state
                .batches
                .values()
                .filter(|b| b.medication_id == medication_id)
                .cloned(),
            as_of,
        ))
    }

    fn batch(&self, batch_id: BatchId) -> Result<BatchSnapshot, InventoryError> {
        self.state
            .lock()
            .unwrap()
            .batches
            .get(&batch_id)
            .cloned()
            .ok_or(InventoryError::NotFound(batch_id))
    }

    fn reserve(&self, batch_id: BatchId, quantity: u64, _at: DateTime<Utc>) -> Result<BatchSnapshot, InventoryError> {
        let mut state = self.state.lock().unwrap();
        state.reserve_calls += 1;
        if let Some(e) = state.fail_reserve.get(&batch_id) {
            return Err(e.clone());
        }
        let batch = state.batches.get_mut(&batch_id).ok_or(InventoryError::NotFound(batch_id))?;
        if quantity > batch.available_quantity {
            return Err(InventoryError::InsufficientStock {
                batch_id,
                requested: quantity,
                available: batch.available_quantity,
            });
        }
        batch.available_quantity -= quantity;
        if batch.available_quantity == 0 {
            batch.state = BatchState::Depleted;
        }
        batch.version += 1;
        Ok(batch.clone())
    }

    fn release(&self, batch_id: BatchId, quantity: u64, _at: DateTime<Utc>) -> Result<BatchSnapshot, InventoryError> {
        let mut state = self.state.lock().unwrap();
        state.release_calls += 1;
        if state.fail_release.contains(&batch_id) {
            return Err(InventoryError::Store("release refused".into()));
        }
        let batch = state.batches.get_mut(&batch_id).ok_or(InventoryError::NotFound(batch_id))?;
        batch.available_quantity += quantity;
        if batch.state == BatchState::Depleted {
            batch.state = BatchState::Active;
        }
        batch.version += 1;
        Ok(batch.clone())
    }
}

#[derive(Default)]
pub struct FakePrescriptions {
    by_id: Mutex<HashMap<PrescriptionId, Prescription>>,
}

impl FakePrescriptions {
    pub fn put(&self, prescription: Prescription) {
        self.by_id.lock().unwrap().insert(prescription.id, prescription);
    }
}

impl PrescriptionSource for FakePrescriptions {
    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription, DispenseError> {
        self.by_id
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| DispenseError::not_found(format!("prescription {id}")))
    }
}

#[derive(Default)]
pub struct FakeRecords {
    records: Mutex<Vec<DispenseRecord>>,
    refuse_appends: Mutex<bool>,
}

impl FakeRecords {
    pub fn refuse_appends(&self) {
        *self.refuse_appends.lock().unwrap() = true;
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl DispenseRecordStore for FakeRecords {
    fn append(&self, record: DispenseRecord) -> Result<(), DispenseError> {
        if *self.refuse_appends.lock().unwrap() {
            return Err(DispenseError::Store("disk full".into()));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }

    fn get(&self, id: DispenseId) -> Result<DispenseRecord, DispenseError> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id_typed() == id)
            .cloned()
            .ok_or_else(|| DispenseError::not_found(format!("dispense {id}")))
    }

    fn list_for_prescription(&self, prescription_id: PrescriptionId) -> Result<Vec<DispenseRecord>, DispenseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.prescription_id() == prescription_id)
            .cloned()
            .collect())
    }
}
