//! Append-only in-memory dispense record store.

use std::collections::HashMap;
use std::sync::RwLock;

use dispensary_dispensing::{
    DispenseError, DispenseId, DispenseRecord, DispenseRecordStore, PrescriptionId,
};

#[derive(Debug, Default)]
struct Records {
    log: Vec<DispenseRecord>,
    index: HashMap<DispenseId, usize>,
}

/// Records are never updated or removed once appended.
#[derive(Debug, Default)]
pub struct InMemoryDispenseRecordStore {
    records: RwLock<Records>,
}

impl InMemoryDispenseRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.log.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DispenseRecordStore for InMemoryDispenseRecordStore {
    fn append(&self, record: DispenseRecord) -> Result<(), DispenseError> {
        record.check_invariants()?;

        let mut records = self
            .records
            .write()
            .map_err(|_| DispenseError::Store("record store lock poisoned".into()))?;
        let id = record.id_typed();
        if records.index.contains_key(&id) {
            return Err(DispenseError::Store(format!("dispense {id} already recorded")));
        }
        let position = records.log.len();
        records.log.push(record);
        records.index.insert(id, position);
        Ok(())
    }

    fn get(&self, id: DispenseId) -> Result<DispenseRecord, DispenseError> {
        let records = self
            .records
            .read()
            .map_err(|_| DispenseError::Store("record store lock poisoned".into()))?;
        records
            .index
            .get(&id)
            .and_then(|&i| records.log.get(i))
            .cloned()
            .ok_or_else(|| DispenseError::not_found(format!("dispense {id}")))
    }

    fn list_for_prescription(&self, prescription_id: PrescriptionId) -> Result<Vec<DispenseRecord>, DispenseError> {
        let records = self
            .records
            .read()
            .map_err(|_| DispenseError::Store("record store lock poisoned".into()))?;
        Ok(records
            .log
            .iter()
            .filter(|r| r.prescription_id() == prescription_id)
            .cloned()
            .collect())
    }
}
