//! In-memory stand-in for the upstream prescription system.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use dispensary_dispensing::{DispenseError, Prescription, PrescriptionId, PrescriptionSource};

#[derive(Debug, Default)]
pub struct InMemoryPrescriptionSource {
    by_id: RwLock<HashMap<PrescriptionId, Prescription>>,
}

impl InMemoryPrescriptionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the current version of a prescription.
    pub fn upsert(&self, prescription: Prescription) -> Result<(), DispenseError> {
        let mut by_id = self
            .by_id
            .write()
            .map_err(|_| DispenseError::Store("prescription lock poisoned".into()))?;
        debug!(prescription_id = %prescription.id, lines = prescription.lines.len(), "prescription stored");
        by_id.insert(prescription.id, prescription);
        Ok(())
    }
}

impl PrescriptionSource for InMemoryPrescriptionSource {
    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription, DispenseError> {
        self.by_id
            .read()
            .map_err(|_| DispenseError::Store("prescription lock poisoned".into()))?
            .get(&id)
            .cloned()
            .ok_or_else(|| DispenseError::not_found(format!("prescription {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispensary_core::MedicationId;
    use dispensary_dispensing::PrescriptionLine;

    #[test]
    fn upsert_replaces_the_current_version() {
        let source = InMemoryPrescriptionSource::new();
        let id = PrescriptionId::generate();
        let medication_id = MedicationId::new();

        source
            .upsert(Prescription::new(id, vec![PrescriptionLine::new(medication_id, 30)]).unwrap())
            .unwrap();
        source
            .upsert(Prescription::new(id, vec![PrescriptionLine::new(medication_id, 20)]).unwrap())
            .unwrap();

        assert_eq!(source.get_prescription(id).unwrap().quantity_required(), 20);
        assert!(matches!(
            source.get_prescription(PrescriptionId::generate()),
            Err(DispenseError::NotFound(_))
        ));
    }
}
