//! Collaborator seams for the dispensing engine.

use std::sync::Arc;

use crate::error::DispenseError;
use crate::prescription::{Prescription, PrescriptionId};
use crate::record::{DispenseId, DispenseRecord};

/// Read access to the current version of a prescription.
pub trait PrescriptionSource: Send + Sync {
    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription, DispenseError>;
}

/// Append-only persistence for dispense records.
pub trait DispenseRecordStore: Send + Sync {
    /// Persist a new record. Appending an id that already exists is an error.
    fn append(&self, record: DispenseRecord) -> Result<(), DispenseError>;

    fn get(&self, id: DispenseId) -> Result<DispenseRecord, DispenseError>;

    /// Records for one prescription, oldest first.
    fn list_for_prescription(&self, prescription_id: PrescriptionId) -> Result<Vec<DispenseRecord>, DispenseError>;
}

impl<P> PrescriptionSource for Arc<P>
where
    P: PrescriptionSource + ?Sized,
{
    fn get_prescription(&self, id: PrescriptionId) -> Result<Prescription, DispenseError> {
        (**self).get_prescription(id)
    }
}

impl<R> DispenseRecordStore for Arc<R>
where
    R: DispenseRecordStore + ?Sized,
{
    fn append(&self, record: DispenseRecord) -> Result<(), DispenseError> {
        (**self).append(record)
    }

    fn get(&self, id: DispenseId) -> Result<DispenseRecord, DispenseError> {
        (**self).get(id)
    }

    fn list_for_prescription(&self, prescription_id: PrescriptionId) -> Result<Vec<DispenseRecord>, DispenseError> {
        (**self).list_for_prescription(prescription_id)
    }
}
