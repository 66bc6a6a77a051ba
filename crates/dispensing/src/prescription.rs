//! Prescriptions as read from the upstream prescription system.
//!
//! The engine never edits a prescription; it only reads the current version.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use dispensary_core::{DomainError, Entity, MedicationId, ValueObject};

typed_id!(
    /// Prescription identifier (owned by the prescription system).
    PrescriptionId
);

typed_id!(
    /// Identifier of one line of a prescription.
    PrescriptionLineId
);

/// Dosing metadata carried along for display and audit; never used in allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dosing {
    pub dose: Option<String>,
    pub frequency: Option<String>,
    pub duration_days: Option<u32>,
    pub route: Option<String>,
    pub instructions: Option<String>,
}

impl ValueObject for Dosing {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionLine {
    pub id: PrescriptionLineId,
    pub medication_id: MedicationId,
    pub required_quantity: u64,
    #[serde(default)]
    pub dosing: Dosing,
}

impl PrescriptionLine {
    pub fn new(medication_id: MedicationId, required_quantity: u64) -> Self {
        Self {
            id: PrescriptionLineId::generate(),
            medication_id,
            required_quantity,
            dosing: Dosing::default(),
        }
    }

    pub fn with_dosing(mut self, dosing: Dosing) -> Self {
        self.dosing = dosing;
        self
    }
}

/// An ordered set of prescription lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: PrescriptionId,
    pub lines: Vec<PrescriptionLine>,
}

impl Prescription {
    /// Build a prescription, rejecting duplicate line ids.
    pub fn new(id: PrescriptionId, lines: Vec<PrescriptionLine>) -> Result<Self, DomainError> {
        let mut seen = HashSet::with_capacity(lines.len());
        for line in &lines {
            if !seen.insert(line.id) {
                return Err(DomainError::validation(format!(
                    "duplicate prescription line {}",
                    line.id
                )));
            }
        }
        Ok(Self { id, lines })
    }

    pub fn line(&self, line_id: PrescriptionLineId) -> Option<&PrescriptionLine> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn lines(&self) -> &[PrescriptionLine] {
        &self.lines
    }

    pub fn quantity_required(&self) -> u64 {
        self.lines.iter().map(|l| l.required_quantity).sum()
    }
}

impl Entity for Prescription {
    type Id = PrescriptionId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_line_ids_are_rejected() {
        let line = PrescriptionLine::new(MedicationId::new(), 3);
        let err = Prescription::new(PrescriptionId::generate(), vec![line.clone(), line]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn quantity_required_sums_lines() {
        let prescription = Prescription::new(
            PrescriptionId::generate(),
            vec![
                PrescriptionLine::new(MedicationId::new(), 30),
                PrescriptionLine::new(MedicationId::new(), 12),
            ],
        )
        .unwrap();
        assert_eq!(prescription.quantity_required(), 42);
    }
}
