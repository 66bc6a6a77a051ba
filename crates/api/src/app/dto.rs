use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use dispensary_core::{DomainError, MedicationId, UserId};
use dispensary_dispensing::{
    AllocationDraft, AllocationLine, DispenseMode, Dosing, Prescription, PrescriptionId, PrescriptionLine,
    PrescriptionLineId,
};
use dispensary_inventory::BatchSnapshot;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PrescriptionLineRequest {
    /// Omitted ids are generated; send them back unchanged to keep lines stable.
    pub id: Option<PrescriptionLineId>,
    pub medication_id: MedicationId,
    pub required_quantity: u64,
    #[serde(default)]
    pub dosing: Dosing,
}

#[derive(Debug, Deserialize)]
pub struct UpsertPrescriptionRequest {
    pub lines: Vec<PrescriptionLineRequest>,
}

impl UpsertPrescriptionRequest {
    pub fn into_prescription(self, id: PrescriptionId) -> Result<Prescription, DomainError> {
        let lines = self
            .lines
            .into_iter()
            .map(|l| {
                let mut line = PrescriptionLine::new(l.medication_id, l.required_quantity).with_dosing(l.dosing);
                if let Some(line_id) = l.id {
                    line.id = line_id;
                }
                line
            })
            .collect();
        Prescription::new(id, lines)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReceiveBatchRequest {
    pub medication_id: MedicationId,
    pub lot_number: String,
    pub expiration_date: NaiveDate,
    pub manufacturing_date: NaiveDate,
    pub quantity: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExpireBatchRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmDispenseRequest {
    pub mode: DispenseMode,
    pub lines: AllocationDraft,
    pub notes: Option<String>,
    pub performed_by: UserId,
}

#[derive(Debug, Deserialize)]
pub struct CancelDispenseRequest {
    pub reason: String,
    pub notes: Option<String>,
    pub performed_by: UserId,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ProposalResponse {
    pub prescription_id: PrescriptionId,
    pub quantity_allocated: u64,
    pub lines: Vec<AllocationLine>,
}

impl ProposalResponse {
    pub fn new(prescription_id: PrescriptionId, draft: AllocationDraft) -> Self {
        let lines = draft.into_lines();
        Self {
            prescription_id,
            quantity_allocated: lines.iter().map(|l| l.allocated_quantity).sum(),
            lines,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchListResponse {
    pub medication_id: MedicationId,
    pub total_available: u64,
    /// FEFO order.
    pub batches: Vec<BatchSnapshot>,
}
