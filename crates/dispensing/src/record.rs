//! The append-only dispense record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use dispensary_core::{Entity, UserId};
use dispensary_events::Event;

use crate::allocation::AllocationLine;
use crate::error::DispenseError;
use crate::prescription::PrescriptionId;

typed_id!(
    /// Dispense record identifier.
    DispenseId
);

/// How a dispense ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispenseMode {
    Complete,
    Partial,
    Cancelled,
}

impl DispenseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            DispenseMode::Complete => "complete",
            DispenseMode::Partial => "partial",
            DispenseMode::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for DispenseMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one confirmation. Created once, never edited; corrections are new
/// records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispenseRecord {
    id: DispenseId,
    prescription_id: PrescriptionId,
    mode: DispenseMode,
    allocation_lines: Vec<AllocationLine>,
    cancellation_reason: Option<String>,
    notes: Option<String>,
    recorded_at: DateTime<Utc>,
    performed_by: UserId,
}

impl DispenseRecord {
    pub(crate) fn confirmed(
        prescription_id: PrescriptionId,
        mode: DispenseMode,
        allocation_lines: Vec<AllocationLine>,
        notes: Option<String>,
        recorded_at: DateTime<Utc>,
        performed_by: UserId,
    ) -> Self {
        Self {
            id: DispenseId::generate(),
            prescription_id,
            mode,
            allocation_lines,
            cancellation_reason: None,
            notes,
            recorded_at,
            performed_by,
        }
    }

    pub(crate) fn cancelled(
        prescription_id: PrescriptionId,
        reason: String,
        notes: Option<String>,
        recorded_at: DateTime<Utc>,
        performed_by: UserId,
    ) -> Self {
        Self {
            id: DispenseId::generate(),
            prescription_id,
            mode: DispenseMode::Cancelled,
            allocation_lines: Vec::new(),
            cancellation_reason: Some(reason),
            notes,
            recorded_at,
            performed_by,
        }
    }

    pub fn id_typed(&self) -> DispenseId {
        self.id
    }

    pub fn prescription_id(&self) -> PrescriptionId {
        self.prescription_id
    }

    pub fn mode(&self) -> DispenseMode {
        self.mode
    }

    pub fn allocation_lines(&self) -> &[AllocationLine] {
        &self.allocation_lines
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.recorded_at
    }

    pub fn performed_by(&self) -> UserId {
        self.performed_by
    }

    pub fn quantity_allocated(&self) -> u64 {
        self.allocation_lines.iter().map(|l| l.allocated_quantity).sum()
    }

    /// Structural checks that hold for any record, independent of the
    /// prescription (stores run this on records that arrive deserialized).
    pub fn check_invariants(&self) -> Result<(), DispenseError> {
        let reason = self.cancellation_reason.as_deref().map(str::trim).unwrap_or("");
        match self.mode {
            DispenseMode::Cancelled => {
                if !self.allocation_lines.is_empty() {
                    return Err(DispenseError::invalid("cancelled dispense cannot carry allocations"));
                }
                if reason.is_empty() {
                    return Err(DispenseError::invalid("cancelled dispense needs a reason"));
                }
            }
            DispenseMode::Partial | DispenseMode::Complete => {
                if self.cancellation_reason.is_some() {
                    return Err(DispenseError::invalid(format!(
                        "{} dispense cannot carry a cancellation reason",
                        self.mode
                    )));
                }
                if self.mode == DispenseMode::Partial && self.allocation_lines.is_empty() {
                    return Err(DispenseError::invalid("partial dispense needs at least one allocation"));
                }
                if self.allocation_lines.iter().any(|l| l.allocated_quantity == 0) {
                    return Err(DispenseError::invalid("allocation quantities must be positive"));
                }
            }
        }
        Ok(())
    }
}

impl Entity for DispenseRecord {
    type Id = DispenseId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Published once per persisted record, for read-only consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispenseEvent {
    Recorded(DispenseRecord),
}

impl DispenseEvent {
    pub fn record(&self) -> &DispenseRecord {
        match self {
            DispenseEvent::Recorded(r) => r,
        }
    }
}

impl Event for DispenseEvent {
    fn event_type(&self) -> &'static str {
        match self.record().mode() {
            DispenseMode::Complete => "pharmacy.dispense.complete",
            DispenseMode::Partial => "pharmacy.dispense.partial",
            DispenseMode::Cancelled => "pharmacy.dispense.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.record().recorded_at()
    }
}
