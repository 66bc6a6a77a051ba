//! Dispensed-vs-required statistics, rebuilt from a dispense record and the
//! current prescription.
//!
//! Records are immutable and may only list the medications actually touched,
//! so the untouched lines come from the live prescription. Allocation lines are
//! joined to prescription lines by medication id, not line id: historical line
//! ids do not have to survive prescription edits. Allocations for medications
//! no longer on the prescription are ignored.
//!
//! Reconciliation is a pure function of its two inputs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dispensary_core::MedicationId;

use crate::prescription::{Prescription, PrescriptionId, PrescriptionLineId};
use crate::record::{DispenseId, DispenseMode, DispenseRecord};

/// Per-line breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReconciliation {
    pub prescription_line_id: PrescriptionLineId,
    pub medication_id: MedicationId,
    pub required: u64,
    pub dispensed: u64,
    pub missing: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationStats {
    pub dispense_id: DispenseId,
    pub prescription_id: PrescriptionId,
    pub mode: DispenseMode,
    /// Distinct prescription lines.
    pub medications_required: usize,
    pub quantity_required: u64,
    pub quantity_dispensed: u64,
    /// Never negative: each line's shortfall is clamped at zero.
    pub quantity_missing: u64,
    pub completion_percentage: u32,
    pub lines: Vec<LineReconciliation>,
}

/// `round(100 * dispensed / required)`, half up, in integer arithmetic.
///
/// Zero when nothing is required. Not capped: inconsistent historical data may
/// produce a value above 100.
pub fn completion_percentage(dispensed: u64, required: u64) -> u32 {
    if required == 0 {
        return 0;
    }
    let (d, r) = (u128::from(dispensed), u128::from(required));
    let pct = (d * 200 + r) / (r * 2);
    u32::try_from(pct).unwrap_or(u32::MAX)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconciliationCalculator;

impl ReconciliationCalculator {
    pub fn reconcile(record: &DispenseRecord, prescription: &Prescription) -> ReconciliationStats {
        let lines = match record.mode() {
            // Fixed outcome; any stray allocation data is disregarded.
            DispenseMode::Cancelled => prescription
                .lines()
                .iter()
                .map(|l| LineReconciliation {
                    prescription_line_id: l.id,
                    medication_id: l.medication_id,
                    required: l.required_quantity,
                    dispensed: 0,
                    missing: l.required_quantity,
                })
                .collect(),
            DispenseMode::Complete | DispenseMode::Partial => attribute(record, prescription),
        };

        let quantity_required: u64 = lines.iter().map(|l| l.required).sum();
        let quantity_dispensed: u64 = lines.iter().map(|l| l.dispensed).sum();
        let quantity_missing: u64 = lines.iter().map(|l| l.missing).sum();

        ReconciliationStats {
            dispense_id: record.id_typed(),
            prescription_id: record.prescription_id(),
            mode: record.mode(),
            medications_required: prescription.lines().len(),
            quantity_required,
            quantity_dispensed,
            quantity_missing,
            completion_percentage: completion_percentage(quantity_dispensed, quantity_required),
            lines,
        }
    }
}

/// Pool dispensed units per medication and hand them to the current lines of
/// that medication in prescription order; the last such line takes any excess.
fn attribute(record: &DispenseRecord, prescription: &Prescription) -> Vec<LineReconciliation> {
    let mut pool: HashMap<MedicationId, u64> = HashMap::new();
    for a in record.allocation_lines() {
        let units = pool.entry(a.medication_id).or_insert(0);
        *units = units.saturating_add(a.allocated_quantity);
    }

    let mut last_line_of: HashMap<MedicationId, usize> = HashMap::new();
    for (idx, line) in prescription.lines().iter().enumerate() {
        last_line_of.insert(line.medication_id, idx);
    }

    prescription
        .lines()
        .iter()
        .enumerate()
        .map(|(idx, line)| {
            let left = pool.entry(line.medication_id).or_insert(0);
            let dispensed = if last_line_of.get(&line.medication_id) == Some(&idx) {
                *left
            } else {
                (*left).min(line.required_quantity)
            };
            *left -= dispensed;

            LineReconciliation {
                prescription_line_id: line.id,
                medication_id: line.medication_id,
                required: line.required_quantity,
                dispensed,
                missing: line.required_quantity.saturating_sub(dispensed),
            }
        })
        .collect()
}
