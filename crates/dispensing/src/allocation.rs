//! Allocation lines, staged drafts, and the FEFO allocator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use dispensary_core::{MedicationId, ValueObject};
use dispensary_inventory::{BatchId, BatchSnapshot, BatchState};

use crate::error::DispenseError;
use crate::prescription::{PrescriptionLine, PrescriptionLineId};

/// Units of one batch assigned to one prescription line.
///
/// `medication_id` is copied from the line so historical records can be joined
/// against a prescription whose line ids have since changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub prescription_line_id: PrescriptionLineId,
    pub medication_id: MedicationId,
    pub batch_id: BatchId,
    pub allocated_quantity: u64,
}

impl ValueObject for AllocationLine {}

/// Staged allocation choices for one prescription (the per-row quantities a
/// pharmacist edits before confirming).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationDraft {
    lines: Vec<AllocationLine>,
}

impl AllocationDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_lines(lines: Vec<AllocationLine>) -> Self {
        Self { lines }
    }

    /// Set the quantity picked from `batch_id` for a prescription line.
    ///
    /// Replaces an earlier pick of the same (line, batch) pair; a zero
    /// quantity removes it.
    pub fn stage(&mut self, line: AllocationLine) {
        let existing = self.lines.iter().position(|l| {
            l.prescription_line_id == line.prescription_line_id && l.batch_id == line.batch_id
        });
        match (existing, line.allocated_quantity) {
            (Some(idx), 0) => {
                self.lines.remove(idx);
            }
            (Some(idx), _) => self.lines[idx] = line,
            (None, 0) => {}
            (None, _) => self.lines.push(line),
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[AllocationLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<AllocationLine> {
        self.lines
    }

    pub fn allocated_for(&self, line_id: PrescriptionLineId) -> u64 {
        self.lines
            .iter()
            .filter(|l| l.prescription_line_id == line_id)
            .map(|l| l.allocated_quantity)
            .sum()
    }

    /// Units requested per batch across the whole draft.
    pub fn per_batch(&self) -> HashMap<BatchId, u64> {
        let mut totals = HashMap::new();
        for l in &self.lines {
            *totals.entry(l.batch_id).or_insert(0) += l.allocated_quantity;
        }
        totals
    }
}

/// First-Expire-First-Out allocation.
///
/// `propose_complete` is the automatic fast path; `validate_manual` accepts any
/// selection that fits, in any order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FefoAllocator;

impl FefoAllocator {
    /// Greedily take `min(remaining, available)` from each candidate in FEFO
    /// order until the line is satisfied.
    ///
    /// Never returns a short proposal: running out of candidates is
    /// `InsufficientStock`.
    pub fn propose_complete(
        line: &PrescriptionLine,
        candidates: &[BatchSnapshot],
    ) -> Result<Vec<AllocationLine>, DispenseError> {
        let mut ordered: Vec<&BatchSnapshot> = candidates
            .iter()
            .filter(|b| {
                b.medication_id == line.medication_id
                    && b.state == BatchState::Active
                    && b.available_quantity > 0
            })
            .collect();
        ordered.sort_by(|a, b| a.fefo_cmp(b));

        let mut remaining = line.required_quantity;
        let mut proposal = Vec::new();
        for batch in ordered {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(batch.available_quantity);
            proposal.push(AllocationLine {
                prescription_line_id: line.id,
                medication_id: line.medication_id,
                batch_id: batch.batch_id,
                allocated_quantity: take,
            });
            remaining -= take;
        }

        if remaining > 0 {
            let available = line.required_quantity - remaining;
            return Err(DispenseError::InsufficientStock(format!(
                "medication {} needs {}, only {} available",
                line.medication_id, line.required_quantity, available
            )));
        }

        Ok(proposal)
    }

    /// Check a hand-picked selection for one line against batch stock and the
    /// required quantity. FEFO order is not enforced.
    ///
    /// Returns the total allocated to the line.
    pub fn validate_manual(
        line: &PrescriptionLine,
        proposed: &[AllocationLine],
        batches: &HashMap<BatchId, BatchSnapshot>,
    ) -> Result<u64, DispenseError> {
        let mut per_batch: HashMap<BatchId, u64> = HashMap::new();
        let mut total = 0u64;

        for pick in proposed {
            if pick.prescription_line_id != line.id {
                return Err(DispenseError::invalid(format!(
                    "allocation for line {} submitted under line {}",
                    pick.prescription_line_id, line.id
                )));
            }
            if pick.allocated_quantity == 0 {
                return Err(DispenseError::invalid(format!(
                    "allocation from batch {} must be positive",
                    pick.batch_id
                )));
            }
            if pick.medication_id != line.medication_id {
                return Err(DispenseError::invalid(format!(
                    "allocation names medication {} but line {} prescribes {}",
                    pick.medication_id, line.id, line.medication_id
                )));
            }

            let batch = batches
                .get(&pick.batch_id)
                .ok_or_else(|| DispenseError::not_found(format!("batch {}", pick.batch_id)))?;
            if batch.medication_id != line.medication_id {
                return Err(DispenseError::invalid(format!(
                    "batch {} holds medication {}, not {}",
                    batch.batch_id, batch.medication_id, line.medication_id
                )));
            }

            let from_batch = per_batch.entry(pick.batch_id).or_insert(0);
            *from_batch = from_batch.saturating_add(pick.allocated_quantity);
            if *from_batch > batch.available_quantity {
                return Err(DispenseError::invalid(format!(
                    "batch {} (lot {}) has {} available, {} requested",
                    batch.batch_id, batch.lot_number, batch.available_quantity, from_batch
                )));
            }

            total = total.saturating_add(pick.allocated_quantity);
        }

        if total > line.required_quantity {
            return Err(DispenseError::invalid(format!(
                "line {} requires {}, {} allocated",
                line.id, line.required_quantity, total
            )));
        }

        Ok(total)
    }
}
