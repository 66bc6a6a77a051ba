//! Dispense state machine and the all-or-nothing stock commit.
//!
//! ```text
//!            ┌── confirm_complete ──► ConfirmedComplete
//!   Draft ───┼── confirm_partial  ──► ConfirmedPartial
//!            └── confirm_cancelled ─► ConfirmedCancelled
//! ```
//!
//! Every check runs against a fresh batch snapshot before the first
//! reservation. Reservations are then applied one batch at a time (ascending
//! batch id); if one fails, those already applied are released in reverse
//! order before the error is returned. A failed confirmation leaves the
//! pending dispense in `Draft`, so the same input can be resubmitted.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use dispensary_core::UserId;
use dispensary_inventory::{BatchId, BatchInventory, BatchSnapshot, BatchState};

use crate::allocation::{AllocationDraft, AllocationLine, FefoAllocator};
use crate::error::DispenseError;
use crate::prescription::{Prescription, PrescriptionLineId};
use crate::record::{DispenseMode, DispenseRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispenseState {
    Draft,
    ConfirmedComplete,
    ConfirmedPartial,
    ConfirmedCancelled,
}

impl DispenseState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, DispenseState::Draft)
    }

    pub fn for_mode(mode: DispenseMode) -> Self {
        match mode {
            DispenseMode::Complete => DispenseState::ConfirmedComplete,
            DispenseMode::Partial => DispenseState::ConfirmedPartial,
            DispenseMode::Cancelled => DispenseState::ConfirmedCancelled,
        }
    }

    pub fn can_transition_to(self, next: DispenseState) -> bool {
        self == DispenseState::Draft && next.is_terminal()
    }
}

/// Who confirms, when, and with what note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmContext {
    pub performed_by: UserId,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A prescription with its staged allocation, on its way to a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDispense {
    prescription: Prescription,
    draft: AllocationDraft,
    state: DispenseState,
}

impl PendingDispense {
    pub fn new(prescription: Prescription, draft: AllocationDraft) -> Self {
        Self {
            prescription,
            draft,
            state: DispenseState::Draft,
        }
    }

    pub fn state(&self) -> DispenseState {
        self.state
    }

    pub fn prescription(&self) -> &Prescription {
        &self.prescription
    }

    pub fn draft(&self) -> &AllocationDraft {
        &self.draft
    }

    /// Stage (or change) one pick; only while in `Draft`.
    pub fn stage(&mut self, line: AllocationLine) -> Result<(), DispenseError> {
        self.ensure_draft()?;
        self.draft.stage(line);
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DispenseError> {
        if self.state != DispenseState::Draft {
            return Err(DispenseError::invalid(format!(
                "dispense for prescription {} is already {:?}",
                self.prescription.id, self.state
            )));
        }
        Ok(())
    }

    fn finish(&mut self, next: DispenseState) {
        debug_assert!(self.state.can_transition_to(next));
        self.state = next;
    }
}

/// Where a prescription stands, derived from its persisted records.
///
/// A complete or cancelled record closes the prescription. Partial records
/// leave it open; follow-up dispenses are bounded by what is still owed per
/// line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispenseHistory {
    state: Option<DispenseState>,
    dispensed: HashMap<PrescriptionLineId, u64>,
}

impl DispenseHistory {
    pub fn from_records(records: &[DispenseRecord]) -> Self {
        let mut history = Self::default();
        for record in records {
            let state = DispenseState::for_mode(record.mode());
            history.state = match history.state {
                Some(closed @ (DispenseState::ConfirmedComplete | DispenseState::ConfirmedCancelled)) => Some(closed),
                _ => Some(state),
            };
            for line in record.allocation_lines() {
                *history.dispensed.entry(line.prescription_line_id).or_insert(0) += line.allocated_quantity;
            }
        }
        history
    }

    /// `Draft` when nothing has been recorded yet.
    pub fn state(&self) -> DispenseState {
        self.state.unwrap_or(DispenseState::Draft)
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.state,
            Some(DispenseState::ConfirmedComplete | DispenseState::ConfirmedCancelled)
        )
    }

    pub fn dispensed_for(&self, line_id: PrescriptionLineId) -> u64 {
        self.dispensed.get(&line_id).copied().unwrap_or(0)
    }

    /// The prescription with each line's requirement reduced to what earlier
    /// records left undispensed.
    pub fn outstanding(&self, prescription: &Prescription) -> Prescription {
        let mut owed = prescription.clone();
        for line in &mut owed.lines {
            line.required_quantity = line.required_quantity.saturating_sub(self.dispensed_for(line.id));
        }
        owed
    }

    /// Reject any further dispense once the prescription is closed or fully
    /// covered by earlier partials.
    pub fn ensure_open(&self, prescription: &Prescription) -> Result<(), DispenseError> {
        if self.is_closed() {
            return Err(DispenseError::invalid(format!(
                "prescription {} is already {:?}",
                prescription.id,
                self.state()
            )));
        }
        if self.state.is_some() && self.outstanding(prescription).quantity_required() == 0 {
            return Err(DispenseError::invalid(format!(
                "prescription {} has nothing left to dispense",
                prescription.id
            )));
        }
        Ok(())
    }
}

/// Enforces per-mode invariants and commits reservations against the inventory.
#[derive(Debug)]
pub struct DispenseValidator<I> {
    inventory: I,
}

impl<I> DispenseValidator<I> {
    pub fn new(inventory: I) -> Self {
        Self { inventory }
    }

    pub fn inventory(&self) -> &I {
        &self.inventory
    }
}

impl<I> DispenseValidator<I>
where
    I: BatchInventory,
{
    /// Every line must be allocated exactly its required quantity.
    pub fn confirm_complete(
        &self,
        pending: &mut PendingDispense,
        ctx: ConfirmContext,
    ) -> Result<DispenseRecord, DispenseError> {
        self.confirm_with_stock(pending, DispenseMode::Complete, ctx)
    }

    /// At least one allocation; no line above its requirement. Allowed even
    /// when stock would have covered a complete dispense.
    pub fn confirm_partial(
        &self,
        pending: &mut PendingDispense,
        ctx: ConfirmContext,
    ) -> Result<DispenseRecord, DispenseError> {
        self.confirm_with_stock(pending, DispenseMode::Partial, ctx)
    }

    /// Record a cancellation. Staged lines are discarded; stock is not touched.
    pub fn confirm_cancelled(
        &self,
        pending: &mut PendingDispense,
        reason: &str,
        ctx: ConfirmContext,
    ) -> Result<DispenseRecord, DispenseError> {
        pending.ensure_draft()?;

        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DispenseError::invalid("cancellation reason is required"));
        }

        let discarded = pending.draft.lines().len();
        if discarded > 0 {
            debug!(
                prescription_id = %pending.prescription.id,
                discarded,
                "discarding staged allocation on cancellation"
            );
        }
        pending.draft.clear();
        pending.finish(DispenseState::ConfirmedCancelled);

        let record = DispenseRecord::cancelled(
            pending.prescription.id,
            reason.to_string(),
            ctx.notes,
            ctx.occurred_at,
            ctx.performed_by,
        );
        info!(
            prescription_id = %record.prescription_id(),
            dispense_id = %record.id_typed(),
            "dispense cancelled"
        );
        Ok(record)
    }

    /// Release every reservation a record holds. Used when a committed
    /// dispense could not be persisted.
    pub fn compensate(&self, record: &DispenseRecord, at: DateTime<Utc>) -> Result<(), DispenseError> {
        let applied: Vec<(BatchId, u64)> = merge_by_batch(record.allocation_lines()).into_iter().collect();
        match self.roll_back(&applied, at) {
            0 => Ok(()),
            unreleased => Err(DispenseError::RollbackFailed {
                cause: format!("dispense {} could not be persisted", record.id_typed()),
                unreleased,
            }),
        }
    }

    fn confirm_with_stock(
        &self,
        pending: &mut PendingDispense,
        mode: DispenseMode,
        ctx: ConfirmContext,
    ) -> Result<DispenseRecord, DispenseError> {
        pending.ensure_draft()?;

        if let Err(e) = check_lines(&pending.prescription, &pending.draft, mode) {
            warn!(prescription_id = %pending.prescription.id, %mode, error = %e, "dispense rejected");
            return Err(e);
        }
        if let Err(e) = self.check_stock(pending, ctx.occurred_at) {
            warn!(prescription_id = %pending.prescription.id, %mode, error = %e, "dispense rejected");
            return Err(e);
        }

        if mode == DispenseMode::Partial {
            let complete_possible = pending
                .prescription
                .lines()
                .iter()
                .all(|l| pending.draft.allocated_for(l.id) == l.required_quantity);
            if complete_possible {
                info!(
                    prescription_id = %pending.prescription.id,
                    complete_possible,
                    "partial dispense confirmed for a fully allocated prescription"
                );
            }
        }

        self.commit(pending.draft.lines(), ctx.occurred_at)?;
        pending.finish(DispenseState::for_mode(mode));

        let record = DispenseRecord::confirmed(
            pending.prescription.id,
            mode,
            pending.draft.lines().to_vec(),
            ctx.notes,
            ctx.occurred_at,
            ctx.performed_by,
        );
        info!(
            prescription_id = %record.prescription_id(),
            dispense_id = %record.id_typed(),
            %mode,
            units = record.quantity_allocated(),
            "dispense confirmed"
        );
        Ok(record)
    }

    /// Invariant 2 against current stock, plus per-line manual validation.
    fn check_stock(&self, pending: &PendingDispense, at: DateTime<Utc>) -> Result<(), DispenseError> {
        let today = at.date_naive();
        let requested = pending.draft.per_batch();

        let mut snapshots: HashMap<BatchId, BatchSnapshot> = HashMap::with_capacity(requested.len());
        for (&batch_id, &quantity) in &requested {
            let batch = self.inventory.batch(batch_id)?;
            if batch.state == BatchState::Expired || batch.expiration_date <= today {
                return Err(DispenseError::invalid(format!(
                    "batch {} (lot {}) is expired",
                    batch_id, batch.lot_number
                )));
            }
            if quantity > batch.available_quantity {
                return Err(DispenseError::InsufficientStock(format!(
                    "batch {} (lot {}) has {} available, {} requested",
                    batch_id, batch.lot_number, batch.available_quantity, quantity
                )));
            }
            snapshots.insert(batch_id, batch);
        }

        for line in pending.prescription.lines() {
            let picks: Vec<AllocationLine> = pending
                .draft
                .lines()
                .iter()
                .filter(|a| a.prescription_line_id == line.id)
                .cloned()
                .collect();
            FefoAllocator::validate_manual(line, &picks, &snapshots)?;
        }
        Ok(())
    }

    fn commit(&self, lines: &[AllocationLine], at: DateTime<Utc>) -> Result<(), DispenseError> {
        let mut applied: Vec<(BatchId, u64)> = Vec::new();

        for (batch_id, quantity) in merge_by_batch(lines) {
            match self.inventory.reserve(batch_id, quantity, at) {
                Ok(after) => {
                    debug!(%batch_id, quantity, remaining = after.available_quantity, "stock reserved");
                    applied.push((batch_id, quantity));
                }
                Err(e) => {
                    let cause = DispenseError::from(e);
                    warn!(%batch_id, quantity, error = %cause, rolled_back = applied.len(), "reservation failed; rolling back");
                    return Err(match self.roll_back(&applied, at) {
                        0 => cause,
                        unreleased => DispenseError::RollbackFailed {
                            cause: cause.to_string(),
                            unreleased,
                        },
                    });
                }
            }
        }
        Ok(())
    }

    /// Release in reverse order; returns how many releases failed.
    fn roll_back(&self, applied: &[(BatchId, u64)], at: DateTime<Utc>) -> usize {
        let mut unreleased = 0;
        for &(batch_id, quantity) in applied.iter().rev() {
            if let Err(e) = self.inventory.release(batch_id, quantity, at) {
                error!(%batch_id, quantity, error = %e, "compensating release failed");
                unreleased += 1;
            }
        }
        unreleased
    }
}

/// Invariants 1, 3 and 5: checks that need only the prescription.
fn check_lines(
    prescription: &Prescription,
    draft: &AllocationDraft,
    mode: DispenseMode,
) -> Result<(), DispenseError> {
    for pick in draft.lines() {
        let line = prescription.line(pick.prescription_line_id).ok_or_else(|| {
            DispenseError::invalid(format!(
                "line {} is not on prescription {}",
                pick.prescription_line_id, prescription.id
            ))
        })?;
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
    }

    let mut short = Vec::new();
    for line in prescription.lines() {
        let allocated = draft.allocated_for(line.id);
        if allocated > line.required_quantity {
            return Err(DispenseError::invalid(format!(
                "line {} requires {}, {} allocated",
                line.id, line.required_quantity, allocated
            )));
        }
        if allocated < line.required_quantity {
            short.push(format!("{} ({}/{})", line.id, allocated, line.required_quantity));
        }
    }

    match mode {
        DispenseMode::Complete if !short.is_empty() => Err(DispenseError::IncompleteAllocation(format!(
            "unsatisfied lines: {}",
            short.join(", ")
        ))),
        DispenseMode::Partial if draft.is_empty() => Err(DispenseError::invalid(
            "partial dispense needs at least one allocation line",
        )),
        DispenseMode::Cancelled => Err(DispenseError::invalid(
            "cancellation goes through confirm_cancelled",
        )),
        _ => Ok(()),
    }
}

fn merge_by_batch(lines: &[AllocationLine]) -> BTreeMap<BatchId, u64> {
    let mut merged = BTreeMap::new();
    for l in lines {
        *merged.entry(l.batch_id).or_insert(0u64) += l.allocated_quantity;
    }
    merged
}
