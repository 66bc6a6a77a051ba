//! Medication dispensing domain module.
//!
//! Given a prescription and a pool of expiring batches this crate proposes FEFO
//! allocations, validates manual selections, commits stock reservations as one
//! all-or-nothing unit, and rebuilds dispensed-vs-required statistics from the
//! immutable dispense record plus the live prescription.
//!
//! Stores, buses and clocks are injected through the traits in [`ports`] and
//! `dispensary_inventory::BatchInventory`.

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub dispensary_core::AggregateId);

        impl $name {
            pub fn new(id: dispensary_core::AggregateId) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(dispensary_core::AggregateId::new())
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $name {
            type Err = dispensary_core::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

pub mod allocation;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod prescription;
pub mod reconciliation;
pub mod record;
pub mod validator;

#[cfg(test)]
mod testing;

pub use allocation::{AllocationDraft, AllocationLine, FefoAllocator};
pub use error::DispenseError;
pub use orchestrator::DispenseOrchestrator;
pub use ports::{DispenseRecordStore, PrescriptionSource};
pub use prescription::{Dosing, Prescription, PrescriptionId, PrescriptionLine, PrescriptionLineId};
pub use reconciliation::{
    LineReconciliation, ReconciliationCalculator, ReconciliationStats, completion_percentage,
};
pub use record::{DispenseEvent, DispenseId, DispenseMode, DispenseRecord};
pub use validator::{ConfirmContext, DispenseHistory, DispenseState, DispenseValidator, PendingDispense};
