//! Single-node wiring of the dispensing engine over in-memory adapters.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use dispensary_core::{Clock, SystemClock};
use dispensary_dispensing::DispenseOrchestrator;
use dispensary_events::{EventEnvelope, InMemoryEventBus};

use crate::batch_inventory::EventSourcedBatchInventory;
use crate::config::RetryPolicy;
use crate::dispense_store::InMemoryDispenseRecordStore;
use crate::event_store::InMemoryEventStore;
use crate::prescriptions::InMemoryPrescriptionSource;

pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type SharedInventory = Arc<EventSourcedBatchInventory<Arc<InMemoryEventStore>, SharedBus>>;
pub type InMemoryOrchestrator = DispenseOrchestrator<
    Arc<InMemoryPrescriptionSource>,
    SharedInventory,
    Arc<InMemoryDispenseRecordStore>,
    SharedBus,
>;

/// Every collaborator plus the orchestrator built on top of them. Batch
/// events and dispense events share one bus.
pub struct InMemoryEngine {
    pub store: Arc<InMemoryEventStore>,
    pub bus: SharedBus,
    pub prescriptions: Arc<InMemoryPrescriptionSource>,
    pub inventory: SharedInventory,
    pub records: Arc<InMemoryDispenseRecordStore>,
    pub orchestrator: InMemoryOrchestrator,
}

impl InMemoryEngine {
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_clock(retry, Arc::new(SystemClock))
    }

    pub fn with_clock(retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        let prescriptions = Arc::new(InMemoryPrescriptionSource::new());
        let inventory = Arc::new(EventSourcedBatchInventory::new(store.clone(), bus.clone(), retry));
        let records = Arc::new(InMemoryDispenseRecordStore::new());
        let orchestrator =
            DispenseOrchestrator::new(prescriptions.clone(), inventory.clone(), records.clone(), bus.clone())
                .with_clock(clock);

        Self {
            store,
            bus,
            prescriptions,
            inventory,
            records,
            orchestrator,
        }
    }
}
