//! Infrastructure layer: event store, projections, in-memory adapters for the
//! dispensing ports, and configuration.

pub mod batch_inventory;
pub mod command_dispatcher;
pub mod config;
pub mod dispense_store;
pub mod engine;
pub mod event_store;
pub mod prescriptions;
pub mod projections;


pub use batch_inventory::{BATCH_AGGREGATE_TYPE, EventSourcedBatchInventory};
pub use command_dispatcher::{CommandDispatcher, DispatchError};
pub use config::{ConfigError, EngineConfig, RetryPolicy};
pub use dispense_store::InMemoryDispenseRecordStore;
pub use engine::{InMemoryEngine, InMemoryOrchestrator, SharedBus, SharedInventory};
pub use prescriptions::InMemoryPrescriptionSource;
