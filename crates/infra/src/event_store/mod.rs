//! Append-only event store boundary.
//!
//! One stream per batch aggregate. The store makes no storage assumptions; the
//! in-memory implementation backs tests and the single-node service.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
