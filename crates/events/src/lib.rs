//! Domain events and their distribution.
//!
//! Batch stock movements and dispense records are facts; this crate defines the
//! event contract, the stream envelope, and the pub/sub seam audit consumers
//! (notifications, exports) read from.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
