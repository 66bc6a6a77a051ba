//! Read models built from committed batch events.
//!
//! Projections are disposable: they can always be rebuilt by replaying the
//! event store, and they ignore replays at or below their per-stream cursor.

pub mod batch_availability;

pub use batch_availability::{BatchAvailabilityProjection, BatchProjectionError};
