//! Process-wide tracing setup shared by the service binary and tools.

pub mod tracing;

pub use crate::tracing::{LogFormat, init, init_with};
