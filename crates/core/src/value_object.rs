//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are immutable and compared by their attributes. An allocation
/// line (`prescription line, batch, quantity`) is one: two lines naming the same
/// batch and quantity for the same prescription line are interchangeable.
///
/// To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
