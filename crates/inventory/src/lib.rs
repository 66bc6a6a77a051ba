//! Batch inventory domain module (event-sourced).
//!
//! Business rules for medication batches: receipt, FEFO ordering, stock
//! reservation and its compensation, administrative expiry. Pure domain logic;
//! the `BatchInventory` port is implemented by the infra layer.

pub mod batch;
pub mod store;

pub use batch::{
    Batch, BatchCommand, BatchEvent, BatchExpired, BatchId, BatchReceived, BatchSnapshot,
    BatchState, ExpireBatch, ReceiveBatch, ReleaseStock, ReserveStock, StockReleased,
    StockReserved, sort_fefo,
};
pub use store::{AvailableBatches, BatchInventory, InventoryError};
