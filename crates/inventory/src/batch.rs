use core::cmp::Ordering;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use dispensary_core::{Aggregate, AggregateId, AggregateRoot, DomainError, MedicationId};
use dispensary_events::Event;

/// Batch (lot) identifier; one event stream per batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub AggregateId);

impl BatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::str::FromStr for BatchId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Batch lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    Active,
    Depleted,
    Expired,
}

/// Aggregate root: Batch.
///
/// Everything except `available_quantity` and `state` is fixed at receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    medication_id: Option<MedicationId>,
    lot_number: String,
    expiration_date: NaiveDate,
    manufacturing_date: NaiveDate,
    initial_quantity: u64,
    available_quantity: u64,
    state: BatchState,
    version: u64,
    created: bool,
}

/// Point-in-time read view of a batch.
///
/// `version` is the stream revision the view was taken at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSnapshot {
    pub batch_id: BatchId,
    pub medication_id: MedicationId,
    pub lot_number: String,
    pub expiration_date: NaiveDate,
    pub manufacturing_date: NaiveDate,
    pub initial_quantity: u64,
    pub available_quantity: u64,
    pub state: BatchState,
    pub version: u64,
}

impl BatchSnapshot {
    /// Dispensable on `as_of`: active, not empty, and strictly before expiry.
    pub fn is_available(&self, as_of: NaiveDate) -> bool {
        self.state == BatchState::Active
            && self.available_quantity > 0
            && self.expiration_date > as_of
    }

    /// FEFO order: earliest expiration first, then batch id ascending.
    pub fn fefo_cmp(&self, other: &Self) -> Ordering {
        self.expiration_date
            .cmp(&other.expiration_date)
            .then_with(|| self.batch_id.cmp(&other.batch_id))
    }
}

/// Sort batches into FEFO order in place.
pub fn sort_fefo(batches: &mut [BatchSnapshot]) {
    batches.sort_by(BatchSnapshot::fefo_cmp);
}

impl Batch {
    /// Create an empty, not-yet-received aggregate instance for rehydration.
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            medication_id: None,
            lot_number: String::new(),
            expiration_date: NaiveDate::MIN,
            manufacturing_date: NaiveDate::MIN,
            initial_quantity: 0,
            available_quantity: 0,
            state: BatchState::Active,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn is_received(&self) -> bool {
        self.created
    }

    pub fn medication_id(&self) -> Option<MedicationId> {
        self.medication_id
    }

    pub fn available_quantity(&self) -> u64 {
        self.available_quantity
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn expiration_date(&self) -> NaiveDate {
        self.expiration_date
    }

    /// Read view; `None` until the batch has been received.
    pub fn snapshot(&self) -> Option<BatchSnapshot> {
        let medication_id = self.medication_id.filter(|_| self.created)?;
        Some(BatchSnapshot {
            batch_id: self.id,
            medication_id,
            lot_number: self.lot_number.clone(),
            expiration_date: self.expiration_date,
            manufacturing_date: self.manufacturing_date,
            initial_quantity: self.initial_quantity,
            available_quantity: self.available_quantity,
            state: self.state,
            version: self.version,
        })
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveBatch (inbound receipt; the only way a batch comes to exist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBatch {
    pub batch_id: BatchId,
    pub medication_id: MedicationId,
    pub lot_number: String,
    pub expiration_date: NaiveDate,
    pub manufacturing_date: NaiveDate,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub batch_id: BatchId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock (compensation for a reservation in an aborted commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub batch_id: BatchId,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireBatch (administrative transition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireBatch {
    pub batch_id: BatchId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    ReceiveBatch(ReceiveBatch),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    ExpireBatch(ExpireBatch),
}

/// Event: BatchReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceived {
    pub batch_id: BatchId,
    pub medication_id: MedicationId,
    pub lot_number: String,
    pub expiration_date: NaiveDate,
    pub manufacturing_date: NaiveDate,
    pub quantity: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub batch_id: BatchId,
    pub quantity: u64,
    /// Units left after this reservation.
    pub remaining: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub batch_id: BatchId,
    pub quantity: u64,
    pub remaining: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchExpired {
    pub batch_id: BatchId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchReceived(BatchReceived),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    BatchExpired(BatchExpired),
}

impl BatchEvent {
    pub fn batch_id(&self) -> BatchId {
        match self {
            BatchEvent::BatchReceived(e) => e.batch_id,
            BatchEvent::StockReserved(e) => e.batch_id,
            BatchEvent::StockReleased(e) => e.batch_id,
            BatchEvent::BatchExpired(e) => e.batch_id,
        }
    }
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::BatchReceived(_) => "pharmacy.batch.received",
            BatchEvent::StockReserved(_) => "pharmacy.batch.stock_reserved",
            BatchEvent::StockReleased(_) => "pharmacy.batch.stock_released",
            BatchEvent::BatchExpired(_) => "pharmacy.batch.expired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchReceived(e) => e.occurred_at,
            BatchEvent::StockReserved(e) => e.occurred_at,
            BatchEvent::StockReleased(e) => e.occurred_at,
            BatchEvent::BatchExpired(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Batch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::BatchReceived(e) => {
                self.id = e.batch_id;
                self.medication_id = Some(e.medication_id);
                self.lot_number = e.lot_number.clone();
                self.expiration_date = e.expiration_date;
                self.manufacturing_date = e.manufacturing_date;
                self.initial_quantity = e.quantity;
                self.available_quantity = e.quantity;
                self.state = BatchState::Active;
                self.created = true;
            }
            BatchEvent::StockReserved(e) => {
                self.available_quantity = self.available_quantity.saturating_sub(e.quantity);
                if self.available_quantity == 0 && self.state == BatchState::Active {
                    self.state = BatchState::Depleted;
                }
            }
            BatchEvent::StockReleased(e) => {
                self.available_quantity = self.available_quantity.saturating_add(e.quantity);
                if self.available_quantity > 0 && self.state == BatchState::Depleted {
                    self.state = BatchState::Active;
                }
            }
            BatchEvent::BatchExpired(_) => {
                self.state = BatchState::Expired;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::ReceiveBatch(cmd) => self.handle_receive(cmd),
            BatchCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            BatchCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            BatchCommand::ExpireBatch(cmd) => self.handle_expire(cmd),
        }
    }
}

impl Batch {
    fn ensure_batch_id(&self, batch_id: BatchId) -> Result<(), DomainError> {
        if self.id != batch_id {
            return Err(DomainError::invariant("batch_id mismatch"));
        }
        Ok(())
    }

    fn ensure_received(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("batch {}", self.id)));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveBatch) -> Result<Vec<BatchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("batch already received"));
        }
        self.ensure_batch_id(cmd.batch_id)?;

        if cmd.lot_number.trim().is_empty() {
            return Err(DomainError::validation("lot_number cannot be empty"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("received quantity must be positive"));
        }
        if cmd.manufacturing_date >= cmd.expiration_date {
            return Err(DomainError::validation(
                "manufacturing_date must precede expiration_date",
            ));
        }

        Ok(vec![BatchEvent::BatchReceived(BatchReceived {
            batch_id: cmd.batch_id,
            medication_id: cmd.medication_id,
            lot_number: cmd.lot_number.trim().to_string(),
            expiration_date: cmd.expiration_date,
            manufacturing_date: cmd.manufacturing_date,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_received()?;
        self.ensure_batch_id(cmd.batch_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("reserved quantity must be positive"));
        }
        if self.state == BatchState::Expired {
            return Err(DomainError::invariant(format!(
                "batch {} (lot {}) is expired",
                self.id, self.lot_number
            )));
        }
        if self.expiration_date <= cmd.occurred_at.date_naive() {
            return Err(DomainError::invariant(format!(
                "batch {} (lot {}) expired on {}",
                self.id, self.lot_number, self.expiration_date
            )));
        }
        if cmd.quantity > self.available_quantity {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                self.available_quantity,
            ));
        }

        Ok(vec![BatchEvent::StockReserved(StockReserved {
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            remaining: self.available_quantity - cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_received()?;
        self.ensure_batch_id(cmd.batch_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("released quantity must be positive"));
        }

        let restored = self
            .available_quantity
            .checked_add(cmd.quantity)
            .filter(|q| *q <= self.initial_quantity)
            .ok_or_else(|| {
                DomainError::invariant("release would exceed the batch's received quantity")
            })?;

        Ok(vec![BatchEvent::StockReleased(StockReleased {
            batch_id: cmd.batch_id,
            quantity: cmd.quantity,
            remaining: restored,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireBatch) -> Result<Vec<BatchEvent>, DomainError> {
        self.ensure_received()?;
        self.ensure_batch_id(cmd.batch_id)?;

        if self.state == BatchState::Expired {
            return Err(DomainError::conflict("batch is already expired"));
        }

        Ok(vec![BatchEvent::BatchExpired(BatchExpired {
            batch_id: cmd.batch_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
