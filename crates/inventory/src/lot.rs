use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cuponera_core::{Aggregate, AggregateId, AggregateRoot, DomainError, FuelType};
use cuponera_events::Event;

/// Denomination lot identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LotId(pub AggregateId);

impl LotId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LotId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: DenominationLot.
///
/// Tracks two counters with different lifecycles:
/// - `available`: how many coupons can still be issued; decremented by
///   reservations, incremented by accepted returns, never negative.
/// - `last_issued`: serial high-water mark; strictly monotonic. Returned
///   coupons raise `available` but never lower `last_issued`, so a serial is
///   issued at most once per lot and ranges from distinct deliveries can
///   never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenominationLot {
    id: LotId,
    product: String,
    face_value: u64,
    fuel_type: Option<FuelType>,
    available: u32,
    last_issued: u64,
    version: u64,
    defined: bool,
}

impl DenominationLot {
    /// Create an empty, not-yet-defined aggregate instance for rehydration.
    pub fn empty(id: LotId) -> Self {
        Self {
            id,
            product: String::new(),
            face_value: 0,
            fuel_type: None,
            available: 0,
            last_issued: 0,
            version: 0,
            defined: false,
        }
    }

    pub fn id_typed(&self) -> LotId {
        self.id
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    /// Face value in centavos.
    pub fn face_value(&self) -> u64 {
        self.face_value
    }

    pub fn fuel_type(&self) -> Option<FuelType> {
        self.fuel_type
    }

    pub fn available(&self) -> u32 {
        self.available
    }

    /// Highest serial ever issued from this lot (0 if none).
    pub fn last_issued(&self) -> u64 {
        self.last_issued
    }

    pub fn is_defined(&self) -> bool {
        self.defined
    }
}

impl AggregateRoot for DenominationLot {
    type Id = LotId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DefineLot (inventory configuration).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineLot {
    pub lot_id: LotId,
    pub product: String,
    pub face_value: u64,
    pub fuel_type: FuelType,
    pub initial_available: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveCoupons (issuance side of an allocation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveCoupons {
    pub lot_id: LotId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreditCoupons (accepted return during liquidation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCoupons {
    pub lot_id: LotId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotCommand {
    DefineLot(DefineLot),
    ReserveCoupons(ReserveCoupons),
    CreditCoupons(CreditCoupons),
}

/// Event: LotDefined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotDefined {
    pub lot_id: LotId,
    pub product: String,
    pub face_value: u64,
    pub fuel_type: FuelType,
    pub initial_available: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponsReserved.
///
/// Carries the serial window computed at decision time:
/// `[last_issued + 1, last_issued + quantity]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponsReserved {
    pub lot_id: LotId,
    pub quantity: u32,
    pub start: u64,
    pub end: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CouponsCredited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponsCredited {
    pub lot_id: LotId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LotEvent {
    LotDefined(LotDefined),
    CouponsReserved(CouponsReserved),
    CouponsCredited(CouponsCredited),
}

impl LotEvent {
    /// The reservation payload, if this is a `CouponsReserved` event.
    pub fn as_reserved(&self) -> Option<&CouponsReserved> {
        match self {
            LotEvent::CouponsReserved(e) => Some(e),
            _ => None,
        }
    }
}

impl Event for LotEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LotEvent::LotDefined(_) => "inventory.lot.defined",
            LotEvent::CouponsReserved(_) => "inventory.lot.reserved",
            LotEvent::CouponsCredited(_) => "inventory.lot.credited",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LotEvent::LotDefined(e) => e.occurred_at,
            LotEvent::CouponsReserved(e) => e.occurred_at,
            LotEvent::CouponsCredited(e) => e.occurred_at,
        }
    }
}

impl Aggregate for DenominationLot {
    type Command = LotCommand;
    type Event = LotEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LotEvent::LotDefined(e) => {
                self.id = e.lot_id;
                self.product = e.product.clone();
                self.face_value = e.face_value;
                self.fuel_type = Some(e.fuel_type);
                self.available = e.initial_available;
                self.last_issued = 0;
                self.defined = true;
            }
            LotEvent::CouponsReserved(e) => {
                self.available -= e.quantity;
                self.last_issued = e.end;
            }
            LotEvent::CouponsCredited(e) => {
                // Credits restore availability only; the serial counter stays
                // put so returned serials are never reissued.
                self.available += e.quantity;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LotCommand::DefineLot(cmd) => self.handle_define(cmd),
            LotCommand::ReserveCoupons(cmd) => self.handle_reserve(cmd),
            LotCommand::CreditCoupons(cmd) => self.handle_credit(cmd),
        }
    }
}

impl DenominationLot {
    fn ensure_lot_id(&self, lot_id: LotId) -> Result<(), DomainError> {
        if self.id != lot_id {
            return Err(DomainError::invalid_state("lot_id mismatch"));
        }
        Ok(())
    }

    fn ensure_defined(&self) -> Result<(), DomainError> {
        if !self.defined {
            return Err(DomainError::invalid_state("lot has not been defined"));
        }
        Ok(())
    }

    fn handle_define(&self, cmd: &DefineLot) -> Result<Vec<LotEvent>, DomainError> {
        if self.defined {
            return Err(DomainError::invalid_state("lot is already defined"));
        }
        if cmd.product.trim().is_empty() {
            return Err(DomainError::validation("product label cannot be empty"));
        }
        if cmd.face_value == 0 {
            return Err(DomainError::validation("face value must be positive"));
        }
        Ok(vec![LotEvent::LotDefined(LotDefined {
            lot_id: cmd.lot_id,
            product: cmd.product.clone(),
            face_value: cmd.face_value,
            fuel_type: cmd.fuel_type,
            initial_available: cmd.initial_available,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveCoupons) -> Result<Vec<LotEvent>, DomainError> {
        self.ensure_defined()?;
        self.ensure_lot_id(cmd.lot_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("reserve quantity must be positive"));
        }
        if cmd.quantity > self.available {
            return Err(DomainError::InsufficientStock {
                lot: self.id.0,
                requested: cmd.quantity,
                available: self.available,
            });
        }

        let start = self.last_issued + 1;
        let end = self.last_issued + u64::from(cmd.quantity);
        Ok(vec![LotEvent::CouponsReserved(CouponsReserved {
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            start,
            end,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_credit(&self, cmd: &CreditCoupons) -> Result<Vec<LotEvent>, DomainError> {
        self.ensure_defined()?;
        self.ensure_lot_id(cmd.lot_id)?;

        if cmd.quantity == 0 {
            return Err(DomainError::validation("credit quantity must be positive"));
        }
        Ok(vec![LotEvent::CouponsCredited(CouponsCredited {
            lot_id: cmd.lot_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
