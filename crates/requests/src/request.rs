use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cuponera_core::{Aggregate, AggregateId, AggregateRoot, DomainError, FuelType, UserId};
use cuponera_events::Event;

/// Travel request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub AggregateId);

impl RequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One leg of the planned itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItineraryLeg {
    pub destination: String,
    pub distance_km: u32,
    pub departs_at: DateTime<Utc>,
    pub returns_at: DateTime<Utc>,
}

/// One contiguous coupon block issued at approval time.
///
/// Carried on the approval event so the delivery is a fact of the request
/// stream itself: anything rehydrating the request sees the issued blocks,
/// and read models can be rebuilt without a side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedBlock {
    pub lot_id: AggregateId,
    /// Face value in centavos, captured at issuance.
    pub face_value: u64,
    pub quantity: u32,
    pub start: u64,
    pub end: u64,
}

/// Request lifecycle status.
///
/// `Approved { solvent: false }` means coupons were issued and a liquidation
/// is still owed; `solvent: true` and `Rejected` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved { solvent: bool },
    Rejected,
}

/// Aggregate root: TravelRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TravelRequest {
    id: RequestId,
    correlativo: Option<u32>,
    plate: String,
    destination: String,
    starting_odometer: u32,
    justification: String,
    fuel_type: Option<FuelType>,
    legs: Vec<ItineraryLeg>,
    status: RequestStatus,
    delivery_id: Option<AggregateId>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    issued: Vec<IssuedBlock>,
    version: u64,
    submitted: bool,
}

impl TravelRequest {
    /// Create an empty, not-yet-submitted aggregate instance for rehydration.
    pub fn empty(id: RequestId) -> Self {
        Self {
            id,
            correlativo: None,
            plate: String::new(),
            destination: String::new(),
            starting_odometer: 0,
            justification: String::new(),
            fuel_type: None,
            legs: Vec::new(),
            status: RequestStatus::Pending,
            delivery_id: None,
            approved_by: None,
            approved_at: None,
            issued: Vec::new(),
            version: 0,
            submitted: false,
        }
    }

    pub fn id_typed(&self) -> RequestId {
        self.id
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn correlativo(&self) -> Option<u32> {
        self.correlativo
    }

    pub fn plate(&self) -> &str {
        &self.plate
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn starting_odometer(&self) -> u32 {
        self.starting_odometer
    }

    pub fn fuel_type(&self) -> Option<FuelType> {
        self.fuel_type
    }

    pub fn legs(&self) -> &[ItineraryLeg] {
        &self.legs
    }

    /// Identity of the delivery attached at approval, if any.
    pub fn delivery_id(&self) -> Option<AggregateId> {
        self.delivery_id
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    /// Coupon blocks issued at approval (empty before approval).
    pub fn issued_blocks(&self) -> &[IssuedBlock] {
        &self.issued
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    pub fn is_pending(&self) -> bool {
        self.submitted && matches!(self.status, RequestStatus::Pending)
    }

    /// An allocation may only attach to a pending request.
    pub fn is_allocatable(&self) -> bool {
        self.is_pending()
    }

    /// A liquidation may only close an approved, not-yet-solvent request.
    pub fn awaits_liquidation(&self) -> bool {
        matches!(self.status, RequestStatus::Approved { solvent: false })
    }
}

impl AggregateRoot for TravelRequest {
    type Id = RequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitRequest (intake of a new commission).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub request_id: RequestId,
    pub correlativo: Option<u32>,
    pub plate: String,
    pub destination: String,
    pub starting_odometer: u32,
    pub justification: String,
    pub fuel_type: FuelType,
    pub legs: Vec<ItineraryLeg>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRequest {
    pub request_id: RequestId,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveRequest.
///
/// Issued internally by the allocation engine together with the coupon
/// reservations; never dispatched directly by callers. Carries the issued
/// blocks so the approval event fully describes the delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub request_id: RequestId,
    pub delivery_id: AggregateId,
    pub approved_by: UserId,
    pub fuel_type: FuelType,
    pub items: Vec<IssuedBlock>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeLiquidation.
///
/// Issued internally by the reconciliation engine after inventory credits
/// succeed; never dispatched directly by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeLiquidation {
    pub request_id: RequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestCommand {
    SubmitRequest(SubmitRequest),
    RejectRequest(RejectRequest),
    ApproveRequest(ApproveRequest),
    FinalizeLiquidation(FinalizeLiquidation),
}

/// Event: RequestSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSubmitted {
    pub request_id: RequestId,
    pub correlativo: Option<u32>,
    pub plate: String,
    pub destination: String,
    pub starting_odometer: u32,
    pub justification: String,
    pub fuel_type: FuelType,
    pub legs: Vec<ItineraryLeg>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRejected {
    pub request_id: RequestId,
    pub rejected_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RequestApproved.
///
/// Self-contained record of the delivery: read models rebuild from this
/// event alone, without consulting lot streams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestApproved {
    pub request_id: RequestId,
    pub delivery_id: AggregateId,
    pub approved_by: UserId,
    pub fuel_type: FuelType,
    pub items: Vec<IssuedBlock>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LiquidationFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationFinalized {
    pub request_id: RequestId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestEvent {
    RequestSubmitted(RequestSubmitted),
    RequestRejected(RequestRejected),
    RequestApproved(RequestApproved),
    LiquidationFinalized(LiquidationFinalized),
}

impl Event for RequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RequestEvent::RequestSubmitted(_) => "requests.request.submitted",
            RequestEvent::RequestRejected(_) => "requests.request.rejected",
            RequestEvent::RequestApproved(_) => "requests.request.approved",
            RequestEvent::LiquidationFinalized(_) => "requests.request.liquidation_finalized",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RequestEvent::RequestSubmitted(e) => e.occurred_at,
            RequestEvent::RequestRejected(e) => e.occurred_at,
            RequestEvent::RequestApproved(e) => e.occurred_at,
            RequestEvent::LiquidationFinalized(e) => e.occurred_at,
        }
    }
}

impl Aggregate for TravelRequest {
    type Command = RequestCommand;
    type Event = RequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RequestEvent::RequestSubmitted(e) => {
                self.id = e.request_id;
                self.correlativo = e.correlativo;
                self.plate = e.plate.clone();
                self.destination = e.destination.clone();
                self.starting_odometer = e.starting_odometer;
                self.justification = e.justification.clone();
                self.fuel_type = Some(e.fuel_type);
                self.legs = e.legs.clone();
                self.status = RequestStatus::Pending;
                self.submitted = true;
            }
            RequestEvent::RequestRejected(_) => {
                self.status = RequestStatus::Rejected;
            }
            RequestEvent::RequestApproved(e) => {
                self.status = RequestStatus::Approved { solvent: false };
                self.delivery_id = Some(e.delivery_id);
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
                self.issued = e.items.clone();
            }
            RequestEvent::LiquidationFinalized(_) => {
                self.status = RequestStatus::Approved { solvent: true };
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RequestCommand::SubmitRequest(cmd) => self.handle_submit(cmd),
            RequestCommand::RejectRequest(cmd) => self.handle_reject(cmd),
            RequestCommand::ApproveRequest(cmd) => self.handle_approve(cmd),
            RequestCommand::FinalizeLiquidation(cmd) => self.handle_finalize(cmd),
        }
    }
}

impl TravelRequest {
    fn ensure_request_id(&self, request_id: RequestId) -> Result<(), DomainError> {
        if self.id != request_id {
            return Err(DomainError::invalid_state("request_id mismatch"));
        }
        Ok(())
    }

    fn ensure_submitted(&self) -> Result<(), DomainError> {
        if !self.submitted {
            return Err(DomainError::invalid_state("request has not been submitted"));
        }
        Ok(())
    }

    fn handle_submit(&self, cmd: &SubmitRequest) -> Result<Vec<RequestEvent>, DomainError> {
        if self.submitted {
            return Err(DomainError::invalid_state("request already submitted"));
        }
        if cmd.plate.trim().is_empty() {
            return Err(DomainError::validation("plate cannot be empty"));
        }
        if cmd.destination.trim().is_empty() {
            return Err(DomainError::validation("destination cannot be empty"));
        }
        for (idx, leg) in cmd.legs.iter().enumerate() {
            if leg.destination.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "itinerary leg {idx} has no destination"
                )));
            }
            if leg.distance_km == 0 {
                return Err(DomainError::validation(format!(
                    "itinerary leg {idx} has zero distance"
                )));
            }
            if leg.returns_at < leg.departs_at {
                return Err(DomainError::validation(format!(
                    "itinerary leg {idx} returns before it departs"
                )));
            }
        }
        Ok(vec![RequestEvent::RequestSubmitted(RequestSubmitted {
            request_id: cmd.request_id,
            correlativo: cmd.correlativo,
            plate: cmd.plate.clone(),
            destination: cmd.destination.clone(),
            starting_odometer: cmd.starting_odometer,
            justification: cmd.justification.clone(),
            fuel_type: cmd.fuel_type,
            legs: cmd.legs.clone(),
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectRequest) -> Result<Vec<RequestEvent>, DomainError> {
        self.ensure_submitted()?;
        self.ensure_request_id(cmd.request_id)?;

        if !self.is_pending() {
            return Err(DomainError::invalid_state(format!(
                "cannot reject request in status {:?}",
                self.status
            )));
        }
        Ok(vec![RequestEvent::RequestRejected(RequestRejected {
            request_id: cmd.request_id,
            rejected_by: cmd.rejected_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveRequest) -> Result<Vec<RequestEvent>, DomainError> {
        self.ensure_submitted()?;
        self.ensure_request_id(cmd.request_id)?;

        if !self.is_allocatable() {
            return Err(DomainError::invalid_state(format!(
                "cannot approve request in status {:?}",
                self.status
            )));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation(
                "approval requires at least one issued block",
            ));
        }
        if self.fuel_type != Some(cmd.fuel_type) {
            return Err(DomainError::validation(format!(
                "delivery fuel type {} does not match the request",
                cmd.fuel_type
            )));
        }
        Ok(vec![RequestEvent::RequestApproved(RequestApproved {
            request_id: cmd.request_id,
            delivery_id: cmd.delivery_id,
            approved_by: cmd.approved_by,
            fuel_type: cmd.fuel_type,
            items: cmd.items.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &FinalizeLiquidation) -> Result<Vec<RequestEvent>, DomainError> {
        self.ensure_submitted()?;
        self.ensure_request_id(cmd.request_id)?;

        if !self.awaits_liquidation() {
            return Err(DomainError::invalid_state(format!(
                "cannot finalize liquidation for request in status {:?}",
                self.status
            )));
        }
        Ok(vec![RequestEvent::LiquidationFinalized(
            LiquidationFinalized {
                request_id: cmd.request_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}
