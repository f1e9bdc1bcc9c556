//! Coupon allocation engine.
//!
//! `allocate` turns a pending travel request plus a set of desired
//! denomination/quantity pairs into a `Delivery`: it reserves a contiguous
//! serial window from each chosen lot, builds the delivery items with the
//! face values captured at this instant, and approves the request, all in
//! one multi-stream append. Any failure leaves no inventory mutation and no
//! state transition behind.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use cuponera_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, FuelType, UserId};
use cuponera_delivery::{Delivery, DeliveryId, DeliveryItem};
use cuponera_events::{EventBus, EventEnvelope};
use cuponera_inventory::{DenominationLot, LotCommand, LotId, ReserveCoupons};
use cuponera_requests::{ApproveRequest, IssuedBlock, RequestCommand, RequestId, TravelRequest};

use crate::delivery_log::DeliveryLog;
use crate::dispatcher::{publish_committed, rehydrate, stage_batch};
use crate::error::EngineError;
use crate::event_store::{EventStore, StreamBatch};
use crate::projections::lot_availability::{LotAvailability, LotSummary};

pub const LOT_AGGREGATE_TYPE: &str = "inventory.lot";
pub const REQUEST_AGGREGATE_TYPE: &str = "requests.request";

/// Bounded reload-and-retry for optimistic concurrency conflicts.
const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// One desired denomination/quantity pair, as chosen by the approver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DesiredItem {
    pub lot_id: LotId,
    pub quantity: u32,
}

/// Coupon allocation engine.
///
/// Holds the store and bus plus the read models it keeps current: the lot
/// availability projection and the delivery log consumed later by
/// reconciliation.
#[derive(Debug)]
pub struct AllocationEngine<S, B> {
    store: S,
    bus: B,
    availability: Arc<LotAvailability>,
    deliveries: Arc<DeliveryLog>,
}

impl<S, B> AllocationEngine<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        availability: Arc<LotAvailability>,
        deliveries: Arc<DeliveryLog>,
    ) -> Self {
        Self {
            store,
            bus,
            availability,
            deliveries,
        }
    }

    /// Allocation choices for the approver: lots of the request's fuel type
    /// with stock left, scarcest first, then cheapest denomination first.
    /// Read-only; the engine never auto-selects denominations.
    pub fn list_available(&self, fuel_type: FuelType) -> Vec<LotSummary> {
        self.availability.list_available(fuel_type)
    }

    /// Issue coupons against a pending request and approve it.
    ///
    /// All-or-nothing: every reservation plus the approval commits in one
    /// multi-stream append, and a version conflict (concurrent approver)
    /// triggers a bounded reload-and-retry. At most one allocation can ever
    /// succeed per request: a retry that finds the request already approved
    /// fails with `InvalidState`.
    pub fn allocate(
        &self,
        request_id: RequestId,
        approved_by: UserId,
        desired: &[DesiredItem],
        occurred_at: DateTime<Utc>,
    ) -> Result<Delivery, EngineError> {
        // Structural validation happens before any inventory read.
        if desired.is_empty() {
            return Err(DomainError::validation("allocation requires at least one desired item").into());
        }
        for item in desired {
            if item.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "desired quantity for lot {} must be positive",
                    item.lot_id
                ))
                .into());
            }
        }
        for (i, item) in desired.iter().enumerate() {
            if desired[..i].iter().any(|d| d.lot_id == item.lot_id) {
                return Err(DomainError::validation(format!(
                    "lot {} appears more than once in desired items",
                    item.lot_id
                ))
                .into());
            }
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_allocate(request_id, approved_by, desired, occurred_at) {
                Err(EngineError::Conflict(reason)) if attempts < MAX_COMMIT_ATTEMPTS => {
                    debug!(%request_id, attempts, %reason, "allocation commit conflicted, retrying");
                }
                Err(EngineError::Conflict(reason)) => {
                    warn!(%request_id, attempts, %reason, "allocation gave up after repeated conflicts");
                    return Err(EngineError::Conflict(reason));
                }
                other => return other,
            }
        }
    }

    fn try_allocate(
        &self,
        request_id: RequestId,
        approved_by: UserId,
        desired: &[DesiredItem],
        occurred_at: DateTime<Utc>,
    ) -> Result<Delivery, EngineError> {
        let (request, request_version) =
            rehydrate::<TravelRequest, _>(&self.store, request_id.0, |id| {
                TravelRequest::empty(RequestId::new(id))
            })?;

        let fuel_type = match request.fuel_type() {
            Some(fuel_type) if request.is_allocatable() => fuel_type,
            Some(_) => {
                return Err(DomainError::invalid_state(format!(
                    "cannot allocate request {request_id} in status {:?}",
                    request.status()
                ))
                .into());
            }
            None => {
                return Err(DomainError::invalid_state(format!(
                    "request {request_id} does not exist"
                ))
                .into());
            }
        };

        let mut batches: Vec<StreamBatch> = Vec::with_capacity(desired.len() + 1);
        let mut items: Vec<DeliveryItem> = Vec::with_capacity(desired.len());
        let mut blocks: Vec<IssuedBlock> = Vec::with_capacity(desired.len());

        for item in desired {
            let (lot, lot_version) = rehydrate::<DenominationLot, _>(&self.store, item.lot_id.0, |id| {
                DenominationLot::empty(LotId::new(id))
            })?;

            if lot.fuel_type() != Some(fuel_type) {
                return Err(DomainError::validation(format!(
                    "lot {} does not carry {fuel_type} coupons",
                    item.lot_id
                ))
                .into());
            }

            let events = lot
                .handle(&LotCommand::ReserveCoupons(ReserveCoupons {
                    lot_id: item.lot_id,
                    quantity: item.quantity,
                    occurred_at,
                }))
                .map_err(EngineError::from)?;
            let reserved = events
                .first()
                .and_then(|e| e.as_reserved())
                .ok_or_else(|| {
                    EngineError::Deserialize("reserve decision produced no reservation event".to_string())
                })?;

            items.push(DeliveryItem::new(
                item.lot_id,
                lot.face_value(),
                reserved.quantity,
                reserved.start,
            )?);
            blocks.push(IssuedBlock {
                lot_id: item.lot_id.0,
                face_value: lot.face_value(),
                quantity: reserved.quantity,
                start: reserved.start,
                end: reserved.end,
            });
            batches.push(stage_batch(
                item.lot_id.0,
                LOT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(lot_version),
                &events,
            )?);
        }

        let delivery_id = DeliveryId::new(AggregateId::new());
        let approve_events = request
            .handle(&RequestCommand::ApproveRequest(ApproveRequest {
                request_id,
                delivery_id: delivery_id.0,
                approved_by,
                fuel_type,
                items: blocks,
                occurred_at,
            }))
            .map_err(EngineError::from)?;
        batches.push(stage_batch(
            request_id.0,
            REQUEST_AGGREGATE_TYPE,
            ExpectedVersion::Exact(request_version),
            &approve_events,
        )?);

        let committed = self.store.append_all(batches).map_err(EngineError::from)?;

        let delivery = Delivery {
            id: delivery_id,
            request_id,
            fuel_type,
            approved_by,
            issued_at: occurred_at,
            items,
        };
        self.deliveries.apply_committed(&committed);
        self.availability.apply_committed(&committed);

        info!(
            %request_id,
            delivery_id = %delivery.id,
            coupons = delivery.total_coupons(),
            total_centavos = delivery.total(),
            "coupons allocated and request approved"
        );

        publish_committed(&self.bus, &committed)?;

        Ok(delivery)
    }
}
