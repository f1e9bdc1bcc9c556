//! Liquidation reconciliation engine.
//!
//! `reconcile` closes an approved request: it resolves the returned serial
//! ranges against the request's delivery, credits each accepted return to the
//! lot it was issued from, and marks the request solvent. Like allocation,
//! the whole outcome commits as one multi-stream append; a rejected return
//! leaves no credit behind.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, info, warn};

use cuponera_core::{Aggregate, DomainError, ExpectedVersion};
use cuponera_delivery::{Delivery, DeliveryId, Liquidation, ReturnRange, ReturnedItem, resolve_returns};
use cuponera_events::{EventBus, EventEnvelope};
use cuponera_inventory::{CreditCoupons, DenominationLot, LotCommand, LotEvent, LotId};
use cuponera_requests::{FinalizeLiquidation, RequestCommand, RequestId, TravelRequest};

use crate::allocation::{LOT_AGGREGATE_TYPE, REQUEST_AGGREGATE_TYPE};
use crate::delivery_log::{DeliveryLog, items_from_blocks};
use crate::dispatcher::{publish_committed, rehydrate, stage_batch};
use crate::error::EngineError;
use crate::event_store::{EventStore, StreamBatch};
use crate::projections::lot_availability::LotAvailability;

const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// Liquidation reconciliation engine.
#[derive(Debug)]
pub struct ReconciliationEngine<S, B> {
    store: S,
    bus: B,
    availability: Arc<LotAvailability>,
    deliveries: Arc<DeliveryLog>,
}

impl<S, B> ReconciliationEngine<S, B>
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

    /// Reconcile the liquidation of an approved request.
    ///
    /// `returns` may be empty: a commission that consumed every coupon still
    /// liquidates, it just credits nothing back. Every resolution rule runs
    /// before any append, so a single bad range rejects the whole call with
    /// inventory untouched.
    pub fn reconcile(
        &self,
        request_id: RequestId,
        final_odometer: u32,
        completed_at: DateTime<Utc>,
        returns: &[ReturnRange],
        occurred_at: DateTime<Utc>,
    ) -> Result<Liquidation, EngineError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.try_reconcile(request_id, final_odometer, completed_at, returns, occurred_at)
            {
                Err(EngineError::Conflict(reason)) if attempts < MAX_COMMIT_ATTEMPTS => {
                    debug!(%request_id, attempts, %reason, "reconciliation commit conflicted, retrying");
                }
                Err(EngineError::Conflict(reason)) => {
                    warn!(%request_id, attempts, %reason, "reconciliation gave up after repeated conflicts");
                    return Err(EngineError::Conflict(reason));
                }
                other => return other,
            }
        }
    }

    fn try_reconcile(
        &self,
        request_id: RequestId,
        final_odometer: u32,
        completed_at: DateTime<Utc>,
        returns: &[ReturnRange],
        occurred_at: DateTime<Utc>,
    ) -> Result<Liquidation, EngineError> {
        let (request, request_version) =
            rehydrate::<TravelRequest, _>(&self.store, request_id.0, |id| {
                TravelRequest::empty(RequestId::new(id))
            })?;

        if !request.is_submitted() {
            return Err(DomainError::invalid_state(format!(
                "request {request_id} does not exist"
            ))
            .into());
        }
        if !request.awaits_liquidation() {
            return Err(DomainError::invalid_state(format!(
                "cannot reconcile request {request_id} in status {:?}",
                request.status()
            ))
            .into());
        }

        // The delivery is a fact of the request stream (carried on the
        // approval event), so it is read from the rehydrated aggregate and
        // never races the read model.
        let delivery = delivery_of(&request, request_id)?;

        let resolved = resolve_returns(&delivery, returns).map_err(EngineError::from)?;
        let liquidation = Liquidation::new(
            request_id,
            request.starting_odometer(),
            final_odometer,
            completed_at,
            resolved,
        )
        .map_err(EngineError::from)?;

        // Group credits per lot so each lot stream gets exactly one batch,
        // keeping first-seen order for deterministic commits.
        let mut per_lot: Vec<(LotId, Vec<&ReturnedItem>)> = Vec::new();
        for item in &liquidation.returns {
            match per_lot.iter_mut().find(|(id, _)| *id == item.lot_id) {
                Some((_, group)) => group.push(item),
                None => per_lot.push((item.lot_id, vec![item])),
            }
        }

        let mut batches: Vec<StreamBatch> = Vec::with_capacity(per_lot.len() + 1);
        for (lot_id, items) in &per_lot {
            let (mut lot, lot_version) =
                rehydrate::<DenominationLot, _>(&self.store, lot_id.0, |id| {
                    DenominationLot::empty(LotId::new(id))
                })?;

            let mut events: Vec<LotEvent> = Vec::with_capacity(items.len());
            for item in items {
                let decided = lot
                    .handle(&LotCommand::CreditCoupons(CreditCoupons {
                        lot_id: *lot_id,
                        quantity: item.quantity,
                        occurred_at,
                    }))
                    .map_err(EngineError::from)?;
                for event in &decided {
                    lot.apply(event);
                }
                events.extend(decided);
            }
            batches.push(stage_batch(
                lot_id.0,
                LOT_AGGREGATE_TYPE,
                ExpectedVersion::Exact(lot_version),
                &events,
            )?);
        }

        let finalize_events = request
            .handle(&RequestCommand::FinalizeLiquidation(FinalizeLiquidation {
                request_id,
                occurred_at,
            }))
            .map_err(EngineError::from)?;
        batches.push(stage_batch(
            request_id.0,
            REQUEST_AGGREGATE_TYPE,
            ExpectedVersion::Exact(request_version),
            &finalize_events,
        )?);

        let committed = self.store.append_all(batches).map_err(EngineError::from)?;

        self.deliveries.record_liquidation(liquidation.clone());
        self.availability.apply_committed(&committed);

        info!(
            %request_id,
            returned_coupons = liquidation.returns.iter().map(|r| r.quantity).sum::<u32>(),
            credited_centavos = liquidation.credited_value(),
            distance_km = liquidation.distance_traveled,
            "liquidation reconciled and request marked solvent"
        );

        publish_committed(&self.bus, &committed)?;

        Ok(liquidation)
    }
}

/// Reconstruct the delivery from the rehydrated request state.
fn delivery_of(request: &TravelRequest, request_id: RequestId) -> Result<Delivery, EngineError> {
    let (Some(delivery_id), Some(fuel_type), Some(approved_by), Some(issued_at)) = (
        request.delivery_id(),
        request.fuel_type(),
        request.approved_by(),
        request.approved_at(),
    ) else {
        return Err(DomainError::invalid_state(format!(
            "no delivery recorded for request {request_id}"
        ))
        .into());
    };

    Ok(Delivery {
        id: DeliveryId::new(delivery_id),
        request_id,
        fuel_type,
        approved_by,
        issued_at,
        items: items_from_blocks(request.issued_blocks()).map_err(EngineError::from)?,
    })
}
