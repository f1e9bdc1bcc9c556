//! Intake operations: the lifecycle entry points the surrounding
//! application may call directly.
//!
//! Submission and rejection are plain single-aggregate commands, so they go
//! through the command dispatcher. Approval and liquidation finalization are
//! deliberately absent here: those transitions exist only inside the
//! allocation and reconciliation engines, committed together with the
//! inventory mutations they belong to.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

use cuponera_core::UserId;
use cuponera_events::{EventBus, EventEnvelope};
use cuponera_inventory::{DefineLot, DenominationLot, LotCommand, LotId};
use cuponera_requests::{RejectRequest, RequestCommand, RequestId, SubmitRequest, TravelRequest};

use crate::allocation::{LOT_AGGREGATE_TYPE, REQUEST_AGGREGATE_TYPE};
use crate::dispatcher::CommandDispatcher;
use crate::error::EngineError;
use crate::event_store::EventStore;
use crate::projections::lot_availability::LotAvailability;

/// Request and inventory intake service.
#[derive(Debug)]
pub struct RequestIntake<S, B> {
    dispatcher: CommandDispatcher<S, B>,
    availability: Arc<LotAvailability>,
}

impl<S, B> RequestIntake<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, availability: Arc<LotAvailability>) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store, bus),
            availability,
        }
    }

    /// Submit a new travel request; it enters the lifecycle as `pending`.
    pub fn submit(&self, cmd: SubmitRequest) -> Result<(), EngineError> {
        let request_id = cmd.request_id;
        self.dispatcher.dispatch(
            request_id.0,
            REQUEST_AGGREGATE_TYPE,
            RequestCommand::SubmitRequest(cmd),
            |id| TravelRequest::empty(RequestId::new(id)),
        )?;
        info!(%request_id, "travel request submitted");
        Ok(())
    }

    /// Reject a pending request (terminal).
    pub fn reject(
        &self,
        request_id: RequestId,
        rejected_by: UserId,
        occurred_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        self.dispatcher.dispatch(
            request_id.0,
            REQUEST_AGGREGATE_TYPE,
            RequestCommand::RejectRequest(RejectRequest {
                request_id,
                rejected_by,
                occurred_at,
            }),
            |id| TravelRequest::empty(RequestId::new(id)),
        )?;
        info!(%request_id, "travel request rejected");
        Ok(())
    }

    /// Seed a denomination lot (inventory configuration).
    pub fn define_lot(&self, cmd: DefineLot) -> Result<(), EngineError> {
        let lot_id = cmd.lot_id;
        let committed = self.dispatcher.dispatch(
            lot_id.0,
            LOT_AGGREGATE_TYPE,
            LotCommand::DefineLot(cmd),
            |id| DenominationLot::empty(LotId::new(id)),
        )?;
        self.availability.apply_committed(&committed);
        info!(%lot_id, "denomination lot defined");
        Ok(())
    }
}
