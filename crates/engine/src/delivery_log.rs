//! Read model for deliveries and liquidations.
//!
//! Deliveries are derived from committed `RequestApproved` events, which
//! carry the issued blocks: the log can always be rebuilt by replaying the
//! request streams, and the engines never depend on it for correctness.
//! It is the queryable shape the surrounding UI consumes (voucher printing,
//! audit reporting).

use std::collections::HashMap;
use std::sync::RwLock;

use cuponera_core::DomainResult;
use cuponera_delivery::{Delivery, DeliveryId, DeliveryItem, Liquidation};
use cuponera_inventory::LotId;
use cuponera_requests::{IssuedBlock, RequestEvent, RequestId};

use crate::event_store::StoredEvent;

/// Rebuild delivery items from the blocks carried on an approval event.
pub(crate) fn items_from_blocks(blocks: &[IssuedBlock]) -> DomainResult<Vec<DeliveryItem>> {
    blocks
        .iter()
        .map(|b| DeliveryItem::new(LotId::new(b.lot_id), b.face_value, b.quantity, b.start))
        .collect()
}

#[derive(Debug, Default)]
pub struct DeliveryLog {
    deliveries: RwLock<HashMap<RequestId, Delivery>>,
    liquidations: RwLock<HashMap<RequestId, Liquidation>>,
}

impl DeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply committed request events.
    ///
    /// Only approvals matter here; re-applying the same event overwrites the
    /// entry with identical content, so replays are harmless.
    pub fn apply_committed(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if stored.aggregate_type != crate::allocation::REQUEST_AGGREGATE_TYPE {
                continue;
            }
            let event = match serde_json::from_value::<RequestEvent>(stored.payload.clone()) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, aggregate_id = %stored.aggregate_id, "skipping undecodable request event");
                    continue;
                }
            };
            let RequestEvent::RequestApproved(approved) = event else {
                continue;
            };
            match items_from_blocks(&approved.items) {
                Ok(items) => {
                    let delivery = Delivery {
                        id: DeliveryId::new(approved.delivery_id),
                        request_id: approved.request_id,
                        fuel_type: approved.fuel_type,
                        approved_by: approved.approved_by,
                        issued_at: approved.occurred_at,
                        items,
                    };
                    if let Ok(mut deliveries) = self.deliveries.write() {
                        deliveries.insert(delivery.request_id, delivery);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, request_id = %approved.request_id, "skipping approval with malformed blocks");
                }
            }
        }
    }

    pub fn delivery_for(&self, request_id: RequestId) -> Option<Delivery> {
        self.deliveries.read().ok()?.get(&request_id).cloned()
    }

    pub fn record_liquidation(&self, liquidation: Liquidation) {
        if let Ok(mut liquidations) = self.liquidations.write() {
            liquidations.insert(liquidation.request_id, liquidation);
        }
    }

    pub fn liquidation_for(&self, request_id: RequestId) -> Option<Liquidation> {
        self.liquidations.read().ok()?.get(&request_id).cloned()
    }
}
