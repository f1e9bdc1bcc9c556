use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use cuponera_core::{AggregateId, FuelType};
use cuponera_events::EventEnvelope;
use cuponera_inventory::{LotEvent, LotId};

use crate::event_store::StoredEvent;

/// Queryable inventory read model: one row per denomination lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotSummary {
    pub lot_id: LotId,
    pub product: String,
    /// Face value in centavos.
    pub face_value: u64,
    pub fuel_type: FuelType,
    pub available: u32,
}

#[derive(Debug, Error)]
pub enum LotProjectionError {
    #[error("failed to deserialize lot event: {0}")]
    Deserialize(String),
}

/// Per-stream application state: the last sequence number applied plus any
/// events that arrived ahead of their turn.
///
/// Engine threads hand over committed events after the store lock is
/// released, so two commits against one lot can arrive out of order. Events
/// are applied strictly in sequence: an early arrival waits in `pending`
/// until the gap closes, a duplicate at or below `applied` is dropped.
#[derive(Debug, Default)]
struct StreamCursor {
    applied: u64,
    pending: BTreeMap<u64, LotEvent>,
}

/// Lot availability projection.
///
/// Serves `list_available`: the allocation choices shown to an approver,
/// scarcest lots first so limited denominations get used before they strand.
/// Disposable and rebuildable from the lot streams; at-least-once delivery
/// and cross-thread reordering are absorbed by the per-stream cursor.
#[derive(Debug, Default)]
pub struct LotAvailability {
    lots: RwLock<HashMap<LotId, LotSummary>>,
    cursors: RwLock<HashMap<AggregateId, StreamCursor>>,
}

impl LotAvailability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, lot_id: LotId) -> Option<LotSummary> {
        self.lots.read().ok()?.get(&lot_id).cloned()
    }

    /// Lots of the given fuel type with coupons left to issue, ordered by
    /// ascending availability, then ascending face value.
    pub fn list_available(&self, fuel_type: FuelType) -> Vec<LotSummary> {
        let mut lots: Vec<LotSummary> = match self.lots.read() {
            Ok(guard) => guard
                .values()
                .filter(|l| l.fuel_type == fuel_type && l.available > 0)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        };
        lots.sort_by(|a, b| {
            a.available
                .cmp(&b.available)
                .then(a.face_value.cmp(&b.face_value))
        });
        lots
    }

    /// Apply committed events synchronously after an engine commit.
    pub fn apply_committed(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if stored.aggregate_type != crate::allocation::LOT_AGGREGATE_TYPE {
                continue;
            }
            // Committed events come from our own append; a decode failure
            // here would be a bug upstream, so it is logged and skipped
            // rather than poisoning the read model.
            match serde_json::from_value::<LotEvent>(stored.payload.clone()) {
                Ok(event) => self.apply_event(stored.aggregate_id, stored.sequence_number, &event),
                Err(e) => {
                    tracing::warn!(error = %e, aggregate_id = %stored.aggregate_id, "skipping undecodable lot event");
                }
            }
        }
    }

    /// Apply a published envelope (bus-driven rebuild path).
    ///
    /// Idempotent for at-least-once delivery: replays at or below the cursor
    /// are ignored.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), LotProjectionError> {
        if envelope.aggregate_type() != crate::allocation::LOT_AGGREGATE_TYPE {
            return Ok(());
        }
        let event: LotEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| LotProjectionError::Deserialize(e.to_string()))?;
        self.apply_event(envelope.aggregate_id(), envelope.sequence_number(), &event);
        Ok(())
    }

    fn apply_event(&self, aggregate_id: AggregateId, sequence_number: u64, event: &LotEvent) {
        let Ok(mut cursors) = self.cursors.write() else {
            return;
        };
        let cursor = cursors.entry(aggregate_id).or_default();
        if sequence_number <= cursor.applied {
            // Duplicate or replay; safe to ignore.
            return;
        }
        cursor.pending.insert(sequence_number, event.clone());

        // Drain in strict sequence order; a gap leaves later events parked
        // until the missing commit arrives.
        while let Some(next) = cursor.pending.remove(&(cursor.applied + 1)) {
            cursor.applied += 1;
            self.project(&next);
        }
    }

    fn project(&self, event: &LotEvent) {
        let Ok(mut lots) = self.lots.write() else {
            return;
        };
        match event {
            LotEvent::LotDefined(e) => {
                lots.insert(
                    e.lot_id,
                    LotSummary {
                        lot_id: e.lot_id,
                        product: e.product.clone(),
                        face_value: e.face_value,
                        fuel_type: e.fuel_type,
                        available: e.initial_available,
                    },
                );
            }
            LotEvent::CouponsReserved(e) => {
                if let Some(summary) = lots.get_mut(&e.lot_id) {
                    summary.available = summary.available.saturating_sub(e.quantity);
                }
            }
            LotEvent::CouponsCredited(e) => {
                if let Some(summary) = lots.get_mut(&e.lot_id) {
                    summary.available += e.quantity;
                }
            }
        }
    }
}
