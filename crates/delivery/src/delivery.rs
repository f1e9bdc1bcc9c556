use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cuponera_core::{AggregateId, DomainError, DomainResult, FuelType, UserId};
use cuponera_inventory::LotId;
use cuponera_requests::RequestId;

/// Delivery identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub AggregateId);

impl DeliveryId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One contiguous serial block issued from one denomination lot.
///
/// `face_value` is copied from the lot at issuance time and stays immutable
/// afterwards, so later lot metadata edits cannot rewrite history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryItem {
    pub lot_id: LotId,
    /// Face value in centavos, captured at issuance.
    pub face_value: u64,
    pub quantity: u32,
    pub start: u64,
    pub end: u64,
    /// `quantity × face_value`, in centavos.
    pub subtotal: u64,
}

impl DeliveryItem {
    /// Build an item from a reservation window, enforcing the block
    /// invariants: `quantity > 0`, `end = start + quantity - 1`,
    /// `subtotal = quantity × face_value`.
    pub fn new(lot_id: LotId, face_value: u64, quantity: u32, start: u64) -> DomainResult<Self> {
        if quantity == 0 {
            return Err(DomainError::validation("delivery item quantity must be positive"));
        }
        if face_value == 0 {
            return Err(DomainError::validation("delivery item face value must be positive"));
        }
        if start == 0 {
            return Err(DomainError::validation("serial numbers start at 1"));
        }
        Ok(Self {
            lot_id,
            face_value,
            quantity,
            start,
            end: start + u64::from(quantity) - 1,
            subtotal: u64::from(quantity) * face_value,
        })
    }

    /// Whether `serial` falls inside this block.
    pub fn contains(&self, serial: u64) -> bool {
        self.start <= serial && serial <= self.end
    }
}

/// The record of coupons issued against one approved travel request.
///
/// Exists at most once per request; created atomically with the `approved`
/// transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub request_id: RequestId,
    pub fuel_type: FuelType,
    pub approved_by: UserId,
    pub issued_at: DateTime<Utc>,
    pub items: Vec<DeliveryItem>,
}

impl Delivery {
    /// Total monetary value of the delivery, in centavos.
    pub fn total(&self) -> u64 {
        self.items.iter().map(|i| i.subtotal).sum()
    }

    /// Total number of coupons issued.
    pub fn total_coupons(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    /// The item whose serial block contains `serial`, if any.
    pub fn item_containing(&self, serial: u64) -> Option<&DeliveryItem> {
        self.items.iter().find(|i| i.contains(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_lot_id() -> LotId {
        LotId::new(AggregateId::new())
    }

    #[test]
    fn item_block_invariants_hold() {
        let item = DeliveryItem::new(test_lot_id(), 5000, 10, 1).unwrap();
        assert_eq!(item.end, 10);
        assert_eq!(item.subtotal, 50_000);
        assert!(item.contains(1));
        assert!(item.contains(10));
        assert!(!item.contains(11));
    }

    #[test]
    fn item_rejects_zero_quantity() {
        let err = DeliveryItem::new(test_lot_id(), 5000, 0, 1).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn delivery_totals_sum_over_items() {
        let delivery = Delivery {
            id: DeliveryId::new(AggregateId::new()),
            request_id: RequestId::new(AggregateId::new()),
            fuel_type: FuelType::Diesel,
            approved_by: UserId::new(),
            issued_at: Utc::now(),
            items: vec![
                DeliveryItem::new(test_lot_id(), 5000, 10, 1).unwrap(),
                DeliveryItem::new(test_lot_id(), 2500, 4, 1).unwrap(),
            ],
        };
        assert_eq!(delivery.total(), 60_000);
        assert_eq!(delivery.total_coupons(), 14);
    }
}
