//! Liquidation records and the returned-serial resolver.
//!
//! The resolver owns the lookup the reconciliation flow depends on: a return
//! is keyed only by its start serial, and the originating delivery item is
//! recomputed from the request's issuance history, never stored as a foreign
//! key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cuponera_core::{DomainError, DomainResult};
use cuponera_inventory::LotId;
use cuponera_requests::RequestId;

use crate::delivery::Delivery;

/// Raw return entry as captured from the liquidation form: a start serial
/// and an optional end. A missing end means a single coupon.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// A resolved return: coupons physically handed back and credited to the lot
/// they were issued from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedItem {
    pub lot_id: LotId,
    /// Face value captured on the originating delivery item, in centavos.
    pub face_value: u64,
    pub quantity: u32,
    pub start: u64,
    pub end: u64,
}

impl ReturnedItem {
    /// Monetary value credited back, in centavos.
    pub fn credited_value(&self) -> u64 {
        u64::from(self.quantity) * self.face_value
    }
}

/// The reconciliation record closing a travel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liquidation {
    pub request_id: RequestId,
    pub final_odometer: u32,
    pub completed_at: DateTime<Utc>,
    pub returns: Vec<ReturnedItem>,
    /// `final_odometer − starting_odometer`.
    pub distance_traveled: u32,
}

impl Liquidation {
    pub fn new(
        request_id: RequestId,
        starting_odometer: u32,
        final_odometer: u32,
        completed_at: DateTime<Utc>,
        returns: Vec<ReturnedItem>,
    ) -> DomainResult<Self> {
        if final_odometer < starting_odometer {
            return Err(DomainError::validation(format!(
                "final odometer {final_odometer} is below starting odometer {starting_odometer}"
            )));
        }
        Ok(Self {
            request_id,
            final_odometer,
            completed_at,
            returns,
            distance_traveled: final_odometer - starting_odometer,
        })
    }

    /// Total monetary value credited back to inventory, in centavos.
    pub fn credited_value(&self) -> u64 {
        self.returns.iter().map(ReturnedItem::credited_value).sum()
    }
}

/// Resolve every raw return range against the delivery's issued blocks.
///
/// Rules, applied before any inventory credit:
/// - the start serial must fall inside exactly one issued block
///   (`UnknownSerial` otherwise);
/// - an explicit end must stay inside that same block (`OverReturn` if it
///   runs past it);
/// - across the whole call, the coupons returned from one block must not
///   exceed the block's issued quantity and ranges must not overlap
///   (`OverReturn`).
///
/// Fails as a whole: one bad entry rejects the entire reconciliation.
pub fn resolve_returns(delivery: &Delivery, returns: &[ReturnRange]) -> DomainResult<Vec<ReturnedItem>> {
    let mut resolved: Vec<ReturnedItem> = Vec::with_capacity(returns.len());
    // Per-item running totals, indexed like delivery.items.
    let mut returned_per_item = vec![0u32; delivery.items.len()];

    for range in returns {
        let (idx, item) = delivery
            .items
            .iter()
            .enumerate()
            .find(|(_, item)| item.contains(range.start))
            .ok_or(DomainError::UnknownSerial {
                request: delivery.request_id.0,
                serial: range.start,
            })?;

        let end = range.end.unwrap_or(range.start);
        if end < range.start {
            return Err(DomainError::validation(format!(
                "return range end {end} precedes start {}",
                range.start
            )));
        }
        if end > item.end {
            return Err(DomainError::OverReturn {
                start: range.start,
                end,
                issued: item.quantity,
            });
        }

        for prior in resolved.iter().filter(|r| r.lot_id == item.lot_id) {
            if range.start <= prior.end && prior.start <= end {
                return Err(DomainError::OverReturn {
                    start: range.start,
                    end,
                    issued: item.quantity,
                });
            }
        }

        let quantity = u32::try_from(end - range.start + 1)
            .map_err(|_| DomainError::validation("return range is implausibly large"))?;
        returned_per_item[idx] += quantity;
        if returned_per_item[idx] > item.quantity {
            return Err(DomainError::OverReturn {
                start: range.start,
                end,
                issued: item.quantity,
            });
        }

        resolved.push(ReturnedItem {
            lot_id: item.lot_id,
            face_value: item.face_value,
            quantity,
            start: range.start,
            end,
        });
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{Delivery, DeliveryId, DeliveryItem};
    use cuponera_core::{AggregateId, FuelType, UserId};

    fn two_block_delivery() -> Delivery {
        // Block 1: serials 1..=10 at Q50; block 2: serials 1..=4 at Q25
        // (different lot, so serial spaces are independent).
        Delivery {
            id: DeliveryId::new(AggregateId::new()),
            request_id: RequestId::new(AggregateId::new()),
            fuel_type: FuelType::Diesel,
            approved_by: UserId::new(),
            issued_at: Utc::now(),
            items: vec![
                DeliveryItem::new(LotId::new(AggregateId::new()), 5000, 10, 1).unwrap(),
                DeliveryItem::new(LotId::new(AggregateId::new()), 2500, 4, 1).unwrap(),
            ],
        }
    }

    #[test]
    fn sub_range_resolves_to_issuing_block() {
        let delivery = two_block_delivery();
        let resolved = resolve_returns(
            &delivery,
            &[ReturnRange {
                start: 6,
                end: Some(10),
            }],
        )
        .unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].lot_id, delivery.items[0].lot_id);
        assert_eq!(resolved[0].quantity, 5);
        assert_eq!(resolved[0].face_value, 5000);
        assert_eq!(resolved[0].credited_value(), 25_000);
    }

    #[test]
    fn missing_end_means_single_coupon() {
        let delivery = two_block_delivery();
        let resolved = resolve_returns(&delivery, &[ReturnRange { start: 3, end: None }]).unwrap();
        assert_eq!(resolved[0].quantity, 1);
        assert_eq!(resolved[0].end, 3);
    }

    #[test]
    fn unknown_serial_rejects_the_whole_call() {
        let delivery = two_block_delivery();
        let err = resolve_returns(
            &delivery,
            &[
                ReturnRange {
                    start: 1,
                    end: Some(2),
                },
                ReturnRange {
                    start: 999,
                    end: None,
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::UnknownSerial { serial: 999, .. }));
    }

    #[test]
    fn end_past_block_is_over_return() {
        let delivery = two_block_delivery();
        let err = resolve_returns(
            &delivery,
            &[ReturnRange {
                start: 8,
                end: Some(12),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::OverReturn { issued: 10, .. }));
    }

    #[test]
    fn overlapping_returns_against_one_block_are_rejected() {
        let delivery = two_block_delivery();
        let err = resolve_returns(
            &delivery,
            &[
                ReturnRange {
                    start: 1,
                    end: Some(5),
                },
                ReturnRange {
                    start: 4,
                    end: Some(6),
                },
            ],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::OverReturn { .. }));
    }

    #[test]
    fn inverted_range_is_validation_error() {
        let delivery = two_block_delivery();
        let err = resolve_returns(
            &delivery,
            &[ReturnRange {
                start: 5,
                end: Some(2),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn liquidation_rejects_odometer_regression() {
        let err = Liquidation::new(
            RequestId::new(AggregateId::new()),
            48_200,
            48_100,
            Utc::now(),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn liquidation_computes_distance_and_credit() {
        let liquidation = Liquidation::new(
            RequestId::new(AggregateId::new()),
            48_200,
            48_350,
            Utc::now(),
            vec![ReturnedItem {
                lot_id: LotId::new(AggregateId::new()),
                face_value: 5000,
                quantity: 5,
                start: 1,
                end: 5,
            }],
        )
        .unwrap();
        assert_eq!(liquidation.distance_traveled, 150);
        assert_eq!(liquidation.credited_value(), 25_000);
    }
}
