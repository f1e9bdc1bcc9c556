//! End-to-end tests driving the engines against the in-memory store and bus,
//! the way the surrounding back office composes them.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use cuponera_core::{AggregateId, DomainError, FuelType, UserId};
use cuponera_delivery::ReturnRange;
use cuponera_events::{EventEnvelope, InMemoryEventBus};
use cuponera_inventory::{DefineLot, LotId};
use cuponera_requests::{ItineraryLeg, RequestId, RequestStatus, SubmitRequest, TravelRequest};

use crate::allocation::{AllocationEngine, DesiredItem};
use crate::delivery_log::DeliveryLog;
use crate::dispatcher::rehydrate;
use crate::error::EngineError;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::intake::RequestIntake;
use crate::projections::lot_availability::LotAvailability;
use crate::reconciliation::ReconciliationEngine;

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Harness {
    store: Store,
    bus: Bus,
    availability: Arc<LotAvailability>,
    intake: RequestIntake<Store, Bus>,
    allocation: AllocationEngine<Store, Bus>,
    reconciliation: ReconciliationEngine<Store, Bus>,
}

impl Harness {
    fn new() -> Self {
        // Idempotent; gives the engines' tracing output a subscriber when
        // running with RUST_LOG set.
        cuponera_observability::init();

        let store: Store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let availability = Arc::new(LotAvailability::new());
        let deliveries = Arc::new(DeliveryLog::new());

        Self {
            intake: RequestIntake::new(store.clone(), bus.clone(), availability.clone()),
            allocation: AllocationEngine::new(
                store.clone(),
                bus.clone(),
                availability.clone(),
                deliveries.clone(),
            ),
            reconciliation: ReconciliationEngine::new(
                store.clone(),
                bus.clone(),
                availability.clone(),
                deliveries,
            ),
            store,
            bus,
            availability,
        }
    }

    fn define_lot(&self, face_value: u64, fuel_type: FuelType, initial_available: u32) -> LotId {
        let lot_id = LotId::new(AggregateId::new());
        self.intake
            .define_lot(DefineLot {
                lot_id,
                product: "Cupón de combustible".to_string(),
                face_value,
                fuel_type,
                initial_available,
                occurred_at: Utc::now(),
            })
            .unwrap();
        lot_id
    }

    fn submit_request(&self, fuel_type: FuelType, starting_odometer: u32) -> RequestId {
        let request_id = RequestId::new(AggregateId::new());
        self.intake
            .submit(SubmitRequest {
                request_id,
                correlativo: Some(417),
                plate: "O-12345".to_string(),
                destination: "Aldea El Durazno".to_string(),
                starting_odometer,
                justification: "Supervisión de obra".to_string(),
                fuel_type,
                legs: vec![ItineraryLeg {
                    destination: "Aldea El Durazno".to_string(),
                    distance_km: 35,
                    departs_at: Utc::now(),
                    returns_at: Utc::now(),
                }],
                requested_by: UserId::new(),
                occurred_at: Utc::now(),
            })
            .unwrap();
        request_id
    }

    fn available(&self, lot_id: LotId) -> u32 {
        self.availability.get(lot_id).map(|l| l.available).unwrap_or(0)
    }

    fn request_status(&self, request_id: RequestId) -> RequestStatus {
        let (request, _) = rehydrate::<TravelRequest, _>(&self.store, request_id.0, |id| {
            TravelRequest::empty(RequestId::new(id))
        })
        .unwrap();
        request.status()
    }
}

#[test]
fn full_round_trip_allocate_and_reconcile() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    let delivery = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();

    assert_eq!(delivery.items.len(), 1);
    assert_eq!(delivery.items[0].start, 1);
    assert_eq!(delivery.items[0].end, 10);
    assert_eq!(delivery.items[0].subtotal, 50_000);
    assert_eq!(delivery.total(), 50_000);
    assert_eq!(h.available(lot), 90);
    assert_eq!(
        h.request_status(request),
        RequestStatus::Approved { solvent: false }
    );

    let liquidation = h
        .reconciliation
        .reconcile(
            request,
            48_350,
            Utc::now(),
            &[ReturnRange {
                start: 1,
                end: Some(5),
            }],
            Utc::now(),
        )
        .unwrap();

    assert_eq!(liquidation.distance_traveled, 150);
    assert_eq!(liquidation.credited_value(), 25_000);
    assert_eq!(h.available(lot), 95);
    assert_eq!(
        h.request_status(request),
        RequestStatus::Approved { solvent: true }
    );
}

#[test]
fn second_allocation_against_same_request_is_rejected() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);
    let desired = [DesiredItem {
        lot_id: lot,
        quantity: 10,
    }];

    h.allocation
        .allocate(request, UserId::new(), &desired, Utc::now())
        .unwrap();
    let err = h
        .allocation
        .allocate(request, UserId::new(), &desired, Utc::now())
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InvalidState(_))
    ));
    // The failed attempt reserved nothing.
    assert_eq!(h.available(lot), 90);
}

#[test]
fn reconcile_solvent_request_is_rejected_without_credit() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    h.allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();
    h.reconciliation
        .reconcile(request, 48_350, Utc::now(), &[], Utc::now())
        .unwrap();
    assert_eq!(h.available(lot), 90);

    let err = h
        .reconciliation
        .reconcile(
            request,
            48_400,
            Utc::now(),
            &[ReturnRange {
                start: 1,
                end: Some(5),
            }],
            Utc::now(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InvalidState(_))
    ));
    assert_eq!(h.available(lot), 90);
}

#[test]
fn unknown_returned_serial_rejects_whole_reconciliation() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    h.allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();

    let err = h
        .reconciliation
        .reconcile(
            request,
            48_350,
            Utc::now(),
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
            Utc::now(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::UnknownSerial { serial: 999, .. })
    ));
    // Nothing credited, request still awaits liquidation.
    assert_eq!(h.available(lot), 90);
    assert_eq!(
        h.request_status(request),
        RequestStatus::Approved { solvent: false }
    );
}

#[test]
fn zero_quantity_fails_before_touching_inventory() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    let err = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 0,
            }],
            Utc::now(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::Validation(_))
    ));
    assert_eq!(h.available(lot), 100);
    assert_eq!(h.request_status(request), RequestStatus::Pending);
}

#[test]
fn insufficient_stock_leaves_everything_untouched() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 5);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    let err = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 6,
            }],
            Utc::now(),
        )
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InsufficientStock {
            requested: 6,
            available: 5,
            ..
        })
    ));
    assert_eq!(h.available(lot), 5);
    assert_eq!(h.request_status(request), RequestStatus::Pending);
}

#[test]
fn multi_lot_allocation_commits_atomically() {
    let h = Harness::new();
    let big = h.define_lot(5000, FuelType::Diesel, 100);
    let small = h.define_lot(2500, FuelType::Diesel, 3);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    // Second lot cannot cover the request; the first lot must stay untouched.
    let err = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[
                DesiredItem {
                    lot_id: big,
                    quantity: 10,
                },
                DesiredItem {
                    lot_id: small,
                    quantity: 4,
                },
            ],
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InsufficientStock { .. })
    ));
    assert_eq!(h.available(big), 100);
    assert_eq!(h.available(small), 3);

    // A feasible mix commits both reservations together.
    let delivery = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[
                DesiredItem {
                    lot_id: big,
                    quantity: 10,
                },
                DesiredItem {
                    lot_id: small,
                    quantity: 3,
                },
            ],
            Utc::now(),
        )
        .unwrap();
    assert_eq!(delivery.total(), 50_000 + 7_500);
    assert_eq!(h.available(big), 90);
    assert_eq!(h.available(small), 0);
}

#[test]
fn fuel_type_mismatch_is_rejected() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Regular, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    let err = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Domain(DomainError::Validation(_))
    ));
    assert_eq!(h.available(lot), 100);
}

#[test]
fn empty_returns_still_finalize_the_liquidation() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    h.allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();

    let liquidation = h
        .reconciliation
        .reconcile(request, 48_350, Utc::now(), &[], Utc::now())
        .unwrap();

    assert!(liquidation.returns.is_empty());
    assert_eq!(liquidation.credited_value(), 0);
    assert_eq!(h.available(lot), 90);
    assert_eq!(
        h.request_status(request),
        RequestStatus::Approved { solvent: true }
    );
}

#[test]
fn rejected_request_cannot_be_allocated() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    h.intake.reject(request, UserId::new(), Utc::now()).unwrap();

    let err = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Domain(DomainError::InvalidState(_))
    ));
    assert_eq!(h.request_status(request), RequestStatus::Rejected);
}

#[test]
fn list_available_orders_scarcest_first_and_filters_fuel() {
    let h = Harness::new();
    let scarce = h.define_lot(10_000, FuelType::Diesel, 5);
    let plentiful = h.define_lot(2500, FuelType::Diesel, 200);
    let _other_fuel = h.define_lot(5000, FuelType::Super, 50);
    let drained = h.define_lot(5000, FuelType::Diesel, 3);
    let request = h.submit_request(FuelType::Diesel, 48_200);
    h.allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: drained,
                quantity: 3,
            }],
            Utc::now(),
        )
        .unwrap();

    let listed = h.allocation.list_available(FuelType::Diesel);
    let ids: Vec<LotId> = listed.iter().map(|l| l.lot_id).collect();
    assert_eq!(ids, vec![scarce, plentiful]);
}

#[test]
fn serials_from_successive_deliveries_never_overlap() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);

    let first = h.submit_request(FuelType::Diesel, 10_000);
    let second = h.submit_request(FuelType::Diesel, 20_000);

    let d1 = h
        .allocation
        .allocate(
            first,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();
    // Returning coupons restores availability but never frees their serials.
    h.reconciliation
        .reconcile(
            first,
            10_050,
            Utc::now(),
            &[ReturnRange {
                start: 1,
                end: Some(10),
            }],
            Utc::now(),
        )
        .unwrap();
    assert_eq!(h.available(lot), 100);

    let d2 = h
        .allocation
        .allocate(
            second,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 5,
            }],
            Utc::now(),
        )
        .unwrap();

    assert_eq!(d1.items[0].end, 10);
    assert_eq!(d2.items[0].start, 11);
    assert_eq!(d2.items[0].end, 15);
}

#[test]
fn concurrent_allocations_never_oversubscribe_a_lot() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let first = h.submit_request(FuelType::Diesel, 10_000);
    let second = h.submit_request(FuelType::Diesel, 20_000);

    let outcomes: Vec<Result<(), EngineError>> = std::thread::scope(|scope| {
        let handles = [first, second].map(|request| {
            let allocation = &h.allocation;
            scope.spawn(move || {
                allocation
                    .allocate(
                        request,
                        UserId::new(),
                        &[DesiredItem {
                            lot_id: lot,
                            quantity: 60,
                        }],
                        Utc::now(),
                    )
                    .map(|_| ())
            })
        });
        handles.map(|handle| handle.join().unwrap()).into()
    });

    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);
    let failure = outcomes.into_iter().find(Result::is_err).unwrap().unwrap_err();
    assert!(matches!(
        failure,
        EngineError::Domain(DomainError::InsufficientStock { .. })
    ));
    assert_eq!(h.available(lot), 40);
}

#[test]
fn reconciliation_reads_the_delivery_from_the_request_stream() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    h.allocation
        .allocate(
            request,
            UserId::new(),
            &[DesiredItem {
                lot_id: lot,
                quantity: 10,
            }],
            Utc::now(),
        )
        .unwrap();

    // A reconciler that shares nothing with the allocation engine but the
    // store still sees the issued blocks: they ride on the approval event.
    let fresh = ReconciliationEngine::new(
        h.store.clone(),
        h.bus.clone(),
        h.availability.clone(),
        Arc::new(DeliveryLog::new()),
    );
    let liquidation = fresh
        .reconcile(
            request,
            48_350,
            Utc::now(),
            &[ReturnRange {
                start: 1,
                end: Some(5),
            }],
            Utc::now(),
        )
        .unwrap();

    assert_eq!(liquidation.credited_value(), 25_000);
    assert_eq!(h.available(lot), 95);
    assert_eq!(
        h.request_status(request),
        RequestStatus::Approved { solvent: true }
    );
}

#[test]
fn delivery_log_rebuilds_from_committed_request_events() {
    let h = Harness::new();
    let lot = h.define_lot(5000, FuelType::Diesel, 100);
    let other_lot = h.define_lot(2500, FuelType::Diesel, 50);
    let request = h.submit_request(FuelType::Diesel, 48_200);

    let delivery = h
        .allocation
        .allocate(
            request,
            UserId::new(),
            &[
                DesiredItem {
                    lot_id: lot,
                    quantity: 10,
                },
                DesiredItem {
                    lot_id: other_lot,
                    quantity: 4,
                },
            ],
            Utc::now(),
        )
        .unwrap();

    let rebuilt = DeliveryLog::new();
    rebuilt.apply_committed(&h.store.load_stream(request.0).unwrap());

    assert_eq!(rebuilt.delivery_for(request), Some(delivery));
}
