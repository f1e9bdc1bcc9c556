use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use std::sync::Arc;

use cuponera_core::{AggregateId, ExpectedVersion, FuelType, UserId};
use cuponera_engine::{
    AllocationEngine, DeliveryLog, DesiredItem, EventStore, InMemoryEventStore, LotAvailability,
    RequestIntake, StreamBatch, UncommittedEvent,
};
use cuponera_events::{EventEnvelope, InMemoryEventBus};
use cuponera_inventory::{CouponsReserved, DefineLot, LotDefined, LotEvent, LotId};
use cuponera_requests::{ItineraryLeg, RequestId, SubmitRequest};

type Store = Arc<InMemoryEventStore>;
type Bus = Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>;

struct Setup {
    intake: RequestIntake<Store, Bus>,
    allocation: AllocationEngine<Store, Bus>,
}

fn setup() -> Setup {
    cuponera_observability::init();

    let store: Store = Arc::new(InMemoryEventStore::new());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let availability = Arc::new(LotAvailability::new());
    let deliveries = Arc::new(DeliveryLog::new());

    Setup {
        intake: RequestIntake::new(store.clone(), bus.clone(), availability.clone()),
        allocation: AllocationEngine::new(store, bus, availability, deliveries),
    }
}

fn define_lot(setup: &Setup, initial_available: u32) -> LotId {
    let lot_id = LotId::new(AggregateId::new());
    setup
        .intake
        .define_lot(DefineLot {
            lot_id,
            product: "Cupón de combustible".to_string(),
            face_value: 5000,
            fuel_type: FuelType::Diesel,
            initial_available,
            occurred_at: Utc::now(),
        })
        .unwrap();
    lot_id
}

fn submit_request(setup: &Setup) -> RequestId {
    let request_id = RequestId::new(AggregateId::new());
    setup
        .intake
        .submit(SubmitRequest {
            request_id,
            correlativo: None,
            plate: "O-12345".to_string(),
            destination: "Aldea El Durazno".to_string(),
            starting_odometer: 48_200,
            justification: "Supervisión de obra".to_string(),
            fuel_type: FuelType::Diesel,
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

fn bench_allocation_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation_latency");
    group.sample_size(1000);

    // Fresh request each iteration, single lot whose stream grows over the
    // run (rehydration cost included, as in production).
    group.bench_function("allocate_single_lot", |b| {
        let setup = setup();
        let lot_id = define_lot(&setup, u32::MAX);

        b.iter(|| {
            let request_id = submit_request(&setup);
            setup
                .allocation
                .allocate(
                    request_id,
                    UserId::new(),
                    black_box(&[DesiredItem {
                        lot_id,
                        quantity: 10,
                    }]),
                    Utc::now(),
                )
                .unwrap();
        });
    });

    group.bench_function("allocate_three_lots", |b| {
        let setup = setup();
        let lots: Vec<LotId> = (0..3).map(|_| define_lot(&setup, u32::MAX)).collect();

        b.iter(|| {
            let request_id = submit_request(&setup);
            let desired: Vec<DesiredItem> = lots
                .iter()
                .map(|&lot_id| DesiredItem {
                    lot_id,
                    quantity: 5,
                })
                .collect();
            setup
                .allocation
                .allocate(request_id, UserId::new(), black_box(&desired), Utc::now())
                .unwrap();
        });
    });

    group.finish();
}

fn lot_defined_event(lot_id: LotId, initial_available: u32) -> LotEvent {
    LotEvent::LotDefined(LotDefined {
        lot_id,
        product: "Cupón de combustible".to_string(),
        face_value: 5000,
        fuel_type: FuelType::Diesel,
        initial_available,
        occurred_at: Utc::now(),
    })
}

fn bench_multi_stream_append_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("multi_stream_append_throughput");

    for stream_count in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*stream_count as u64));
        group.bench_with_input(
            BenchmarkId::new("append_all", stream_count),
            stream_count,
            |b, &count| {
                let store = InMemoryEventStore::new();

                b.iter(|| {
                    let batches: Vec<StreamBatch> = (0..count)
                        .map(|_| {
                            let lot_id = LotId::new(AggregateId::new());
                            let event = lot_defined_event(lot_id, 100);
                            StreamBatch {
                                expected: ExpectedVersion::Exact(0),
                                events: vec![
                                    UncommittedEvent::from_typed(
                                        lot_id.0,
                                        "inventory.lot",
                                        uuid::Uuid::now_v7(),
                                        &event,
                                    )
                                    .unwrap(),
                                ],
                            }
                        })
                        .collect();

                    black_box(store.append_all(batches).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_projection_rebuild_speed(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild_speed");

    for event_count in [10u32, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_events", event_count),
            event_count,
            |b, &count| {
                let store = InMemoryEventStore::new();
                let lot_id = LotId::new(AggregateId::new());

                let mut all_envelopes = Vec::new();
                let stored = store
                    .append(
                        vec![
                            UncommittedEvent::from_typed(
                                lot_id.0,
                                "inventory.lot",
                                uuid::Uuid::now_v7(),
                                &lot_defined_event(lot_id, count),
                            )
                            .unwrap(),
                        ],
                        ExpectedVersion::Exact(0),
                    )
                    .unwrap();
                all_envelopes.push(stored[0].to_envelope());

                for i in 0..(count - 1) {
                    let serial = u64::from(i) + 1;
                    let event = LotEvent::CouponsReserved(CouponsReserved {
                        lot_id,
                        quantity: 1,
                        start: serial,
                        end: serial,
                        occurred_at: Utc::now(),
                    });
                    let stored = store
                        .append(
                            vec![
                                UncommittedEvent::from_typed(
                                    lot_id.0,
                                    "inventory.lot",
                                    uuid::Uuid::now_v7(),
                                    &event,
                                )
                                .unwrap(),
                            ],
                            ExpectedVersion::Exact(u64::from(i) + 1),
                        )
                        .unwrap();
                    all_envelopes.push(stored[0].to_envelope());
                }

                b.iter(|| {
                    let projection = LotAvailability::new();
                    for envelope in &all_envelopes {
                        projection.apply_envelope(black_box(envelope)).unwrap();
                    }
                    black_box(projection.get(lot_id).unwrap());
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_allocation_latency,
    bench_multi_stream_append_throughput,
    bench_projection_rebuild_speed
);
criterion_main!(benches);
