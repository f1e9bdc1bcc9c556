//! Application layer: event store, dispatch, and the coupon engines.
//!
//! This crate composes the pure domain aggregates into the three operations
//! the surrounding back office calls: `allocate`, `reject`, and `reconcile`.
//! Atomicity is enforced at the store boundary: each engine call stages
//! events for every touched stream (lots plus the request) and commits them
//! in a single multi-stream append, so inventory mutations and the request
//! transition become visible together or not at all.

pub mod allocation;
pub mod delivery_log;
pub mod dispatcher;
pub mod error;
pub mod event_store;
pub mod intake;
pub mod projections;
pub mod reconciliation;

#[cfg(test)]
mod integration_tests;

pub use allocation::{AllocationEngine, DesiredItem};
pub use delivery_log::DeliveryLog;
pub use dispatcher::CommandDispatcher;
pub use error::EngineError;
pub use event_store::{
    EventStore, EventStoreError, InMemoryEventStore, StoredEvent, StreamBatch, UncommittedEvent,
};
pub use intake::RequestIntake;
pub use projections::lot_availability::{LotAvailability, LotSummary};
pub use reconciliation::ReconciliationEngine;
