//! Domain event abstractions.
//!
//! The engines persist events first (event store) and then publish them on a
//! bus for downstream consumers (voucher printing, audit reporting). This
//! crate holds the transport-agnostic pieces: the `Event` trait, the
//! `EventEnvelope` publication unit, and the bus contract with an in-memory
//! implementation for tests/dev.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
