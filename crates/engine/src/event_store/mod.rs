pub mod in_memory;
pub mod store;

pub use in_memory::InMemoryEventStore;
pub use store::{EventStore, EventStoreError, StoredEvent, StreamBatch, UncommittedEvent};
