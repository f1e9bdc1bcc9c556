//! Append-only event store contract.
//!
//! Events are organized into streams, one per aggregate instance, with
//! monotonically increasing sequence numbers. On top of the usual
//! single-stream append the store offers `append_all`: an atomic multi-stream
//! commit that checks the optimistic `ExpectedVersion` of **every** batch
//! before appending **any** event. That operation is the transaction boundary
//! for the coupon engines: an allocation touches several lot streams plus
//! the request stream and must become visible as one unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use cuponera_core::{AggregateId, ExpectedVersion};

/// An event ready to be appended to a stream (not yet assigned a sequence
/// number). Build it from a typed domain event with `from_typed`, which
/// serializes the payload and captures the event metadata needed for later
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Convenience constructor from a typed domain event.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: cuponera_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned by the store during append: stream-scoped,
/// monotonically increasing, immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an event envelope for publication.
    pub fn to_envelope(&self) -> cuponera_events::EventEnvelope<JsonValue> {
        cuponera_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// One stream's slice of a multi-stream commit: the events to append plus
/// the optimistic concurrency expectation for that stream.
#[derive(Debug, Clone)]
pub struct StreamBatch {
    pub expected: ExpectedVersion,
    pub events: Vec<UncommittedEvent>,
}

/// Event store operation error (infrastructure, not domain).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Append-only event store.
///
/// Implementations must:
/// - enforce optimistic concurrency against the current stream version
/// - assign monotonically increasing `sequence_number`s starting at
///   `current_version + 1`
/// - make `append_all` atomic: every batch's expectation is checked before
///   any event is appended, and a concurrent reader observes either all of a
///   commit or none of it
pub trait EventStore: Send + Sync {
    /// Atomically append batches to several streams.
    ///
    /// Returns the committed events across all batches, in batch order.
    fn append_all(&self, batches: Vec<StreamBatch>) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Append events to a single aggregate stream.
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.append_all(vec![StreamBatch {
            expected: expected_version,
            events,
        }])
    }

    /// Load the full stream for an aggregate.
    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append_all(&self, batches: Vec<StreamBatch>) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append_all(batches)
    }

    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }
}
