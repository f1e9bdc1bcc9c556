//! Command execution pipeline for single-aggregate operations.
//!
//! The dispatcher implements the usual event-sourcing loop: load the stream,
//! rehydrate the aggregate, run the pure decision logic, append with an
//! optimistic version check, publish. Intake operations (submit, reject,
//! define lot) go through here; the allocation and reconciliation engines
//! reuse the same rehydration/staging helpers but commit across several
//! streams at once.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use cuponera_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use cuponera_events::{EventBus, EventEnvelope};

use crate::error::EngineError;
use crate::event_store::{EventStore, StoredEvent, StreamBatch, UncommittedEvent};

/// Load an aggregate's stream and replay it into a fresh instance.
///
/// Returns the rehydrated aggregate together with the stream version to use
/// as the optimistic expectation for a subsequent commit.
pub(crate) fn rehydrate<A, S>(
    store: &S,
    aggregate_id: AggregateId,
    make_aggregate: impl FnOnce(AggregateId) -> A,
) -> Result<(A, u64), EngineError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
    S: EventStore,
{
    let history = store.load_stream(aggregate_id)?;
    validate_loaded_stream(aggregate_id, &history)?;
    let version = stream_version(&history);

    let mut aggregate = make_aggregate(aggregate_id);
    for stored in &history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| EngineError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok((aggregate, version))
}

/// Stage typed events as a single-stream batch for a multi-stream commit.
pub(crate) fn stage_batch<E>(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    expected: ExpectedVersion,
    events: &[E],
) -> Result<StreamBatch, EngineError>
where
    E: cuponera_events::Event + Serialize,
{
    let uncommitted = events
        .iter()
        .map(|ev| {
            UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(StreamBatch {
        expected,
        events: uncommitted,
    })
}

/// Publish committed events; failures surface as `Publish` (the events are
/// already durable).
pub(crate) fn publish_committed<B>(bus: &B, committed: &[StoredEvent]) -> Result<(), EngineError>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    for stored in committed {
        bus.publish(stored.to_envelope())
            .map_err(|e| EngineError::Publish(format!("{e:?}")))?;
    }
    Ok(())
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), EngineError> {
    // Ensure the stream belongs to the requested aggregate and is
    // monotonically increasing by sequence number, even if a buggy backend
    // returns something else.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(EngineError::Deserialize(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            )));
        }
        if e.sequence_number <= last {
            return Err(EngineError::Deserialize(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            )));
        }
        last = e.sequence_number;
    }
    Ok(())
}

/// Reusable command execution engine for single-aggregate commands.
///
/// Generic over the store and bus so tests can run fully in memory and a
/// persistent backend can be swapped in without touching domain code.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Dispatch a command through the full pipeline:
    /// load → rehydrate → decide → append (optimistic) → publish.
    ///
    /// Returns the committed events with their assigned sequence numbers.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, EngineError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: cuponera_events::Event + Serialize + DeserializeOwned,
    {
        let (aggregate, version) = rehydrate(&self.store, aggregate_id, make_aggregate)?;

        let decided = aggregate.handle(&command).map_err(EngineError::from)?;
        if decided.is_empty() {
            return Ok(vec![]);
        }

        let batch = stage_batch(
            aggregate_id,
            aggregate_type,
            ExpectedVersion::Exact(version),
            &decided,
        )?;
        let committed = self.store.append_all(vec![batch])?;

        publish_committed(&self.bus, &committed)?;

        Ok(committed)
    }
}
