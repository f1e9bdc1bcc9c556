use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use cuponera_core::AggregateId;

use super::store::{EventStore, EventStoreError, StoredEvent, StreamBatch};

/// In-memory append-only event store.
///
/// A single lock guards all streams, which is exactly what makes `append_all`
/// atomic: the whole multi-stream commit happens under one write guard, so a
/// concurrent reader observes all of it or none of it, and two racing
/// commits against the same lot serialize on the version checks.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn validate_batch(batch: &StreamBatch) -> Result<(AggregateId, &str), EventStoreError> {
        let first = batch.events.first().ok_or_else(|| {
            EventStoreError::InvalidAppend("batch contains no events".to_string())
        })?;

        for (idx, e) in batch.events.iter().enumerate() {
            if e.aggregate_id != first.aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != first.aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        Ok((first.aggregate_id, first.aggregate_type.as_str()))
    }
}

impl EventStore for InMemoryEventStore {
    fn append_all(&self, batches: Vec<StreamBatch>) -> Result<Vec<StoredEvent>, EventStoreError> {
        if batches.is_empty() {
            return Ok(vec![]);
        }

        // Each batch must be internally consistent and target its own stream;
        // two batches against one stream would make the version expectations
        // ambiguous.
        let mut seen = HashSet::new();
        for batch in &batches {
            let (aggregate_id, _) = Self::validate_batch(batch)?;
            if !seen.insert(aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "duplicate stream {aggregate_id} in multi-stream append"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        // Phase 1: check every expectation before touching anything.
        for batch in &batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let current = streams
                .get(&aggregate_id)
                .map(|s| Self::current_version(s))
                .unwrap_or(0);

            if !batch.expected.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {aggregate_id}: expected {:?}, found {current}",
                    batch.expected
                )));
            }

            // Enforce aggregate type stability across the stream.
            if let Some(existing) = streams.get(&aggregate_id).and_then(|s| s.first()) {
                if existing.aggregate_type != batch.events[0].aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, batch.events[0].aggregate_type
                    )));
                }
            }
        }

        // Phase 2: assign sequence numbers and append (append-only).
        let mut committed = Vec::new();
        for batch in batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let stream = streams.entry(aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;

            for e in batch.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }
}
