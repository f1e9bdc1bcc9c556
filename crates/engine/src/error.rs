//! Engine-level error model.

use thiserror::Error;

use cuponera_core::DomainError;

use crate::event_store::EventStoreError;

/// Error surfaced by the engines and the command dispatcher.
///
/// Domain failures pass through unchanged so callers can match on the
/// business taxonomy (insufficient stock, invalid state, unknown serial,
/// over-return, validation). The remaining variants are infrastructure
/// outcomes of the commit pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Deterministic business failure; never retried.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Optimistic concurrency conflict: another administrative action
    /// committed first. Engines retry this internally a bounded number of
    /// times before surfacing it.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Failed to deserialize historical event payloads during rehydration.
    #[error("failed to decode stored event: {0}")]
    Deserialize(String),

    /// Persisting to the event store failed.
    #[error(transparent)]
    Store(EventStoreError),

    /// Publication failed after a successful commit. Events are durable;
    /// the caller may re-publish.
    #[error("event publication failed after commit: {0}")]
    Publish(String),
}

impl From<EventStoreError> for EngineError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => EngineError::Conflict(msg),
            other => EngineError::Store(other),
        }
    }
}

impl EngineError {
    /// Whether a bounded reload-and-retry may resolve this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}
