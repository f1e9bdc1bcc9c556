//! Domain error model.

use thiserror::Error;

use crate::id::AggregateId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Every variant is a deterministic business failure: it is reported
/// synchronously to the caller and never retried internally. Infrastructure
/// concerns (storage, concurrency) belong to the engine layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed structural validation (e.g. zero quantity, empty list,
    /// final odometer below the starting reading).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An operation was attempted against a request whose current state does
    /// not permit it (e.g. allocating an already-approved request).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A reservation asked for more coupons than the lot has available.
    /// Recoverable: the approver can pick a different lot or quantity.
    #[error("insufficient stock in lot {lot}: requested {requested}, available {available}")]
    InsufficientStock {
        lot: AggregateId,
        requested: u32,
        available: u32,
    },

    /// A returned serial does not fall inside any coupon block issued for the
    /// request being reconciled. Operator data-entry error.
    #[error("serial {serial} was never issued for request {request}")]
    UnknownSerial { request: AggregateId, serial: u64 },

    /// A return claims more coupons than were issued in the matched block.
    #[error("return range [{start}, {end}] exceeds the {issued} coupons issued in the matched block")]
    OverReturn { start: u64, end: u64, issued: u32 },

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
