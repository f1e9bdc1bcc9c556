//! `cuponera-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns)
//! shared by the fuel-coupon modules: typed identifiers, the domain error
//! taxonomy, fuel categories, and the aggregate traits.

pub mod aggregate;
pub mod error;
pub mod fuel;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use fuel::FuelType;
pub use id::{AggregateId, UserId};
