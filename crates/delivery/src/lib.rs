//! Delivery and liquidation records.
//!
//! A `Delivery` is the record of coupons issued against one approved travel
//! request; a `Liquidation` is the reconciliation record that closes it.
//! Both are plain records built by the engines. This crate also owns the pure
//! serial-range resolver that maps returned serials back onto the coupon
//! blocks they were issued from.

pub mod delivery;
pub mod liquidation;

pub use delivery::{Delivery, DeliveryId, DeliveryItem};
pub use liquidation::{Liquidation, ReturnRange, ReturnedItem, resolve_returns};
