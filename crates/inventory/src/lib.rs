//! Coupon inventory domain module (event-sourced).
//!
//! A `DenominationLot` is a pool of interchangeable serial-numbered paper
//! coupons sharing one face value and fuel category. Lots are the only shared
//! mutable resource in the system: counts move exclusively through the
//! reserve/credit commands defined here, implemented purely as deterministic
//! domain logic (no IO, no HTTP, no storage).

pub mod lot;

pub use lot::{
    CouponsCredited, CouponsReserved, CreditCoupons, DefineLot, DenominationLot, LotCommand,
    LotDefined, LotEvent, LotId, ReserveCoupons,
};
