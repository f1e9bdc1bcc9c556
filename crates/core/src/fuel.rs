//! Fuel categories.
//!
//! Every denomination lot and every travel request carries a fuel category;
//! coupons from a lot can only be issued against a request of the same
//! category.

use serde::{Deserialize, Serialize};

/// Fuel-type category of a coupon lot or vehicle commission.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    Diesel,
    Regular,
    Super,
}

impl core::fmt::Display for FuelType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FuelType::Diesel => write!(f, "diesel"),
            FuelType::Regular => write!(f, "regular"),
            FuelType::Super => write!(f, "super"),
        }
    }
}
