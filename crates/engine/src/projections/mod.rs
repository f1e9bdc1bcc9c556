//! Read models maintained from committed events.

pub mod lot_availability;
