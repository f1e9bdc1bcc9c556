//! Travel-request domain module (event-sourced).
//!
//! A `TravelRequest` is a vehicle-use commission needing fuel. Its lifecycle
//! is a small guarded state machine: `pending` → `approved(solvent=false)` →
//! `approved(solvent=true)` (terminal), or `pending` → `rejected` (terminal).
//! Approval and liquidation finalization are reserved for the engines; the
//! surrounding application only submits and rejects.

pub mod request;

pub use request::{
    ApproveRequest, FinalizeLiquidation, IssuedBlock, ItineraryLeg, LiquidationFinalized,
    RejectRequest, RequestApproved, RequestCommand, RequestEvent, RequestId, RequestRejected,
    RequestStatus, RequestSubmitted, SubmitRequest, TravelRequest,
};
