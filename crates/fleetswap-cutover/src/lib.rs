//! fleetswap-cutover — the blue-green cutover engine.
//!
//! Moves a set of load balancers from the currently live auto scaling
//! group to a newly provisioned one without a traffic-serving gap:
//! attach the balancers to the new group, confirm its instances are
//! serving on every balancer, and only then detach the old group. If
//! confirmation never arrives (timeout, cancellation, provider failure),
//! every attachment made by the run is rolled back and the old group is
//! left exactly as it was.
//!
//! # State machine
//!
//! ```text
//! Start ──attach──▶ Attached ──gate──▶ HealthConfirmed ──detach──▶ Detached ──▶ Done
//!                      │
//!                      └──timeout / cancel / provider──▶ HealthTimedOut ──▶ RolledBack ──▶ Failed
//! ```
//!
//! At every observable point each load balancer in the operation stays
//! attached to at least one of the two groups; the failure path never
//! touches the old group at all.

pub mod engine;
pub mod error;
pub mod operation;
pub mod reconcile;

pub use engine::CutoverEngine;
pub use error::{CutoverError, CutoverResult};
pub use operation::{
    CutoverOperation, CutoverOutcome, CutoverPhase, DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT,
};
pub use reconcile::ReconcileOutcome;
