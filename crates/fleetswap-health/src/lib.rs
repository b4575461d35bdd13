//! fleetswap-health — instance registration health for cutover gating.
//!
//! The probe reads per-instance registration state from the provider,
//! retrying transient failures. The gate is a pure predicate over those
//! reads: a group is serving only when it has at least one instance and
//! every instance is `InService` on every load balancer under
//! consideration. The wait loops drive the probe against a deadline with
//! caller-initiated cancellation.
//!
//! # Architecture
//!
//! ```text
//! await_serving / await_deregistered
//!   ├── HealthProbe (bounded retry around binder reads)
//!   ├── gate::evaluate (pure serving predicate)
//!   └── tokio::select! { poll timer, deadline, cancel watch }
//! ```

pub mod gate;
pub mod probe;
pub mod wait;

pub use gate::{GateReport, UnhealthyInstance};
pub use probe::HealthProbe;
pub use wait::{await_deregistered, await_serving, WaitConfig, WaitError};
