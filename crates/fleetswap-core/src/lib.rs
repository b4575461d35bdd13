//! fleetswap-core — shared domain types for the fleetswap crates.
//!
//! These types model the externally owned cloud resources the cutover
//! machinery reads and mutates: auto scaling groups, load balancers, and
//! per-instance registration health. The cloud provider is the source of
//! truth for all of them; fleetswap never persists any of this state.

pub mod types;

pub use types::*;
