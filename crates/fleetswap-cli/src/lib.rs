//! fleetswap-cli — fleet descriptions and the rehearsal workflow.
//!
//! The binary front-end lives in `main.rs`; this library holds the
//! parts worth testing directly: the TOML fleet description and the
//! workflow that sequences discovery → cutover → promotion → standby
//! housekeeping against the in-memory provider.

pub mod config;
pub mod workflow;

pub use config::FleetFile;
pub use workflow::{run_simulation, SimulationOptions, SimulationReport};
