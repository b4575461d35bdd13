//! fleetswap-discovery — which group is which.
//!
//! Deployment tooling marks groups with a `fleet-state` tag: `pre` is
//! the freshly provisioned fleet awaiting promotion, `live` is serving
//! production, `post` is retired and awaiting teardown. This crate
//! resolves those roles from the provider's tag inventory and rewrites
//! them after a successful cutover.
//!
//! The cutover engine never sees a tag: discovery happens before the
//! engine runs and promotion after, both through the [`GroupCatalog`]
//! capability, so attachment correctness stays free of tagging
//! concerns.
//!
//! [`GroupCatalog`]: fleetswap_provider::GroupCatalog

pub mod error;
pub mod fleet;

pub use error::{DiscoveryError, DiscoveryResult};
pub use fleet::{find_groups_by_tags, promote, resolve_fleet, Fleet, FleetRole, STATE_TAG};
