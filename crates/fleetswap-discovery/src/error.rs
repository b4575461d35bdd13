//! Discovery error types.

use fleetswap_core::GroupId;
use fleetswap_provider::ProviderError;
use thiserror::Error;

use crate::fleet::FleetRole;

/// Result type alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Errors resolving fleet roles from tags.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no group tagged {role}")]
    MissingRole { role: FleetRole },

    #[error("multiple groups tagged {role}: {ids:?}")]
    AmbiguousRole { role: FleetRole, ids: Vec<GroupId> },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}
