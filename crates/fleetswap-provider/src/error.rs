//! Provider error types.

use fleetswap_core::{GroupId, LoadBalancerId};
use thiserror::Error;

/// Result type alias for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors surfaced by a load balancer binder.
///
/// Only [`Throttled`](ProviderError::Throttled) and
/// [`Connection`](ProviderError::Connection) are retried; everything else
/// indicates bad input or a permission problem and propagates immediately.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("auto scaling group not found: {0}")]
    GroupNotFound(GroupId),

    #[error("load balancer not found: {0}")]
    LoadBalancerNotFound(LoadBalancerId),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("provider api error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Whether a retry of the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_) | ProviderError::Connection(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_and_connection_are_transient() {
        assert!(ProviderError::Throttled("rate exceeded".into()).is_transient());
        assert!(ProviderError::Connection("reset by peer".into()).is_transient());
    }

    #[test]
    fn lookup_and_permission_errors_are_permanent() {
        assert!(!ProviderError::GroupNotFound("webapp-09".into()).is_transient());
        assert!(!ProviderError::LoadBalancerNotFound("webapp-prod".into()).is_transient());
        assert!(!ProviderError::PermissionDenied("autoscaling:AttachLoadBalancers".into())
            .is_transient());
        assert!(!ProviderError::Api("validation error".into()).is_transient());
    }
}
