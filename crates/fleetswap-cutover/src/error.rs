//! Cutover error types.

use std::time::Duration;

use thiserror::Error;

use fleetswap_core::LoadBalancerId;
use fleetswap_health::UnhealthyInstance;
use fleetswap_provider::ProviderError;

use crate::operation::CutoverPhase;

/// Result type alias for cutover operations.
pub type CutoverResult<T> = Result<T, CutoverError>;

/// Errors that can end a cutover.
#[derive(Debug, Error)]
pub enum CutoverError {
    /// Rejected before any mutation was issued.
    #[error("invalid cutover request: {0}")]
    InvalidInput(String),

    /// An attach call failed; every attachment this run made has been
    /// rolled back.
    #[error("failed to attach {lb}: {source}")]
    AttachFailed {
        lb: LoadBalancerId,
        #[source]
        source: ProviderError,
    },

    /// The new group never confirmed healthy within the wait budget;
    /// rolled back.
    #[error("health checks not passed after {elapsed:?} ({} unhealthy)", unhealthy.len())]
    HealthCheckTimeout {
        elapsed: Duration,
        unhealthy: Vec<UnhealthyInstance>,
    },

    /// The caller aborted the wait; rolled back exactly like a timeout.
    #[error("cutover cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },

    /// A provider call failed outside the attach phase. `phase` is the
    /// state the operation had reached: at `HealthConfirmed` the new
    /// group is already serving and the failure is a partial success
    /// (stale attachments on the old group need follow-up cleanup, not
    /// a rollback).
    #[error("provider error at {phase}: {source}")]
    Provider {
        phase: CutoverPhase,
        #[source]
        source: ProviderError,
    },
}
