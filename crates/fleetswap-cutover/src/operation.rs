//! Cutover operations and their lifecycle states.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleetswap_core::{GroupId, LoadBalancerId};

use crate::error::CutoverError;

/// Default budget for the health confirmation wait.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between health polls during confirmation.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// One requested cutover. Created by the caller, consumed by a single
/// engine invocation; nothing about it is persisted, and re-running the
/// same operation after a crash converges because attach/detach are
/// idempotent at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutoverOperation {
    /// The group currently serving, if any. `None` on a first-ever
    /// deployment: the detach phase is skipped entirely.
    pub current_group: Option<GroupId>,
    /// The group being promoted.
    pub new_group: GroupId,
    /// Load balancers to move.
    pub load_balancers: BTreeSet<LoadBalancerId>,
    /// Budget for the health confirmation wait.
    pub wait_timeout: Duration,
    /// Delay between health polls during confirmation.
    pub poll_interval: Duration,
}

impl CutoverOperation {
    pub fn new(
        current_group: Option<GroupId>,
        new_group: GroupId,
        load_balancers: BTreeSet<LoadBalancerId>,
    ) -> Self {
        Self {
            current_group,
            new_group,
            load_balancers,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Argument checks, run before any provider mutation.
    pub fn validate(&self) -> Result<(), CutoverError> {
        if let Some(current) = &self.current_group {
            if current == &self.new_group {
                return Err(CutoverError::InvalidInput(format!(
                    "current and new group are both {current}"
                )));
            }
        }
        if self.load_balancers.is_empty() {
            return Err(CutoverError::InvalidInput(
                "no load balancers to cut over".to_string(),
            ));
        }
        if self.wait_timeout.is_zero() {
            return Err(CutoverError::InvalidInput(
                "wait timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Terminal report of a successful cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoverOutcome {
    /// Now serving on every load balancer in the operation.
    pub promoted: GroupId,
    /// Detached from those balancers; `None` when there was no prior
    /// live group.
    pub retired: Option<GroupId>,
}

/// Where a cutover has got to. `Start` is the sole initial state;
/// `Done` and `Failed` are the terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CutoverPhase {
    Start,
    Attached,
    HealthConfirmed,
    Detached,
    Done,
    HealthTimedOut,
    RolledBack,
    Failed,
}

impl fmt::Display for CutoverPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CutoverPhase::Start => "start",
            CutoverPhase::Attached => "attached",
            CutoverPhase::HealthConfirmed => "health-confirmed",
            CutoverPhase::Detached => "detached",
            CutoverPhase::Done => "done",
            CutoverPhase::HealthTimedOut => "health-timed-out",
            CutoverPhase::RolledBack => "rolled-back",
            CutoverPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lbs(ids: &[&str]) -> BTreeSet<LoadBalancerId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn valid_operation_passes() {
        let op = CutoverOperation::new(
            Some("webapp-01".to_string()),
            "webapp-02".to_string(),
            lbs(&["prod"]),
        );
        assert!(op.validate().is_ok());
    }

    #[test]
    fn same_group_twice_is_rejected() {
        let op = CutoverOperation::new(
            Some("webapp-01".to_string()),
            "webapp-01".to_string(),
            lbs(&["prod"]),
        );
        assert!(matches!(
            op.validate(),
            Err(CutoverError::InvalidInput(_))
        ));
    }

    #[test]
    fn empty_balancer_set_is_rejected() {
        let op = CutoverOperation::new(None, "webapp-02".to_string(), lbs(&[]));
        assert!(matches!(
            op.validate(),
            Err(CutoverError::InvalidInput(_))
        ));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let op = CutoverOperation::new(None, "webapp-02".to_string(), lbs(&["prod"]))
            .with_wait_timeout(Duration::ZERO);
        assert!(matches!(
            op.validate(),
            Err(CutoverError::InvalidInput(_))
        ));
    }

    #[test]
    fn no_current_group_is_valid() {
        let op = CutoverOperation::new(None, "webapp-02".to_string(), lbs(&["prod"]));
        assert!(op.validate().is_ok());
    }

    #[test]
    fn phase_serializes_kebab_case() {
        let json = serde_json::to_string(&CutoverPhase::HealthConfirmed).unwrap();
        assert_eq!(json, "\"health-confirmed\"");
        assert_eq!(CutoverPhase::RolledBack.to_string(), "rolled-back");
    }
}
