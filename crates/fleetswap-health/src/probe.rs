//! Registration health probe.
//!
//! Thin read layer over [`LoadBalancerBinder`]: every call is wrapped in
//! the bounded transient retry, and lookup errors (unknown group) pass
//! straight through — a stale identifier is a configuration problem, not
//! something a retry fixes.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use fleetswap_core::{AutoScalingGroup, GroupId, InstanceId, LoadBalancerId, RegistrationState};
use fleetswap_provider::{retry_transient, LoadBalancerBinder, ProviderResult, RetryPolicy};

/// Reads registration health through a binder with bounded retry.
#[derive(Debug, Clone, Default)]
pub struct HealthProbe {
    retry: RetryPolicy,
}

impl HealthProbe {
    pub fn new() -> Self {
        Self {
            retry: RetryPolicy::default(),
        }
    }

    /// Use a custom retry policy for all provider reads.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch a group's current state.
    pub async fn describe_group<B: LoadBalancerBinder>(
        &self,
        binder: &B,
        group: &GroupId,
    ) -> ProviderResult<AutoScalingGroup> {
        retry_transient(&self.retry, "describe_group", || binder.describe_group(group)).await
    }

    /// Registration state of a group's instances on one load balancer.
    ///
    /// A group with no instances (or no registrations on this balancer)
    /// yields an empty map, not an error.
    pub async fn poll<B: LoadBalancerBinder>(
        &self,
        binder: &B,
        group: &GroupId,
        lb: &LoadBalancerId,
    ) -> ProviderResult<BTreeMap<InstanceId, RegistrationState>> {
        let records = retry_transient(&self.retry, "describe_instance_health", || {
            binder.describe_instance_health(group, lb)
        })
        .await?;

        debug!(%group, %lb, registered = records.len(), "polled instance health");

        Ok(records
            .into_iter()
            .map(|r| (r.instance_id, r.state))
            .collect())
    }

    /// [`poll`](Self::poll) across a set of load balancers, keyed by
    /// balancer id.
    pub async fn poll_all<B: LoadBalancerBinder>(
        &self,
        binder: &B,
        group: &GroupId,
        lbs: &BTreeSet<LoadBalancerId>,
    ) -> ProviderResult<BTreeMap<LoadBalancerId, BTreeMap<InstanceId, RegistrationState>>> {
        let mut by_lb = BTreeMap::new();
        for lb in lbs {
            let states = self.poll(binder, group, lb).await?;
            by_lb.insert(lb.clone(), states);
        }
        Ok(by_lb)
    }
}
