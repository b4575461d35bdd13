//! Domain types shared across the fleetswap crates.
//!
//! Everything here mirrors provider-side state. Records are re-read on
//! every operation and never cached across invocations.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Name of an auto scaling group.
pub type GroupId = String;

/// Name (classic ELB) or ARN (target group) of a load balancer.
pub type LoadBalancerId = String;

/// Cloud instance identifier.
pub type InstanceId = String;

// ── Groups ─────────────────────────────────────────────────────────

/// A provider-side auto scaling group, as returned by `describe_group`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoScalingGroup {
    pub id: GroupId,
    pub desired_capacity: u32,
    pub min_size: u32,
    pub max_size: u32,
    /// Which health source the group trusts for instance replacement.
    pub health_check: HealthCheckKind,
    /// Load balancers currently attached to this group.
    pub load_balancers: BTreeSet<LoadBalancerId>,
    /// Current member instances.
    pub instances: Vec<InstanceId>,
}

impl AutoScalingGroup {
    /// Whether the group currently has no member instances.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Health check source configured on a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckKind {
    /// Instance status checks only.
    Ec2,
    /// Load balancer health checks drive instance replacement.
    Elb,
}

// ── Load balancers ─────────────────────────────────────────────────

/// A load balancer known to the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadBalancer {
    pub id: LoadBalancerId,
    pub kind: LoadBalancerKind,
}

/// The two attachment APIs a group can be bound through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancerKind {
    ClassicElb,
    TargetGroup,
}

// ── Instance health ────────────────────────────────────────────────

/// Registration state of one instance on one load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegistrationState {
    /// Registered but not yet passing the balancer's health checks.
    Registering,
    /// Registered and receiving traffic.
    InService,
    /// Registered but failing health checks or draining.
    OutOfService,
    /// Not registered, or the provider returned no state for it.
    Unknown,
}

/// One instance's registration health on one load balancer, as of a
/// single poll. Recomputed every poll, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceHealthRecord {
    pub instance_id: InstanceId,
    pub state: RegistrationState,
    /// Unix timestamp (seconds) when the provider was queried.
    pub checked_at: u64,
}

// ── Discovery view ─────────────────────────────────────────────────

/// The discovery-layer view of a group: identity, health source, tags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub id: GroupId,
    pub health_check: HealthCheckKind,
    pub tags: BTreeMap<String, String>,
}

impl GroupDescriptor {
    /// Whether this group's tags contain every key/value pair in `filter`.
    pub fn tags_match(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).is_some_and(|have| have == v))
    }
}
