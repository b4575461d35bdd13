//! Provider capability traits.
//!
//! [`LoadBalancerBinder`] is the entire surface the cutover engine and
//! health probe need: describe a group, list/alter its load balancer
//! attachments, and read per-instance registration health. Implementations
//! exist per attachment API (classic ELB vs target group); the caller picks
//! one by [`LoadBalancerKind`](fleetswap_core::LoadBalancerKind) and the
//! algorithms above never branch on it.
//!
//! [`GroupCatalog`] carries the tag reads/writes the discovery layer uses.
//! It is a separate trait so attachment-only components cannot touch tags.

use std::collections::BTreeSet;

use async_trait::async_trait;

use fleetswap_core::{
    AutoScalingGroup, GroupDescriptor, GroupId, InstanceHealthRecord, LoadBalancerId,
};

use crate::error::ProviderResult;

/// Attachment and health operations against one kind of load balancer.
///
/// `attach` and `detach` must be idempotent: attaching an already attached
/// load balancer or detaching an absent one is a no-op, not an error. The
/// cutover engine relies on this to make re-runs after a crash converge
/// without duplicate side effects.
#[async_trait]
pub trait LoadBalancerBinder: Send + Sync {
    /// Fetch the current state of a group.
    async fn describe_group(&self, group: &GroupId) -> ProviderResult<AutoScalingGroup>;

    /// List the load balancers currently attached to a group.
    async fn list_attached(&self, group: &GroupId) -> ProviderResult<BTreeSet<LoadBalancerId>>;

    /// Attach a load balancer to a group. No-op when already attached.
    async fn attach(&self, group: &GroupId, lb: &LoadBalancerId) -> ProviderResult<()>;

    /// Detach a load balancer from a group. No-op when not attached.
    async fn detach(&self, group: &GroupId, lb: &LoadBalancerId) -> ProviderResult<()>;

    /// Read the registration health of a group's instances on one load
    /// balancer. Instances not registered with the balancer are absent
    /// from the result; a group with no instances yields an empty list.
    async fn describe_instance_health(
        &self,
        group: &GroupId,
        lb: &LoadBalancerId,
    ) -> ProviderResult<Vec<InstanceHealthRecord>>;
}

/// Tag reads and writes over the provider's group inventory.
#[async_trait]
pub trait GroupCatalog: Send + Sync {
    /// List all known groups with their tags.
    async fn list_groups(&self) -> ProviderResult<Vec<GroupDescriptor>>;

    /// Overwrite the named tags on a group. Untouched keys are preserved.
    async fn set_tags(
        &self,
        group: &GroupId,
        tags: &[(String, String)],
    ) -> ProviderResult<()>;
}
