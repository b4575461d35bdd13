//! In-memory provider.
//!
//! Backs the test suites and the `fleetswap simulate` rehearsal mode.
//! Attachment state lives in a mutex-guarded table; newly attached load
//! balancers report instances as `Registering` until a configurable
//! number of health polls has elapsed, mimicking provider-side health
//! check warmup. Fault injection covers failed attachments, stalled
//! health checks, and API throttling.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::debug;

use fleetswap_core::{
    AutoScalingGroup, GroupDescriptor, GroupId, InstanceHealthRecord, InstanceId, LoadBalancerId,
    RegistrationState,
};

use crate::binder::{GroupCatalog, LoadBalancerBinder};
use crate::error::{ProviderError, ProviderResult};

/// A state change applied to the provider. Read-only calls are not
/// recorded, and neither are attach/detach calls that were already
/// satisfied — the log captures effective side effects only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Attached {
        group: GroupId,
        lb: LoadBalancerId,
    },
    Detached {
        group: GroupId,
        lb: LoadBalancerId,
    },
    TagsSet {
        group: GroupId,
    },
}

#[derive(Default)]
struct Inner {
    groups: BTreeMap<GroupId, AutoScalingGroup>,
    tags: BTreeMap<GroupId, BTreeMap<String, String>>,
    /// Registration state per (group, load balancer, instance).
    registrations: BTreeMap<(GroupId, LoadBalancerId), BTreeMap<InstanceId, RegistrationState>>,
    /// Health polls observed per (group, load balancer).
    poll_counts: BTreeMap<(GroupId, LoadBalancerId), u32>,
    /// Polls before a `Registering` instance flips to `InService`.
    warmup_polls: u32,
    /// Polls a detached balancer keeps reporting draining registrations.
    drain_polls: u32,
    /// Remaining drain polls per detached (group, load balancer).
    draining: BTreeMap<(GroupId, LoadBalancerId), u32>,
    /// Load balancers whose registrations never leave `Registering`.
    stalled_lbs: BTreeSet<LoadBalancerId>,
    /// Load balancers whose attach calls fail outright.
    attach_faults: BTreeSet<LoadBalancerId>,
    /// Remaining calls (of any kind) to fail with throttling.
    throttled_calls: u32,
    changes: Vec<Mutation>,
}

/// In-memory [`LoadBalancerBinder`] and [`GroupCatalog`].
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryProvider {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                warmup_polls: 1,
                ..Inner::default()
            })),
        }
    }

    /// Add a group. Load balancers already listed on the group are
    /// treated as established attachments: their instances start
    /// `InService`.
    pub fn with_group(self, group: AutoScalingGroup) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            for lb in &group.load_balancers {
                let states = group
                    .instances
                    .iter()
                    .map(|i| (i.clone(), RegistrationState::InService))
                    .collect();
                inner
                    .registrations
                    .insert((group.id.clone(), lb.clone()), states);
            }
            inner.groups.insert(group.id.clone(), group);
        }
        self
    }

    /// Set tags on a group added earlier.
    pub fn with_tags(self, group: &str, tags: &[(&str, &str)]) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            let entry = inner.tags.entry(group.to_string()).or_default();
            for (k, v) in tags {
                entry.insert((*k).to_string(), (*v).to_string());
            }
        }
        self
    }

    /// Number of health polls before new registrations report
    /// `InService`. Zero means instances are healthy on the first poll.
    pub fn with_warmup_polls(self, polls: u32) -> Self {
        self.inner.lock().unwrap().warmup_polls = polls;
        self
    }

    /// Number of health polls a detached balancer keeps listing the old
    /// registrations as `OutOfService` before they disappear. Zero (the
    /// default) drops registrations the moment the balancer is detached.
    pub fn with_drain_polls(self, polls: u32) -> Self {
        self.inner.lock().unwrap().drain_polls = polls;
        self
    }

    /// Registrations on this load balancer never become `InService`.
    pub fn with_stalled_load_balancer(self, lb: &str) -> Self {
        self.inner.lock().unwrap().stalled_lbs.insert(lb.to_string());
        self
    }

    /// Attach calls naming this load balancer fail.
    pub fn with_attach_fault(self, lb: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .attach_faults
            .insert(lb.to_string());
        self
    }

    /// Fail the next `calls` provider calls with throttling errors.
    pub fn with_throttled_calls(self, calls: u32) -> Self {
        self.inner.lock().unwrap().throttled_calls = calls;
        self
    }

    /// Effective state changes applied so far, in order.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().unwrap().changes.clone()
    }

    /// Drop the recorded state changes.
    pub fn clear_mutations(&self) {
        self.inner.lock().unwrap().changes.clear();
    }

    /// Groups a load balancer is currently attached to.
    pub fn attached_groups(&self, lb: &str) -> Vec<GroupId> {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .values()
            .filter(|g| g.load_balancers.contains(lb))
            .map(|g| g.id.clone())
            .collect()
    }

    fn take_throttle(inner: &mut Inner) -> ProviderResult<()> {
        if inner.throttled_calls > 0 {
            inner.throttled_calls -= 1;
            return Err(ProviderError::Throttled("rate exceeded".to_string()));
        }
        Ok(())
    }

    fn group<'a>(inner: &'a Inner, group: &GroupId) -> ProviderResult<&'a AutoScalingGroup> {
        inner
            .groups
            .get(group)
            .ok_or_else(|| ProviderError::GroupNotFound(group.clone()))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalancerBinder for MemoryProvider {
    async fn describe_group(&self, group: &GroupId) -> ProviderResult<AutoScalingGroup> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;
        Self::group(&inner, group).cloned()
    }

    async fn list_attached(&self, group: &GroupId) -> ProviderResult<BTreeSet<LoadBalancerId>> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;
        Ok(Self::group(&inner, group)?.load_balancers.clone())
    }

    async fn attach(&self, group: &GroupId, lb: &LoadBalancerId) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;

        if inner.attach_faults.contains(lb) {
            return Err(ProviderError::Api(format!("attach {lb} refused")));
        }

        let asg = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| ProviderError::GroupNotFound(group.clone()))?;
        if asg.load_balancers.contains(lb) {
            debug!(%group, %lb, "attach no-op, already attached");
            return Ok(());
        }
        asg.load_balancers.insert(lb.clone());
        let instances = asg.instances.clone();

        let key = (group.clone(), lb.clone());
        let states = instances
            .into_iter()
            .map(|i| (i, RegistrationState::Registering))
            .collect();
        inner.registrations.insert(key.clone(), states);
        inner.poll_counts.insert(key, 0);
        inner.changes.push(Mutation::Attached {
            group: group.clone(),
            lb: lb.clone(),
        });
        Ok(())
    }

    async fn detach(&self, group: &GroupId, lb: &LoadBalancerId) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;

        let asg = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| ProviderError::GroupNotFound(group.clone()))?;
        if !asg.load_balancers.remove(lb) {
            debug!(%group, %lb, "detach no-op, not attached");
            return Ok(());
        }

        let key = (group.clone(), lb.clone());
        if inner.drain_polls > 0 {
            let drain_polls = inner.drain_polls;
            if let Some(states) = inner.registrations.get_mut(&key) {
                for state in states.values_mut() {
                    *state = RegistrationState::OutOfService;
                }
                inner.draining.insert(key.clone(), drain_polls);
            }
        } else {
            inner.registrations.remove(&key);
        }
        inner.poll_counts.remove(&key);
        inner.changes.push(Mutation::Detached {
            group: group.clone(),
            lb: lb.clone(),
        });
        Ok(())
    }

    async fn describe_instance_health(
        &self,
        group: &GroupId,
        lb: &LoadBalancerId,
    ) -> ProviderResult<Vec<InstanceHealthRecord>> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;
        Self::group(&inner, group)?;

        let key = (group.clone(), lb.clone());

        // Detached balancers report draining registrations for a few
        // polls, then nothing.
        if let Some(remaining) = inner.draining.get(&key).copied() {
            if remaining == 0 {
                inner.draining.remove(&key);
                inner.registrations.remove(&key);
            } else {
                inner.draining.insert(key.clone(), remaining - 1);
                let now = epoch_secs();
                let records = inner
                    .registrations
                    .get(&key)
                    .map(|states| {
                        states
                            .iter()
                            .map(|(instance, state)| InstanceHealthRecord {
                                instance_id: instance.clone(),
                                state: *state,
                                checked_at: now,
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                return Ok(records);
            }
        }

        let polls = {
            let count = inner.poll_counts.entry(key.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let warmed = polls > inner.warmup_polls && !inner.stalled_lbs.contains(lb);
        let now = epoch_secs();

        let Some(states) = inner.registrations.get_mut(&key) else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(states.len());
        for (instance, state) in states.iter_mut() {
            if warmed && *state == RegistrationState::Registering {
                *state = RegistrationState::InService;
            }
            records.push(InstanceHealthRecord {
                instance_id: instance.clone(),
                state: *state,
                checked_at: now,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl GroupCatalog for MemoryProvider {
    async fn list_groups(&self) -> ProviderResult<Vec<GroupDescriptor>> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;
        Ok(inner
            .groups
            .values()
            .map(|g| GroupDescriptor {
                id: g.id.clone(),
                health_check: g.health_check,
                tags: inner.tags.get(&g.id).cloned().unwrap_or_default(),
            })
            .collect())
    }

    async fn set_tags(&self, group: &GroupId, tags: &[(String, String)]) -> ProviderResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::take_throttle(&mut inner)?;
        Self::group(&inner, group)?;

        let entry = inner.tags.entry(group.clone()).or_default();
        for (k, v) in tags {
            entry.insert(k.clone(), v.clone());
        }
        inner.changes.push(Mutation::TagsSet {
            group: group.clone(),
        });
        Ok(())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
