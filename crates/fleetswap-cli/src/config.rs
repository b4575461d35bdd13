//! fleet.toml parser.
//!
//! A fleet description declares the groups, their roles and instances,
//! the load balancers, and the simulated provider's behavior (warmup,
//! drain, fault injection). `simulate` runs the whole cutover workflow
//! against it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use fleetswap_core::{
    AutoScalingGroup, HealthCheckKind, LoadBalancer, LoadBalancerKind,
};
use fleetswap_discovery::FleetRole;
use fleetswap_provider::MemoryProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetFile {
    pub fleet: FleetSection,
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub cutover: CutoverSection,
    #[serde(default)]
    pub groups: Vec<GroupSection>,
    #[serde(default)]
    pub load_balancers: Vec<BalancerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSection {
    /// Service name; becomes the `service` tag on every group.
    pub service: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationSection {
    /// Health polls before newly attached instances report in service.
    pub warmup_polls: Option<u32>,
    /// Health polls a detached balancer keeps listing old instances.
    pub drain_polls: Option<u32>,
    /// Balancers whose instances never become healthy.
    #[serde(default)]
    pub stalled_load_balancers: Vec<String>,
    /// Balancers whose attach calls fail.
    #[serde(default)]
    pub attach_faults: Vec<String>,
    /// Throttle the first N provider calls.
    pub throttled_calls: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CutoverSection {
    pub wait_timeout_secs: Option<u64>,
    pub poll_interval_secs: Option<u64>,
    /// Balancers to move. Defaults to whatever is attached to the live
    /// group; required when there is no live group yet.
    pub load_balancers: Option<Vec<String>>,
    /// Attached to the retired group after a successful cutover so it
    /// can be promoted back later.
    #[serde(default)]
    pub standby_load_balancers: Vec<String>,
    /// Wait for the retired group's instances to drain from the moved
    /// balancers.
    #[serde(default)]
    pub await_deregistration: bool,
    /// Health-gate the retired group on its standby balancers.
    #[serde(default)]
    pub verify_standby: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSection {
    pub id: String,
    /// Place in the rotation; untagged groups are ignored by discovery.
    pub role: Option<FleetRole>,
    #[serde(default = "default_health_check")]
    pub health_check: HealthCheckKind,
    #[serde(default)]
    pub instances: Vec<String>,
    /// Balancers attached before the run starts.
    #[serde(default)]
    pub load_balancers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerSection {
    pub id: String,
    pub kind: LoadBalancerKind,
}

fn default_health_check() -> HealthCheckKind {
    HealthCheckKind::Elb
}

impl FleetFile {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading fleet description {}", path.display()))?;
        let file: FleetFile = toml::from_str(&content)
            .with_context(|| format!("parsing fleet description {}", path.display()))?;
        file.validate()?;
        Ok(file)
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let file: FleetFile = toml::from_str(content).context("parsing fleet description")?;
        file.validate()?;
        Ok(file)
    }

    /// Cross-references: every balancer a group or the cutover section
    /// names must be declared in `[[load_balancers]]`.
    fn validate(&self) -> anyhow::Result<()> {
        if self.groups.is_empty() {
            bail!("fleet description declares no groups");
        }

        let declared: Vec<&str> = self.load_balancers.iter().map(|b| b.id.as_str()).collect();
        let check = |lb: &str, owner: &str| -> anyhow::Result<()> {
            if !declared.contains(&lb) {
                bail!("{owner} references undeclared load balancer {lb}");
            }
            Ok(())
        };

        for group in &self.groups {
            for lb in &group.load_balancers {
                check(lb, &format!("group {}", group.id))?;
            }
        }
        for lb in self.cutover.load_balancers.iter().flatten() {
            check(lb, "cutover")?;
        }
        for lb in &self.cutover.standby_load_balancers {
            check(lb, "standby")?;
        }
        Ok(())
    }

    /// The tag filter selecting this service's groups.
    pub fn service_filter(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("service".to_string(), self.fleet.service.clone())])
    }

    /// Declared load balancers with their kinds.
    pub fn balancers(&self) -> Vec<LoadBalancer> {
        self.load_balancers
            .iter()
            .map(|b| LoadBalancer {
                id: b.id.clone(),
                kind: b.kind,
            })
            .collect()
    }

    /// Materialize the described fleet as an in-memory provider.
    pub fn build_provider(&self) -> MemoryProvider {
        let mut provider = MemoryProvider::new();

        if let Some(polls) = self.simulation.warmup_polls {
            provider = provider.with_warmup_polls(polls);
        }
        if let Some(polls) = self.simulation.drain_polls {
            provider = provider.with_drain_polls(polls);
        }
        if let Some(calls) = self.simulation.throttled_calls {
            provider = provider.with_throttled_calls(calls);
        }
        for lb in &self.simulation.stalled_load_balancers {
            provider = provider.with_stalled_load_balancer(lb);
        }
        for lb in &self.simulation.attach_faults {
            provider = provider.with_attach_fault(lb);
        }

        for group in &self.groups {
            provider = provider.with_group(AutoScalingGroup {
                id: group.id.clone(),
                desired_capacity: group.instances.len() as u32,
                min_size: 0,
                max_size: (group.instances.len() as u32).max(1) * 2,
                health_check: group.health_check,
                load_balancers: group.load_balancers.iter().cloned().collect(),
                instances: group.instances.clone(),
            });
            provider =
                provider.with_tags(&group.id, &[("service", self.fleet.service.as_str())]);
            if let Some(role) = group.role {
                provider =
                    provider.with_tags(&group.id, &[("fleet-state", role.tag_value())]);
            }
        }

        provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
        [fleet]
        service = "webapp"

        [simulation]
        warmup_polls = 2

        [cutover]
        wait_timeout_secs = 120
        standby_load_balancers = ["webapp-post"]

        [[groups]]
        id = "webapp-17"
        role = "live"
        instances = ["i-a1", "i-a2"]
        load_balancers = ["webapp-prod"]

        [[groups]]
        id = "webapp-18"
        role = "pre"
        instances = ["i-b1", "i-b2"]

        [[load_balancers]]
        id = "webapp-prod"
        kind = "classic-elb"

        [[load_balancers]]
        id = "webapp-post"
        kind = "target-group"
    "#;

    #[test]
    fn parses_a_full_description() {
        let file = FleetFile::from_toml(EXAMPLE).unwrap();

        assert_eq!(file.fleet.service, "webapp");
        assert_eq!(file.groups.len(), 2);
        assert_eq!(file.groups[0].role, Some(FleetRole::Live));
        assert_eq!(file.cutover.wait_timeout_secs, Some(120));
        assert_eq!(file.balancers()[1].kind, LoadBalancerKind::TargetGroup);
        assert!(!file.cutover.await_deregistration);
    }

    #[test]
    fn undeclared_balancer_is_rejected() {
        let bad = r#"
            [fleet]
            service = "webapp"

            [[groups]]
            id = "webapp-17"
            load_balancers = ["missing"]
        "#;
        let err = FleetFile::from_toml(bad).unwrap_err();
        assert!(err.to_string().contains("undeclared load balancer"));
    }

    #[test]
    fn no_groups_is_rejected() {
        let bad = r#"
            [fleet]
            service = "webapp"
        "#;
        assert!(FleetFile::from_toml(bad).is_err());
    }

    #[tokio::test]
    async fn build_provider_applies_groups_and_tags() {
        use fleetswap_provider::GroupCatalog;
        use fleetswap_provider::LoadBalancerBinder;

        let file = FleetFile::from_toml(EXAMPLE).unwrap();
        let provider = file.build_provider();

        let group = provider
            .describe_group(&"webapp-17".to_string())
            .await
            .unwrap();
        assert_eq!(group.instances.len(), 2);
        assert!(group.load_balancers.contains("webapp-prod"));

        let descriptors = provider.list_groups().await.unwrap();
        let live = descriptors.iter().find(|d| d.id == "webapp-17").unwrap();
        assert_eq!(live.tags["fleet-state"], "live");
        assert_eq!(live.tags["service"], "webapp");
    }
}
