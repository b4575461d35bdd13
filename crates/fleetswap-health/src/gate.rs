//! The serving gate.
//!
//! Pure predicate over one round of health polls: a group is serving
//! only when it has at least one instance and every instance is
//! `InService` on every load balancer. A group with zero instances is
//! never serving.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use fleetswap_core::{InstanceId, LoadBalancerId, RegistrationState};

/// One instance that kept a gate from passing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnhealthyInstance {
    pub instance_id: InstanceId,
    pub load_balancer_id: LoadBalancerId,
    pub state: RegistrationState,
}

impl fmt::Display for UnhealthyInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} ({:?})",
            self.instance_id, self.load_balancer_id, self.state
        )
    }
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    /// All instances `InService` on all load balancers, and at least one
    /// instance exists.
    pub serving: bool,
    /// Every (instance, balancer) pair that is not `InService`.
    pub unhealthy: Vec<UnhealthyInstance>,
}

/// Evaluate the serving gate for `instances` against one poll round.
///
/// `health_by_lb` maps each load balancer to the registration states the
/// provider reported for it. An instance missing from a balancer's map
/// is counted unhealthy with state `Unknown` — unregistered is not the
/// same as passing.
pub fn evaluate(
    instances: &[InstanceId],
    health_by_lb: &BTreeMap<LoadBalancerId, BTreeMap<InstanceId, RegistrationState>>,
) -> GateReport {
    let mut unhealthy = Vec::new();

    for (lb, states) in health_by_lb {
        for instance in instances {
            let state = states
                .get(instance)
                .copied()
                .unwrap_or(RegistrationState::Unknown);
            if state != RegistrationState::InService {
                unhealthy.push(UnhealthyInstance {
                    instance_id: instance.clone(),
                    load_balancer_id: lb.clone(),
                    state,
                });
            }
        }
    }

    GateReport {
        serving: !instances.is_empty() && unhealthy.is_empty(),
        unhealthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(
        entries: Vec<(&str, Vec<(&str, RegistrationState)>)>,
    ) -> BTreeMap<LoadBalancerId, BTreeMap<InstanceId, RegistrationState>> {
        entries
            .into_iter()
            .map(|(lb, states)| {
                (
                    lb.to_string(),
                    states
                        .into_iter()
                        .map(|(i, s)| (i.to_string(), s))
                        .collect(),
                )
            })
            .collect()
    }

    fn instances(ids: &[&str]) -> Vec<InstanceId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn all_in_service_everywhere_passes() {
        let report = evaluate(
            &instances(&["i-01", "i-02"]),
            &health(vec![
                (
                    "prod-a",
                    vec![
                        ("i-01", RegistrationState::InService),
                        ("i-02", RegistrationState::InService),
                    ],
                ),
                (
                    "prod-b",
                    vec![
                        ("i-01", RegistrationState::InService),
                        ("i-02", RegistrationState::InService),
                    ],
                ),
            ]),
        );
        assert!(report.serving);
        assert!(report.unhealthy.is_empty());
    }

    #[test]
    fn zero_instances_never_passes() {
        let report = evaluate(&instances(&[]), &health(vec![("prod", vec![])]));
        assert!(!report.serving);
        assert!(report.unhealthy.is_empty());
    }

    #[test]
    fn one_lagging_balancer_blocks_the_gate() {
        let report = evaluate(
            &instances(&["i-01"]),
            &health(vec![
                ("prod-a", vec![("i-01", RegistrationState::InService)]),
                ("prod-b", vec![("i-01", RegistrationState::Registering)]),
            ]),
        );
        assert!(!report.serving);
        assert_eq!(report.unhealthy.len(), 1);
        assert_eq!(report.unhealthy[0].load_balancer_id, "prod-b");
        assert_eq!(report.unhealthy[0].state, RegistrationState::Registering);
    }

    #[test]
    fn unregistered_instance_counts_as_unknown() {
        let report = evaluate(
            &instances(&["i-01", "i-02"]),
            &health(vec![(
                "prod",
                vec![("i-01", RegistrationState::InService)],
            )]),
        );
        assert!(!report.serving);
        assert_eq!(report.unhealthy[0].instance_id, "i-02");
        assert_eq!(report.unhealthy[0].state, RegistrationState::Unknown);
    }

    #[test]
    fn out_of_service_is_reported_per_pair() {
        let report = evaluate(
            &instances(&["i-01", "i-02"]),
            &health(vec![
                (
                    "prod-a",
                    vec![
                        ("i-01", RegistrationState::OutOfService),
                        ("i-02", RegistrationState::InService),
                    ],
                ),
                (
                    "prod-b",
                    vec![
                        ("i-01", RegistrationState::OutOfService),
                        ("i-02", RegistrationState::OutOfService),
                    ],
                ),
            ]),
        );
        assert!(!report.serving);
        assert_eq!(report.unhealthy.len(), 3);
    }
}
