//! Deadline-bounded health waits.
//!
//! Both waits are explicit poll loops: evaluate, then sleep until the
//! next round, racing the sleep against caller cancellation. The
//! deadline is checked after every evaluation so a zero-margin timeout
//! still gets one look at the world before giving up.

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info};

use fleetswap_core::{GroupId, InstanceId, LoadBalancerId};
use fleetswap_provider::{LoadBalancerBinder, ProviderError};

use crate::gate::{self, UnhealthyInstance};
use crate::probe::HealthProbe;

/// Pacing for a deadline-bounded wait.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Overall budget for the wait.
    pub timeout: Duration,
    /// Delay between poll rounds.
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Why a wait ended without the condition holding.
#[derive(Debug, Error)]
pub enum WaitError {
    #[error("condition not met after {elapsed:?} ({} outstanding)", unhealthy.len())]
    TimedOut {
        elapsed: Duration,
        unhealthy: Vec<UnhealthyInstance>,
    },

    #[error("wait cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Wait until every instance of `group` is `InService` on every load
/// balancer in `lbs`.
///
/// The group's instance list is re-read every round, so instances that
/// join or leave mid-wait are gated too. A group with no instances is
/// not serving and keeps the wait looping until the deadline.
pub async fn await_serving<B: LoadBalancerBinder>(
    probe: &HealthProbe,
    binder: &B,
    group: &GroupId,
    lbs: &BTreeSet<LoadBalancerId>,
    config: &WaitConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), WaitError> {
    let start = Instant::now();

    loop {
        let state = probe.describe_group(binder, group).await?;
        let health = probe.poll_all(binder, group, lbs).await?;
        let report = gate::evaluate(&state.instances, &health);

        if report.serving {
            info!(
                %group,
                instances = state.instances.len(),
                balancers = lbs.len(),
                elapsed_secs = start.elapsed().as_secs(),
                "group serving on all load balancers"
            );
            return Ok(());
        }

        debug!(
            %group,
            outstanding = report.unhealthy.len(),
            "serving gate not passed yet"
        );

        pause_or_bail(start, config, cancel, report.unhealthy).await?;
    }
}

/// Wait until none of `instances` appear in the health listings of any
/// load balancer in `lbs` for `group` — i.e. the balancers have finished
/// draining the old fleet.
pub async fn await_deregistered<B: LoadBalancerBinder>(
    probe: &HealthProbe,
    binder: &B,
    group: &GroupId,
    instances: &[InstanceId],
    lbs: &BTreeSet<LoadBalancerId>,
    config: &WaitConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<(), WaitError> {
    let start = Instant::now();

    loop {
        let mut lingering = Vec::new();
        for lb in lbs {
            let states = probe.poll(binder, group, lb).await?;
            for instance in instances {
                if let Some(state) = states.get(instance) {
                    lingering.push(UnhealthyInstance {
                        instance_id: instance.clone(),
                        load_balancer_id: lb.clone(),
                        state: *state,
                    });
                }
            }
        }

        if lingering.is_empty() {
            info!(
                %group,
                balancers = lbs.len(),
                elapsed_secs = start.elapsed().as_secs(),
                "old instances deregistered from all load balancers"
            );
            return Ok(());
        }

        debug!(%group, lingering = lingering.len(), "instances still draining");

        pause_or_bail(start, config, cancel, lingering).await?;
    }
}

/// Shared tail of a poll round: time out, sleep, or observe cancellation.
async fn pause_or_bail(
    start: Instant,
    config: &WaitConfig,
    cancel: &mut watch::Receiver<bool>,
    unhealthy: Vec<UnhealthyInstance>,
) -> Result<(), WaitError> {
    let elapsed = start.elapsed();
    if elapsed >= config.timeout {
        return Err(WaitError::TimedOut { elapsed, unhealthy });
    }

    // Never sleep past the deadline.
    let delay = config.poll_interval.min(config.timeout - elapsed);

    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        changed = cancel.changed() => {
            match changed {
                Ok(()) if *cancel.borrow_and_update() => Err(WaitError::Cancelled {
                    elapsed: start.elapsed(),
                }),
                // Spurious update or a dropped sender: cancellation is no
                // longer possible, finish the pause and keep polling.
                _ => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetswap_core::{AutoScalingGroup, HealthCheckKind};
    use fleetswap_provider::MemoryProvider;

    fn group(id: &str, lbs: &[&str], instances: &[&str]) -> AutoScalingGroup {
        AutoScalingGroup {
            id: id.to_string(),
            desired_capacity: instances.len() as u32,
            min_size: 0,
            max_size: 4,
            health_check: HealthCheckKind::Elb,
            load_balancers: lbs.iter().map(|s| s.to_string()).collect(),
            instances: instances.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn lbs(ids: &[&str]) -> BTreeSet<LoadBalancerId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn wait_config() -> WaitConfig {
        WaitConfig {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
        }
    }

    fn no_cancel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    #[tokio::test(start_paused = true)]
    async fn serving_wait_passes_after_warmup() {
        let provider = MemoryProvider::new()
            .with_group(group("webapp-02", &[], &["i-01"]))
            .with_warmup_polls(2);
        let g = "webapp-02".to_string();
        let target = lbs(&["prod"]);

        provider.attach(&g, &"prod".to_string()).await.unwrap();

        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();
        await_serving(&probe, &provider, &g, &target, &wait_config(), &mut rx)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn serving_wait_times_out_on_stalled_balancer() {
        let provider = MemoryProvider::new()
            .with_group(group("webapp-02", &[], &["i-01"]))
            .with_stalled_load_balancer("prod");
        let g = "webapp-02".to_string();
        let target = lbs(&["prod"]);

        provider.attach(&g, &"prod".to_string()).await.unwrap();

        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();
        let err = await_serving(&probe, &provider, &g, &target, &wait_config(), &mut rx)
            .await
            .unwrap_err();

        match err {
            WaitError::TimedOut { elapsed, unhealthy } => {
                assert!(elapsed >= Duration::from_secs(60));
                assert_eq!(unhealthy.len(), 1);
                assert_eq!(unhealthy[0].instance_id, "i-01");
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn serving_wait_observes_cancellation() {
        let provider = MemoryProvider::new()
            .with_group(group("webapp-02", &[], &["i-01"]))
            .with_stalled_load_balancer("prod");
        let g = "webapp-02".to_string();
        let target = lbs(&["prod"]);

        provider.attach(&g, &"prod".to_string()).await.unwrap();

        let (tx, mut rx) = no_cancel();

        let wait = tokio::spawn({
            let provider = provider.clone();
            let g = g.clone();
            async move {
                await_serving(
                    &HealthProbe::new(),
                    &provider,
                    &g,
                    &target,
                    &wait_config(),
                    &mut rx,
                )
                .await
            }
        });

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();

        let err = wait.await.unwrap().unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_group_loops_until_deadline() {
        let provider = MemoryProvider::new().with_group(group("webapp-02", &["prod"], &[]));
        let g = "webapp-02".to_string();

        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();
        let err = await_serving(&probe, &provider, &g, &lbs(&["prod"]), &wait_config(), &mut rx)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::TimedOut { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deregistration_wait_finishes_after_drain() {
        let provider = MemoryProvider::new()
            .with_group(group("webapp-01", &["prod"], &["i-01"]))
            .with_drain_polls(2);
        let g = "webapp-01".to_string();

        provider.detach(&g, &"prod".to_string()).await.unwrap();

        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();
        await_deregistered(
            &probe,
            &provider,
            &g,
            &["i-01".to_string()],
            &lbs(&["prod"]),
            &wait_config(),
            &mut rx,
        )
        .await
        .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn deregistration_wait_ignores_foreign_instances() {
        // A balancer still serving some other group's instances does not
        // hold up deregistration of ours.
        let provider = MemoryProvider::new()
            .with_group(group("webapp-01", &["prod"], &["i-01"]))
            .with_group(group("webapp-02", &["prod"], &["i-11"]));
        let g = "webapp-02".to_string();

        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();
        await_deregistered(
            &probe,
            &provider,
            &g,
            &["i-99".to_string()],
            &lbs(&["prod"]),
            &wait_config(),
            &mut rx,
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn provider_lookup_errors_pass_through() {
        let provider = MemoryProvider::new();
        let probe = HealthProbe::new();
        let (_tx, mut rx) = no_cancel();

        let err = await_serving(
            &probe,
            &provider,
            &"webapp-09".to_string(),
            &lbs(&["prod"]),
            &wait_config(),
            &mut rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            WaitError::Provider(ProviderError::GroupNotFound(_))
        ));
    }
}
