//! The rehearsal workflow.
//!
//! Sequences one full deployment hand-off the way production tooling
//! would: resolve roles from tags, cut the load balancers over to the
//! pre group, rewrite the role tags, then do the retirement
//! housekeeping (standby reattach, drain wait, standby verification).
//! Only the engine owns attachment correctness; everything here is
//! glue around it.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use fleetswap_core::{GroupId, InstanceId, LoadBalancerId};
use fleetswap_cutover::{CutoverEngine, CutoverOperation, CutoverOutcome};
use fleetswap_discovery::{promote, resolve_fleet};
use fleetswap_health::{await_deregistered, await_serving, HealthProbe, WaitConfig};
use fleetswap_provider::{retry_transient, LoadBalancerBinder, RetryPolicy};

use crate::config::FleetFile;

/// Command-line overrides applied on top of the fleet description.
#[derive(Debug, Clone, Default)]
pub struct SimulationOptions {
    pub wait_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
}

/// What the rehearsal did, for operator eyes and `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub outcome: CutoverOutcome,
    /// Balancers moved to the promoted group.
    pub moved: Vec<LoadBalancerId>,
    /// Standby balancers attached to the retired group afterwards.
    pub standby_attached: Vec<LoadBalancerId>,
    /// Whether the retired group finished draining from the moved
    /// balancers.
    pub deregistered: bool,
    /// Whether the retired group passed the standby health gate.
    pub standby_verified: bool,
    /// Attachments per group once everything settled.
    pub final_attachments: BTreeMap<GroupId, BTreeSet<LoadBalancerId>>,
}

/// Run the full workflow described by `file` against the in-memory
/// provider it declares.
pub async fn run_simulation(
    file: &FleetFile,
    options: &SimulationOptions,
) -> anyhow::Result<SimulationReport> {
    let provider = file.build_provider();
    let probe = HealthProbe::new();
    let retry = RetryPolicy::default();

    for balancer in file.balancers() {
        info!(lb = %balancer.id, kind = ?balancer.kind, "declared load balancer");
    }

    // ── Resolve roles ──────────────────────────────────────────────
    let fleet = resolve_fleet(&provider, &file.service_filter())
        .await
        .context("resolving fleet roles")?;

    let live_id = fleet.live.as_ref().map(|g| g.id.clone());

    // Balancers to move: explicit list, or whatever the live group holds.
    let moved: BTreeSet<LoadBalancerId> = match &file.cutover.load_balancers {
        Some(list) => list.iter().cloned().collect(),
        None => match &live_id {
            Some(live) => {
                provider
                    .describe_group(live)
                    .await
                    .context("reading live group attachments")?
                    .load_balancers
            }
            None => bail!(
                "no live group and no [cutover].load_balancers — nothing to cut over"
            ),
        },
    };

    // The retired group's members, captured before anything moves, for
    // the drain wait afterwards.
    let retired_instances: Vec<InstanceId> = match &live_id {
        Some(live) => {
            provider
                .describe_group(live)
                .await
                .context("reading live group instances")?
                .instances
        }
        None => Vec::new(),
    };

    let wait = WaitConfig {
        timeout: options
            .wait_timeout
            .or(file.cutover.wait_timeout_secs.map(Duration::from_secs))
            .unwrap_or(fleetswap_cutover::DEFAULT_WAIT_TIMEOUT),
        poll_interval: options
            .poll_interval
            .or(file.cutover.poll_interval_secs.map(Duration::from_secs))
            .unwrap_or(fleetswap_cutover::DEFAULT_POLL_INTERVAL),
    };

    // ── Cut over ───────────────────────────────────────────────────
    let operation = CutoverOperation::new(live_id.clone(), fleet.pre.id.clone(), moved.clone())
        .with_wait_timeout(wait.timeout)
        .with_poll_interval(wait.poll_interval);

    let engine = CutoverEngine::new(provider.clone());
    let outcome = engine.cutover(&operation).await?;

    // ── Promote tags ───────────────────────────────────────────────
    promote(&provider, &fleet)
        .await
        .context("rewriting fleet-state tags")?;

    // ── Standby reattach ───────────────────────────────────────────
    let mut standby_attached = Vec::new();
    if let Some(retired) = &outcome.retired {
        for lb in &file.cutover.standby_load_balancers {
            retry_transient(&retry, "attach_load_balancer", || {
                provider.attach(retired, lb)
            })
            .await
            .with_context(|| format!("attaching standby balancer {lb}"))?;
            info!(group = %retired, %lb, "standby balancer attached");
            standby_attached.push(lb.clone());
        }
    }

    // ── Drain wait ─────────────────────────────────────────────────
    let mut deregistered = false;
    if file.cutover.await_deregistration {
        if let Some(retired) = &outcome.retired {
            let (_keep_alive, mut cancel) = watch::channel(false);
            await_deregistered(
                &probe,
                &provider,
                retired,
                &retired_instances,
                &moved,
                &wait,
                &mut cancel,
            )
            .await
            .context("waiting for the retired group to drain")?;
            deregistered = true;
        }
    }

    // ── Standby verification ───────────────────────────────────────
    let mut standby_verified = false;
    if file.cutover.verify_standby && !standby_attached.is_empty() {
        if let Some(retired) = &outcome.retired {
            let standby: BTreeSet<LoadBalancerId> = standby_attached.iter().cloned().collect();
            let (_keep_alive, mut cancel) = watch::channel(false);
            await_serving(&probe, &provider, retired, &standby, &wait, &mut cancel)
                .await
                .context("verifying the retired group on its standby balancers")?;
            standby_verified = true;
        }
    }

    // ── Final snapshot ─────────────────────────────────────────────
    let mut final_attachments = BTreeMap::new();
    for group in &file.groups {
        let state = provider
            .describe_group(&group.id)
            .await
            .context("reading final attachments")?;
        final_attachments.insert(group.id.clone(), state.load_balancers);
    }

    Ok(SimulationReport {
        outcome,
        moved: moved.into_iter().collect(),
        standby_attached,
        deregistered,
        standby_verified,
        final_attachments,
    })
}
