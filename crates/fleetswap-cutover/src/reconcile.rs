//! Single-group attachment reconcile.
//!
//! Drives one group's load balancer set to an exact target: attach what
//! is missing, health-gate the group on the full target set, then detach
//! the surplus. The one-group cousin of the cutover — same gate, same
//! rollback discipline, no second group involved.

use std::collections::BTreeSet;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetswap_core::{GroupId, LoadBalancerId};
use fleetswap_health::{await_serving, WaitConfig, WaitError};
use fleetswap_provider::{retry_transient, LoadBalancerBinder, ProviderError};

use crate::engine::CutoverEngine;
use crate::error::{CutoverError, CutoverResult};
use crate::operation::CutoverPhase;

/// Terminal report of a reconcile: what actually changed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReconcileOutcome {
    pub group: GroupId,
    /// Balancers newly attached by this run.
    pub attached: Vec<LoadBalancerId>,
    /// Balancers detached by this run.
    pub detached: Vec<LoadBalancerId>,
}

impl<B: LoadBalancerBinder> CutoverEngine<B> {
    /// Reconcile `group`'s attachments to exactly `target`, without
    /// external cancellation.
    pub async fn set_load_balancers(
        &self,
        group: &GroupId,
        target: &BTreeSet<LoadBalancerId>,
        wait: &WaitConfig,
    ) -> CutoverResult<ReconcileOutcome> {
        let (_keep_alive, cancel) = watch::channel(false);
        self.set_load_balancers_with_cancel(group, target, wait, cancel)
            .await
    }

    /// Reconcile `group`'s attachments to exactly `target`.
    ///
    /// Balancers already attached are kept; missing ones are attached
    /// and health-gated; surplus ones are detached only after the gate
    /// passes. On gate failure only this run's attachments are undone,
    /// so the group is left exactly as found.
    pub async fn set_load_balancers_with_cancel(
        &self,
        group: &GroupId,
        target: &BTreeSet<LoadBalancerId>,
        wait: &WaitConfig,
        mut cancel: watch::Receiver<bool>,
    ) -> CutoverResult<ReconcileOutcome> {
        if target.is_empty() {
            return Err(CutoverError::InvalidInput(
                "target load balancer set is empty".to_string(),
            ));
        }
        if wait.timeout.is_zero() {
            return Err(CutoverError::InvalidInput(
                "wait timeout must be positive".to_string(),
            ));
        }

        let state = self
            .probe()
            .describe_group(self.binder(), group)
            .await
            .map_err(|source| CutoverError::Provider {
                phase: CutoverPhase::Start,
                source,
            })?;

        if state.is_empty() {
            return Err(CutoverError::InvalidInput(format!(
                "group {group} has no instances"
            )));
        }

        let to_attach: Vec<LoadBalancerId> = target
            .iter()
            .filter(|lb| !state.load_balancers.contains(*lb))
            .cloned()
            .collect();
        let to_detach: Vec<LoadBalancerId> = state
            .load_balancers
            .iter()
            .filter(|lb| !target.contains(*lb))
            .cloned()
            .collect();

        info!(
            %group,
            attaching = to_attach.len(),
            detaching = to_detach.len(),
            "reconciling load balancer set"
        );

        // ── Attach missing ─────────────────────────────────────────
        let mut attached_now: Vec<LoadBalancerId> = Vec::new();
        let mut attach_failure: Option<(LoadBalancerId, ProviderError)> = None;

        for lb in &to_attach {
            let result = retry_transient(self.retry(), "attach_load_balancer", || {
                self.binder().attach(group, lb)
            })
            .await;
            match result {
                Ok(()) => {
                    info!(%group, %lb, "attached");
                    attached_now.push(lb.clone());
                }
                Err(e) => {
                    warn!(%group, %lb, error = %e, "attach failed");
                    attach_failure.get_or_insert((lb.clone(), e));
                }
            }
        }

        if let Some((lb, source)) = attach_failure {
            self.roll_back(group, &attached_now).await;
            return Err(CutoverError::AttachFailed { lb, source });
        }

        // ── Gate on the full target set ────────────────────────────
        if !attached_now.is_empty() {
            let gate = await_serving(
                self.probe(),
                self.binder(),
                group,
                target,
                wait,
                &mut cancel,
            )
            .await;

            match gate {
                Ok(()) => {}
                Err(WaitError::TimedOut { elapsed, unhealthy }) => {
                    self.roll_back(group, &attached_now).await;
                    return Err(CutoverError::HealthCheckTimeout { elapsed, unhealthy });
                }
                Err(WaitError::Cancelled { elapsed }) => {
                    self.roll_back(group, &attached_now).await;
                    return Err(CutoverError::Cancelled { elapsed });
                }
                Err(WaitError::Provider(source)) => {
                    self.roll_back(group, &attached_now).await;
                    return Err(CutoverError::Provider {
                        phase: CutoverPhase::Attached,
                        source,
                    });
                }
            }
        } else {
            debug!(%group, "nothing newly attached, skipping health gate");
        }

        // ── Detach surplus ─────────────────────────────────────────
        //
        // The new attachments are confirmed serving; a failure from here
        // on is a partial success, same as the cutover's detach phase.
        let mut detached = Vec::new();
        for lb in &to_detach {
            retry_transient(self.retry(), "detach_load_balancer", || {
                self.binder().detach(group, lb)
            })
            .await
            .map_err(|source| {
                warn!(%group, %lb, error = %source, "detach failed, surplus attachment remains");
                CutoverError::Provider {
                    phase: CutoverPhase::HealthConfirmed,
                    source,
                }
            })?;
            info!(%group, %lb, "detached");
            detached.push(lb.clone());
        }

        Ok(ReconcileOutcome {
            group: group.clone(),
            attached: attached_now,
            detached,
        })
    }
}
