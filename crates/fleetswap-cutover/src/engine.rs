//! The cutover engine.
//!
//! Drives one [`CutoverOperation`] through attach → confirm → detach,
//! rolling back its own attachments on any failure before the old group
//! is touched. The ordering is the whole point: health on the new group
//! is confirmed while the old group is still serving, so a failed
//! cutover never reduces live capacity.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use fleetswap_core::{GroupId, LoadBalancerId};
use fleetswap_health::{await_serving, HealthProbe, WaitConfig, WaitError};
use fleetswap_provider::{retry_transient, LoadBalancerBinder, ProviderError, RetryPolicy};

use crate::error::{CutoverError, CutoverResult};
use crate::operation::{CutoverOperation, CutoverOutcome, CutoverPhase};

/// Runs cutover and reconcile operations against one binder.
pub struct CutoverEngine<B> {
    binder: B,
    probe: HealthProbe,
    retry: RetryPolicy,
}

impl<B: LoadBalancerBinder> CutoverEngine<B> {
    pub fn new(binder: B) -> Self {
        Self {
            binder,
            probe: HealthProbe::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Use a custom retry policy for every provider call the engine and
    /// its probe make.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.probe = HealthProbe::new().with_retry(retry.clone());
        self.retry = retry;
        self
    }

    pub(crate) fn binder(&self) -> &B {
        &self.binder
    }

    pub(crate) fn probe(&self) -> &HealthProbe {
        &self.probe
    }

    pub(crate) fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run a cutover to completion without external cancellation.
    pub async fn cutover(&self, op: &CutoverOperation) -> CutoverResult<CutoverOutcome> {
        let (_keep_alive, cancel) = watch::channel(false);
        self.cutover_with_cancel(op, cancel).await
    }

    /// Run a cutover; flipping `cancel` to `true` aborts the health wait
    /// and rolls back exactly as a timeout would.
    ///
    /// Error semantics follow the phase reached:
    /// - before anything was attached: no mutations were made;
    /// - during attach or confirm: every attachment this run made has
    ///   been rolled back, the old group untouched;
    /// - after health confirmation ([`CutoverError::Provider`] with
    ///   phase `HealthConfirmed`): the new group is live on all load
    ///   balancers and the failure is a partial success — stale
    ///   attachments on the old group need follow-up cleanup, nothing
    ///   is rolled back.
    pub async fn cutover_with_cancel(
        &self,
        op: &CutoverOperation,
        mut cancel: watch::Receiver<bool>,
    ) -> CutoverResult<CutoverOutcome> {
        op.validate()?;

        let new_state = self
            .probe
            .describe_group(&self.binder, &op.new_group)
            .await
            .map_err(|source| CutoverError::Provider {
                phase: CutoverPhase::Start,
                source,
            })?;

        // A cutover to an empty group would flip production traffic to a
        // fleet with no capacity; reject before attaching anything.
        if new_state.is_empty() {
            return Err(CutoverError::InvalidInput(format!(
                "group {} has no instances",
                op.new_group
            )));
        }

        info!(
            new_group = %op.new_group,
            current_group = op.current_group.as_deref().unwrap_or("<none>"),
            balancers = op.load_balancers.len(),
            "cutover starting"
        );

        // ── Attach ─────────────────────────────────────────────────
        //
        // Every balancer is attempted even after a failure so the
        // rollback below sees the full picture; the first error wins.
        let mut attached_now: Vec<LoadBalancerId> = Vec::new();
        let mut attach_failure: Option<(LoadBalancerId, ProviderError)> = None;

        for lb in &op.load_balancers {
            if new_state.load_balancers.contains(lb) {
                debug!(group = %op.new_group, %lb, "already attached, skipping");
                continue;
            }
            let result = retry_transient(&self.retry, "attach_load_balancer", || {
                self.binder.attach(&op.new_group, lb)
            })
            .await;
            match result {
                Ok(()) => {
                    info!(group = %op.new_group, %lb, "attached");
                    attached_now.push(lb.clone());
                }
                Err(e) => {
                    warn!(group = %op.new_group, %lb, error = %e, "attach failed");
                    attach_failure.get_or_insert((lb.clone(), e));
                }
            }
        }

        if let Some((lb, source)) = attach_failure {
            self.roll_back(&op.new_group, &attached_now).await;
            return Err(CutoverError::AttachFailed { lb, source });
        }

        debug!(group = %op.new_group, phase = %CutoverPhase::Attached, "all balancers attached");

        // ── Confirm ────────────────────────────────────────────────
        let wait = WaitConfig {
            timeout: op.wait_timeout,
            poll_interval: op.poll_interval,
        };
        let gate = await_serving(
            &self.probe,
            &self.binder,
            &op.new_group,
            &op.load_balancers,
            &wait,
            &mut cancel,
        )
        .await;

        match gate {
            Ok(()) => {
                debug!(group = %op.new_group, phase = %CutoverPhase::HealthConfirmed, "health gate passed");
            }
            Err(WaitError::TimedOut { elapsed, unhealthy }) => {
                warn!(
                    group = %op.new_group,
                    elapsed_secs = elapsed.as_secs(),
                    unhealthy = unhealthy.len(),
                    phase = %CutoverPhase::HealthTimedOut,
                    "health confirmation timed out, rolling back"
                );
                self.roll_back(&op.new_group, &attached_now).await;
                return Err(CutoverError::HealthCheckTimeout { elapsed, unhealthy });
            }
            Err(WaitError::Cancelled { elapsed }) => {
                warn!(
                    group = %op.new_group,
                    elapsed_secs = elapsed.as_secs(),
                    "cutover cancelled, rolling back"
                );
                self.roll_back(&op.new_group, &attached_now).await;
                return Err(CutoverError::Cancelled { elapsed });
            }
            Err(WaitError::Provider(source)) => {
                warn!(group = %op.new_group, error = %source, "provider failure during confirmation, rolling back");
                self.roll_back(&op.new_group, &attached_now).await;
                return Err(CutoverError::Provider {
                    phase: CutoverPhase::Attached,
                    source,
                });
            }
        }

        // ── Detach ─────────────────────────────────────────────────
        let retired = match &op.current_group {
            None => {
                debug!("no prior live group, skipping detach");
                None
            }
            Some(current) => self.detach_current(current, op).await?,
        };

        info!(
            promoted = %op.new_group,
            retired = retired.as_deref().unwrap_or("<none>"),
            phase = %CutoverPhase::Done,
            "cutover complete"
        );

        Ok(CutoverOutcome {
            promoted: op.new_group.clone(),
            retired,
        })
    }

    /// Detach the operation's balancers from the previously live group.
    ///
    /// A vanished group is not an error — there is simply nothing to
    /// retire. Any other failure here happens after health confirmation
    /// and is surfaced as a partial success (see `cutover_with_cancel`).
    async fn detach_current(
        &self,
        current: &GroupId,
        op: &CutoverOperation,
    ) -> CutoverResult<Option<GroupId>> {
        let attached = match retry_transient(&self.retry, "list_attached", || {
            self.binder.list_attached(current)
        })
        .await
        {
            Ok(set) => set,
            Err(ProviderError::GroupNotFound(_)) => {
                info!(group = %current, "previous group no longer exists, skipping detach");
                return Ok(None);
            }
            Err(source) => {
                return Err(CutoverError::Provider {
                    phase: CutoverPhase::HealthConfirmed,
                    source,
                });
            }
        };

        for lb in &op.load_balancers {
            if !attached.contains(lb) {
                debug!(group = %current, %lb, "not attached, skipping detach");
                continue;
            }
            retry_transient(&self.retry, "detach_load_balancer", || {
                self.binder.detach(current, lb)
            })
            .await
            .map_err(|source| {
                warn!(
                    group = %current,
                    %lb,
                    error = %source,
                    "detach failed after health confirmation; new group is serving, \
                     old group keeps a stale attachment"
                );
                CutoverError::Provider {
                    phase: CutoverPhase::HealthConfirmed,
                    source,
                }
            })?;
            info!(group = %current, %lb, "detached");
        }

        debug!(group = %current, phase = %CutoverPhase::Detached, "previous group detached");
        Ok(Some(current.clone()))
    }

    /// Undo this run's attachments on `group`. Balancers that were
    /// already attached before the run are left alone, as is the old
    /// group. Failures are logged and skipped so one stubborn balancer
    /// does not mask the error that triggered the rollback.
    pub(crate) async fn roll_back(&self, group: &GroupId, attached_now: &[LoadBalancerId]) {
        for lb in attached_now {
            let result = retry_transient(&self.retry, "detach_load_balancer", || {
                self.binder.detach(group, lb)
            })
            .await;
            match result {
                Ok(()) => debug!(%group, %lb, "rolled back attachment"),
                Err(e) => warn!(%group, %lb, error = %e, "rollback detach failed"),
            }
        }
        if !attached_now.is_empty() {
            info!(
                %group,
                rolled_back = attached_now.len(),
                phase = %CutoverPhase::RolledBack,
                "attachments rolled back"
            );
        }
    }
}
