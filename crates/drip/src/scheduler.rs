//! The periodic tick that promotes scheduled campaigns and
//! advances every runnable customer cursor by at most one dispatch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use campaign_core::types::CampaignId;
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatcher::DispatchOutcome;
use crate::engine::CampaignEngine;
use crate::evaluator::GateDecision;
use crate::progress;
use crate::rules::StepGate;
use crate::types::{Campaign, CampaignStatus, CampaignStep, CursorStatus, CustomerCampaignState};

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub promoted: usize,
    pub campaigns: usize,
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub stalled: usize,
    pub repaired: usize,
    pub completed: usize,
    pub errors: usize,
}

impl TickReport {
    fn merge(&mut self, other: TickReport) {
        self.promoted += other.promoted;
        self.campaigns += other.campaigns;
        self.sent += other.sent;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.stalled += other.stalled;
        self.repaired += other.repaired;
        self.completed += other.completed;
        self.errors += other.errors;
    }
}

pub struct Scheduler {
    engine: Arc<CampaignEngine>,
    /// Serializes background and manual ticks.
    tick_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(engine: Arc<CampaignEngine>) -> Self {
        Self {
            engine,
            tick_lock: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<CampaignEngine> {
        &self.engine
    }

    /// Run one full pass at the engine clock's current time.
    pub async fn tick(&self) -> CampaignResult<TickReport> {
        let _guard = self.tick_lock.lock().await;
        let started = Instant::now();
        let now = self.engine.clock().now();
        let store = self.engine.store();
        let mut report = TickReport::default();

        for campaign in store.list_campaigns(Some(CampaignStatus::Scheduled)) {
            match self.engine.promote(&campaign, now).await {
                Ok(Some(_)) => report.promoted += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(campaign_id = campaign.id, error = %err, "Promotion failed");
                    report.errors += 1;
                }
            }
        }

        for campaign in store.list_campaigns(Some(CampaignStatus::Running)) {
            report.campaigns += 1;
            match self.run_campaign(&campaign, now).await {
                Ok(unit) => report.merge(unit),
                Err(err) => {
                    report.errors += 1;
                    let reason = err.to_string();
                    if let Err(fail_err) = self.engine.fail_campaign(campaign.id, &reason) {
                        warn!(
                            campaign_id = campaign.id,
                            error = %fail_err,
                            "Could not mark campaign failed"
                        );
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::histogram!("drip.tick.duration_ms").record(elapsed.as_millis() as f64);
        debug!(
            promoted = report.promoted,
            campaigns = report.campaigns,
            sent = report.sent,
            skipped = report.skipped,
            failed = report.failed,
            errors = report.errors,
            elapsed_ms = elapsed.as_millis() as u64,
            "Tick finished"
        );
        Ok(report)
    }

    /// Advance every runnable cursor of one RUNNING campaign concurrently,
    /// then complete the campaign if all cursors are finished.
    async fn run_campaign(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> CampaignResult<TickReport> {
        let campaign_id = campaign.id;
        let steps = Arc::new(self.engine.store().list_steps(campaign_id));
        if steps.is_empty() {
            return Err(CampaignError::InvalidState(format!(
                "running campaign {campaign_id} has no steps"
            )));
        }

        let semaphore = Arc::new(Semaphore::new(self.engine.config().max_concurrency.max(1)));
        let mut units = JoinSet::new();
        for cursor in self.engine.store().runnable_states(campaign_id) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| CampaignError::Internal(e.into()))?;
            let engine = self.engine.clone();
            let steps = steps.clone();
            units.spawn(async move {
                let _permit = permit;
                advance_customer(&engine, campaign_id, &steps, cursor, now).await
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(Ok(unit)) => report.merge(unit),
                Ok(Err(err)) => {
                    warn!(campaign_id, error = %err, "Customer unit failed");
                    report.errors += 1;
                }
                Err(join_err) => {
                    error!(campaign_id, error = %join_err, "Customer unit panicked");
                    report.errors += 1;
                }
            }
        }

        if self.engine.complete_if_finished(campaign_id, now)? {
            report.completed += 1;
        }
        Ok(report)
    }

    /// Start the background loop. Ticks are spaced by
    /// `scheduler.tick_interval_ms`; missed ticks are skipped, not bunched.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval_ms = self.engine.config().tick_interval_ms.max(1);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_ms, "Drip scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Drip scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Owner of a running scheduler loop.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal the loop and wait for an in-flight tick to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

/// Walk one cursor forward: skipped steps chain within the tick, a due step
/// is dispatched and ends the unit.
async fn advance_customer(
    engine: &CampaignEngine,
    campaign_id: CampaignId,
    steps: &[CampaignStep],
    mut cursor: CustomerCampaignState,
    now: DateTime<Utc>,
) -> CampaignResult<TickReport> {
    let mut report = TickReport::default();
    let policy = engine.config.delay_policy;

    loop {
        let Some(step) = progress::next_step(steps, cursor.last_step_order) else {
            engine
                .store
                .update_state(campaign_id, cursor.customer_id, now, |s| {
                    s.status = CursorStatus::Finished
                })?;
            break;
        };
        if now < progress::due_at(policy, &cursor, step) {
            break;
        }

        if let Some(gate) = &step.filter_rules {
            match evaluate_gate(engine, campaign_id, gate, steps, step, &cursor, now).await {
                GateDecision::Due => {}
                GateDecision::NotYet => break,
                GateDecision::Never => {
                    if engine.store.campaign_status(campaign_id)? != CampaignStatus::Running {
                        break;
                    }
                    cursor = engine.dispatcher.skip(campaign_id, step, steps, &cursor, now)?;
                    report.skipped += 1;
                    if !cursor.is_runnable() {
                        break;
                    }
                    continue;
                }
            }
        }

        match engine
            .dispatcher
            .dispatch(campaign_id, step, steps, &cursor, now)
            .await?
        {
            DispatchOutcome::Sent => report.sent += 1,
            DispatchOutcome::Failed => report.failed += 1,
            DispatchOutcome::Stalled => {
                report.failed += 1;
                report.stalled += 1;
            }
            DispatchOutcome::Repaired => report.repaired += 1,
            DispatchOutcome::Halted => {}
        }
        break;
    }
    Ok(report)
}

/// History read failures defer the decision to a later tick.
async fn evaluate_gate(
    engine: &CampaignEngine,
    campaign_id: CampaignId,
    gate: &StepGate,
    steps: &[CampaignStep],
    step: &CampaignStep,
    cursor: &CustomerCampaignState,
    now: DateTime<Utc>,
) -> GateDecision {
    let channel = engine
        .evaluator
        .scope_channel(gate, progress::previous_step(steps, step.order_no));
    let anchor = progress::gate_anchor(cursor);

    match engine
        .history
        .interactions(cursor.customer_id, channel, anchor)
        .await
    {
        Ok(interactions) => engine.evaluator.evaluate(gate, anchor, now, &interactions),
        Err(e) => {
            warn!(
                campaign_id,
                customer_id = cursor.customer_id,
                error = %e,
                "Interaction history unavailable, gate deferred"
            );
            GateDecision::NotYet
        }
    }
}
