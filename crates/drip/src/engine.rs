//! Campaign engine: lifecycle, step and execution management over the
//! shared store, plus the hooks the scheduler drives.

use std::sync::Arc;

use campaign_channels::{ChannelRouter, MessageHistory, TemplateStore};
use campaign_core::config::SchedulerConfig;
use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::types::{CampaignId, CustomerId, EventType, ExecutionId, StepId};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::{AudienceResolver, CustomerDirectory};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::dispatcher::Dispatcher;
use crate::evaluator::GateEvaluator;
use crate::progress::{self, CustomerProgress};
use crate::state_machine::CampaignStateMachine;
use crate::store::CampaignStore;
use crate::types::{
    Campaign, CampaignExecution, CampaignPatch, CampaignStats, CampaignStatus, CampaignStep,
    CursorStatus, CustomerCampaignState, ExecutionPatch, ExecutionQuery, NewCampaign,
    NewExecution, NewStep, StepPatch,
};

/// External systems the engine reads from and sends through.
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn CustomerDirectory>,
    pub templates: Arc<dyn TemplateStore>,
    pub history: Arc<dyn MessageHistory>,
    pub router: Arc<ChannelRouter>,
}

pub struct CampaignEngine {
    pub(crate) store: Arc<CampaignStore>,
    pub(crate) resolver: AudienceResolver,
    pub(crate) history: Arc<dyn MessageHistory>,
    pub(crate) evaluator: GateEvaluator,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: SchedulerConfig,
    event_sink: Arc<dyn EventSink>,
}

impl CampaignEngine {
    pub fn new(config: SchedulerConfig, collaborators: Collaborators) -> Self {
        let store = Arc::new(CampaignStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            collaborators.router,
            collaborators.templates,
            collaborators.directory.clone(),
            config.clone(),
        );
        Self {
            store,
            resolver: AudienceResolver::new(collaborators.directory),
            history: collaborators.history,
            evaluator: GateEvaluator::new(),
            dispatcher,
            clock: Arc::new(SystemClock),
            config,
            event_sink: campaign_core::event_bus::tracing_sink(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.dispatcher.event_sink = sink.clone();
        self.event_sink = sink;
        self
    }

    pub fn store(&self) -> &Arc<CampaignStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ─── Campaigns ──────────────────────────────────────────────────────

    pub fn create_campaign(&self, mut new: NewCampaign) -> CampaignResult<Campaign> {
        new.name = new.name.trim().to_string();
        if new.name.is_empty() {
            return Err(CampaignError::validation("campaign name must not be empty"));
        }
        let campaign = self.store.insert_campaign(new, self.clock.now());
        info!(
            campaign_id = campaign.id,
            name = %campaign.name,
            customers = campaign.customer_ids.len(),
            "Campaign created"
        );
        Ok(campaign)
    }

    pub fn get_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        self.store.get_campaign(id)
    }

    pub fn list_campaigns(&self, status: Option<CampaignStatus>) -> Vec<Campaign> {
        self.store.list_campaigns(status)
    }

    pub fn update_campaign(
        &self,
        id: CampaignId,
        patch: CampaignPatch,
    ) -> CampaignResult<Campaign> {
        let now = self.clock.now();
        self.store.update_campaign(id, |campaign| {
            if patch.is_structural() && campaign.status != CampaignStatus::Draft {
                return Err(CampaignError::InvalidState(format!(
                    "campaign {id} is {}; only name and created_by can change outside DRAFT",
                    campaign.status
                )));
            }
            if let Some(name) = patch.name {
                let name = name.trim();
                if name.is_empty() {
                    return Err(CampaignError::validation("campaign name must not be empty"));
                }
                campaign.name = name.to_string();
            }
            if let Some(created_by) = patch.created_by {
                campaign.created_by = Some(created_by);
            }
            if let Some(campaign_type) = patch.campaign_type {
                campaign.campaign_type = campaign_type;
            }
            if let Some(run_immediately) = patch.run_immediately {
                campaign.run_immediately = run_immediately;
            }
            if let Some(schedule_time) = patch.schedule_time {
                campaign.schedule_time = schedule_time;
            }
            if let Some(customer_ids) = patch.customer_ids {
                campaign.customer_ids = customer_ids;
            }
            if let Some(filter_rules) = patch.filter_rules {
                campaign.filter_rules = filter_rules;
            }
            campaign.updated_at = now;
            Ok(())
        })
    }

    pub fn delete_campaign(&self, id: CampaignId) -> CampaignResult<()> {
        self.store.delete_campaign(id)?;
        info!(campaign_id = id, "Campaign deleted");
        Ok(())
    }

    pub fn campaign_stats(&self, id: CampaignId) -> CampaignResult<CampaignStats> {
        self.store.get_campaign(id)?;
        Ok(self.store.stats(id))
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// DRAFT with a future `schedule_time` (and `run_immediately` unset)
    /// becomes SCHEDULED; DRAFT otherwise, or SCHEDULED, starts now.
    pub async fn start_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.store.get_campaign(id)?;
        let now = self.clock.now();

        match campaign.status {
            CampaignStatus::Draft => {
                self.runnable_steps(id)?;
                let deferred = !campaign.run_immediately
                    && campaign.schedule_time.is_some_and(|at| at > now);
                if !deferred {
                    return self.activate(&campaign, now, true).await;
                }

                let scheduled = self.store.update_campaign(id, |c| {
                    CampaignStateMachine::check(c.status, CampaignStatus::Scheduled)?;
                    c.status = CampaignStatus::Scheduled;
                    c.updated_at = now;
                    Ok(())
                })?;
                info!(
                    campaign_id = id,
                    schedule_time = ?scheduled.schedule_time,
                    "Campaign scheduled"
                );
                self.event_sink
                    .emit(make_event(EventType::CampaignScheduled, id, None, None));
                Ok(scheduled)
            }
            CampaignStatus::Scheduled => self.activate(&campaign, now, true).await,
            other => Err(CampaignError::InvalidTransition {
                from: other.to_string(),
                to: CampaignStatus::Running.to_string(),
            }),
        }
    }

    /// Stop a campaign in any non-terminal state. Stopping a stopped campaign
    /// is a no-op.
    pub fn stop_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let now = self.clock.now();
        let mut changed = false;
        let campaign = self.store.update_campaign(id, |c| {
            if c.status == CampaignStatus::Stopped {
                return Ok(());
            }
            CampaignStateMachine::check(c.status, CampaignStatus::Stopped)?;
            c.status = CampaignStatus::Stopped;
            c.updated_at = now;
            changed = true;
            Ok(())
        })?;

        if changed {
            info!(campaign_id = id, "Campaign stopped");
            self.event_sink
                .emit(make_event(EventType::CampaignStopped, id, None, None));
        }
        Ok(campaign)
    }

    pub fn pause_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.transition(id, CampaignStatus::Paused)?;
        info!(campaign_id = id, "Campaign paused");
        self.event_sink
            .emit(make_event(EventType::CampaignPaused, id, None, None));
        Ok(campaign)
    }

    pub fn resume_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        let campaign = self.store.update_campaign(id, |c| {
            if c.status != CampaignStatus::Paused {
                return Err(CampaignError::InvalidTransition {
                    from: c.status.to_string(),
                    to: CampaignStatus::Running.to_string(),
                });
            }
            c.status = CampaignStatus::Running;
            c.updated_at = self.clock.now();
            Ok(())
        })?;
        info!(campaign_id = id, "Campaign resumed");
        self.event_sink
            .emit(make_event(EventType::CampaignResumed, id, None, None));
        Ok(campaign)
    }

    fn transition(&self, id: CampaignId, to: CampaignStatus) -> CampaignResult<Campaign> {
        let now = self.clock.now();
        self.store.update_campaign(id, |c| {
            CampaignStateMachine::check(c.status, to)?;
            c.status = to;
            c.updated_at = now;
            Ok(())
        })
    }

    /// Resolve the audience, move to RUNNING and enroll everyone.
    ///
    /// An empty audience rejects an explicit start and fails a scheduled
    /// promotion. A resolver error fails the campaign on either path.
    async fn activate(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
        explicit: bool,
    ) -> CampaignResult<Campaign> {
        let id = campaign.id;
        let audience = match self
            .resolver
            .resolve(&campaign.customer_ids, campaign.filter_rules.as_ref())
            .await
        {
            Ok(audience) => audience,
            Err(err) => {
                return self.fail_campaign(id, &format!("audience resolution failed: {err}"));
            }
        };
        if audience.is_empty() {
            let reason = "audience resolved to no customers";
            if explicit {
                return Err(CampaignError::validation(reason));
            }
            return self.fail_campaign(id, reason);
        }

        let from = campaign.status;
        let mut enrolled = Vec::new();
        let started = self.store.update_campaign(id, |c| {
            if c.status != from {
                return Err(CampaignError::Conflict(format!(
                    "campaign {id} moved from {from} to {} while starting",
                    c.status
                )));
            }
            self.runnable_steps(id)?;
            CampaignStateMachine::check(c.status, CampaignStatus::Running)?;
            c.status = CampaignStatus::Running;
            c.started_at = Some(now);
            c.updated_at = now;
            c.error = None;
            enrolled = self.store.enroll(id, &audience, now);
            Ok(())
        })?;

        info!(
            campaign_id = id,
            from = %from,
            customers = enrolled.len(),
            "Campaign started"
        );
        self.event_sink
            .emit(make_event(EventType::CampaignStarted, id, None, None));
        for customer_id in enrolled {
            self.event_sink.emit(make_event(
                EventType::CustomerEnrolled,
                id,
                Some(customer_id),
                None,
            ));
        }
        Ok(started)
    }

    /// Steps of `id`, failing unless there is at least one and all are valid.
    fn runnable_steps(&self, id: CampaignId) -> CampaignResult<Vec<CampaignStep>> {
        let steps = self.store.list_steps(id);
        if steps.is_empty() {
            return Err(CampaignError::validation(format!(
                "campaign {id} has no steps"
            )));
        }
        for step in &steps {
            step.validate()?;
        }
        Ok(steps)
    }

    // ─── Scheduler hooks ────────────────────────────────────────────────

    /// Start a SCHEDULED campaign whose time has come. Returns `None` when
    /// there was nothing to do, another writer got there first, or the
    /// campaign failed because its audience was empty or unresolvable.
    pub async fn promote(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
    ) -> CampaignResult<Option<Campaign>> {
        if campaign.status != CampaignStatus::Scheduled
            || campaign.schedule_time.is_some_and(|at| at > now)
        {
            return Ok(None);
        }
        match self.activate(campaign, now, false).await {
            Ok(started) if started.status == CampaignStatus::Running => Ok(Some(started)),
            Ok(_) => Ok(None),
            Err(CampaignError::Conflict(reason)) => {
                debug!(campaign_id = campaign.id, %reason, "Promotion skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Move a campaign to FAILED, recording `reason`. Only DRAFT (failed
    /// start), SCHEDULED and RUNNING campaigns can fail. A campaign that
    /// already reached a terminal state is returned unchanged.
    pub fn fail_campaign(&self, id: CampaignId, reason: &str) -> CampaignResult<Campaign> {
        let now = self.clock.now();
        let mut changed = false;
        let campaign = self.store.update_campaign(id, |c| {
            if c.status.is_terminal() {
                return Ok(());
            }
            CampaignStateMachine::check(c.status, CampaignStatus::Failed)?;
            c.status = CampaignStatus::Failed;
            c.error = Some(reason.to_string());
            c.completed_at = Some(now);
            c.updated_at = now;
            changed = true;
            Ok(())
        })?;
        if !changed {
            debug!(campaign_id = id, status = %campaign.status, "Campaign already finished");
            return Ok(campaign);
        }

        error!(campaign_id = id, reason, "Campaign failed");
        self.event_sink
            .emit(make_event(EventType::CampaignFailed, id, None, None));
        Ok(campaign)
    }

    /// Mark a RUNNING campaign COMPLETED once every cursor is finished.
    pub fn complete_if_finished(&self, id: CampaignId, now: DateTime<Utc>) -> CampaignResult<bool> {
        let states = self.store.list_states(id);
        if states.is_empty() || states.iter().any(|s| s.status != CursorStatus::Finished) {
            return Ok(false);
        }

        let mut completed = false;
        self.store.update_campaign(id, |c| {
            if c.status != CampaignStatus::Running {
                return Ok(());
            }
            c.status = CampaignStatus::Completed;
            c.completed_at = Some(now);
            c.updated_at = now;
            completed = true;
            Ok(())
        })?;

        if completed {
            info!(campaign_id = id, customers = states.len(), "Campaign completed");
            self.event_sink
                .emit(make_event(EventType::CampaignCompleted, id, None, None));
        }
        Ok(completed)
    }

    // ─── Steps ──────────────────────────────────────────────────────────

    pub fn list_steps(&self, campaign_id: CampaignId) -> CampaignResult<Vec<CampaignStep>> {
        self.store.get_campaign(campaign_id)?;
        Ok(self.store.list_steps(campaign_id))
    }

    pub fn add_step(&self, campaign_id: CampaignId, step: NewStep) -> CampaignResult<CampaignStep> {
        let mut inserted = self.add_steps(campaign_id, vec![step])?;
        inserted
            .pop()
            .ok_or_else(|| CampaignError::Internal(anyhow::anyhow!("step insert returned nothing")))
    }

    /// All-or-nothing batch insert.
    pub fn add_steps(
        &self,
        campaign_id: CampaignId,
        steps: Vec<NewStep>,
    ) -> CampaignResult<Vec<CampaignStep>> {
        let inserted = self
            .store
            .insert_steps(campaign_id, steps, self.clock.now())?;
        debug!(campaign_id, count = inserted.len(), "Steps added");
        Ok(inserted)
    }

    pub fn update_step(
        &self,
        campaign_id: CampaignId,
        step_id: StepId,
        patch: StepPatch,
    ) -> CampaignResult<CampaignStep> {
        self.store
            .update_step(campaign_id, step_id, patch, self.clock.now())
    }

    pub fn delete_step(&self, campaign_id: CampaignId, step_id: StepId) -> CampaignResult<()> {
        self.store.delete_step(campaign_id, step_id)
    }

    // ─── Executions ─────────────────────────────────────────────────────

    pub fn list_executions(
        &self,
        campaign_id: CampaignId,
        query: &ExecutionQuery,
    ) -> CampaignResult<Vec<CampaignExecution>> {
        self.store.get_campaign(campaign_id)?;
        Ok(self.store.list_executions(campaign_id, query))
    }

    /// Manual correction row; the customer's cursor is left alone.
    pub fn create_execution(
        &self,
        campaign_id: CampaignId,
        new: NewExecution,
    ) -> CampaignResult<CampaignExecution> {
        let execution = self
            .store
            .insert_manual_execution(campaign_id, new, self.clock.now())?;
        info!(
            campaign_id,
            execution_id = execution.id,
            status = execution.status.as_str(),
            "Manual execution recorded"
        );
        Ok(execution)
    }

    pub fn update_execution(
        &self,
        campaign_id: CampaignId,
        execution_id: ExecutionId,
        patch: ExecutionPatch,
    ) -> CampaignResult<CampaignExecution> {
        self.store
            .update_execution(campaign_id, execution_id, patch, self.clock.now())
    }

    pub fn delete_execution(
        &self,
        campaign_id: CampaignId,
        execution_id: ExecutionId,
    ) -> CampaignResult<()> {
        self.store.delete_execution(campaign_id, execution_id)
    }

    // ─── Customers ──────────────────────────────────────────────────────

    pub fn customer_progress(
        &self,
        campaign_id: CampaignId,
    ) -> CampaignResult<Vec<CustomerProgress>> {
        self.store.get_campaign(campaign_id)?;
        let steps = self.store.list_steps(campaign_id);
        let executions = self.store.all_executions(campaign_id);
        let now = self.clock.now();

        Ok(self
            .store
            .list_states(campaign_id)
            .iter()
            .map(|state| {
                let own: Vec<CampaignExecution> = executions
                    .iter()
                    .filter(|e| e.customer_id == state.customer_id)
                    .cloned()
                    .collect();
                progress::describe(state, &steps, &own, self.config.delay_policy, now)
            })
            .collect())
    }

    pub fn pause_customer(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
    ) -> CampaignResult<CustomerCampaignState> {
        self.store.get_campaign(campaign_id)?;
        let state = self
            .store
            .update_state(campaign_id, customer_id, self.clock.now(), |s| {
                s.paused = true
            })?;
        info!(campaign_id, customer_id, "Customer paused");
        Ok(state)
    }

    /// Clear the pause flag; a stalled cursor is re-activated with a fresh
    /// retry budget.
    pub fn resume_customer(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
    ) -> CampaignResult<CustomerCampaignState> {
        self.store.get_campaign(campaign_id)?;
        let state = self
            .store
            .update_state(campaign_id, customer_id, self.clock.now(), |s| {
                s.paused = false;
                if s.status == CursorStatus::Stalled {
                    s.status = CursorStatus::Active;
                    s.attempts = 0;
                    s.stalled_step_order = None;
                }
            })?;
        info!(campaign_id, customer_id, "Customer resumed");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campaign_channels::{CaptureSender, InMemoryHistory, InMemoryTemplates};
    use campaign_core::event_bus::capture_sink;
    use campaign_core::types::{Channel, Customer};
    use campaign_segmentation::InMemoryDirectory;
    use chrono::Duration;
    use serde_json::json;

    use crate::clock::ManualClock;

    fn engine() -> (CampaignEngine, Arc<ManualClock>) {
        let directory = Arc::new(InMemoryDirectory::new());
        for id in 1..=3 {
            directory.upsert(Customer {
                id,
                email: Some(format!("c{id}@example.com")),
                ..Default::default()
            });
        }
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let collaborators = Collaborators {
            directory,
            templates: Arc::new(InMemoryTemplates::new()),
            history: Arc::new(InMemoryHistory::new()),
            router: Arc::new(
                ChannelRouter::new(vec![Channel::Email])
                    .with_shared_sender(Arc::new(CaptureSender::new())),
            ),
        };
        let engine = CampaignEngine::new(SchedulerConfig::default(), collaborators)
            .with_clock(clock.clone());
        (engine, clock)
    }

    fn campaign(engine: &CampaignEngine, body: serde_json::Value) -> Campaign {
        engine
            .create_campaign(serde_json::from_value(body).unwrap())
            .unwrap()
    }

    fn email_step(order_no: i32) -> NewStep {
        serde_json::from_value(json!({
            "order_no": order_no,
            "channel": "EMAIL",
            "content": "hello {{name}}"
        }))
        .unwrap()
    }

    #[test]
    fn test_create_requires_name() {
        let (engine, _) = engine();
        let err = engine
            .create_campaign(serde_json::from_value(json!({"name": "  "})).unwrap())
            .unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));

        let c = campaign(&engine, json!({"name": " Spring "}));
        assert_eq!(c.name, "Spring");
        assert_eq!(c.status, CampaignStatus::Draft);
        assert_eq!(c.campaign_type, "MIXED");
    }

    #[tokio::test]
    async fn test_start_without_steps_is_rejected() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        let err = engine.start_campaign(c.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
        assert_eq!(engine.get_campaign(c.id).unwrap().status, CampaignStatus::Draft);
    }

    #[tokio::test]
    async fn test_start_enrolls_audience() {
        let (engine, _) = engine();
        let sink = capture_sink();
        let engine = engine.with_event_sink(sink.clone());
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [3, 1, 99]}));
        engine.add_step(c.id, email_step(1)).unwrap();

        let started = engine.start_campaign(c.id).await.unwrap();
        assert_eq!(started.status, CampaignStatus::Running);
        assert!(started.started_at.is_some());

        let states = engine.store().list_states(c.id);
        assert_eq!(
            states.iter().map(|s| s.customer_id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert!(states.iter().all(|s| s.last_step_order == 0));
        assert_eq!(sink.count_type(EventType::CustomerEnrolled), 2);
        assert_eq!(sink.count_type(EventType::CampaignStarted), 1);
    }

    #[tokio::test]
    async fn test_start_with_empty_audience_is_rejected() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [42]}));
        engine.add_step(c.id, email_step(1)).unwrap();
        let err = engine.start_campaign(c.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::Validation(_)));
    }

    #[tokio::test]
    async fn test_fail_leaves_finished_campaigns_alone() {
        let (engine, _) = engine();
        let sink = capture_sink();
        let engine = engine.with_event_sink(sink.clone());
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();
        engine.start_campaign(c.id).await.unwrap();
        engine.stop_campaign(c.id).unwrap();

        let after = engine.fail_campaign(c.id, "late failure").unwrap();
        assert_eq!(after.status, CampaignStatus::Stopped);
        assert!(after.error.is_none());
        assert_eq!(sink.count_type(EventType::CampaignFailed), 0);

        let paused = campaign(&engine, json!({"name": "y", "customer_ids": [1]}));
        engine.add_step(paused.id, email_step(1)).unwrap();
        engine.start_campaign(paused.id).await.unwrap();
        engine.pause_campaign(paused.id).unwrap();
        let err = engine.fail_campaign(paused.id, "boom").unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_future_schedule_time_schedules() {
        let (engine, clock) = engine();
        let at = clock.now() + Duration::days(1);
        let c = campaign(
            &engine,
            json!({"name": "x", "customer_ids": [1], "schedule_time": at.to_rfc3339()}),
        );
        engine.add_step(c.id, email_step(1)).unwrap();

        let scheduled = engine.start_campaign(c.id).await.unwrap();
        assert_eq!(scheduled.status, CampaignStatus::Scheduled);
        assert!(engine.store().list_states(c.id).is_empty());

        // Not yet due.
        assert!(engine.promote(&scheduled, clock.now()).await.unwrap().is_none());

        clock.advance(Duration::days(1));
        let promoted = engine.promote(&scheduled, clock.now()).await.unwrap().unwrap();
        assert_eq!(promoted.status, CampaignStatus::Running);
        assert_eq!(engine.store().list_states(c.id).len(), 1);
    }

    #[tokio::test]
    async fn test_run_immediately_ignores_schedule_time() {
        let (engine, clock) = engine();
        let at = clock.now() + Duration::days(1);
        let c = campaign(
            &engine,
            json!({
                "name": "x",
                "customer_ids": [1],
                "run_immediately": true,
                "schedule_time": at.to_rfc3339()
            }),
        );
        engine.add_step(c.id, email_step(1)).unwrap();
        let started = engine.start_campaign(c.id).await.unwrap();
        assert_eq!(started.status, CampaignStatus::Running);
    }

    #[tokio::test]
    async fn test_structural_edits_only_in_draft() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();
        engine.start_campaign(c.id).await.unwrap();

        let patch: CampaignPatch =
            serde_json::from_value(json!({"customer_ids": [1, 2]})).unwrap();
        let err = engine.update_campaign(c.id, patch).unwrap_err();
        assert!(matches!(err, CampaignError::InvalidState(_)));

        let rename: CampaignPatch = serde_json::from_value(json!({"name": "renamed"})).unwrap();
        assert_eq!(engine.update_campaign(c.id, rename).unwrap().name, "renamed");

        let err = engine.add_step(c.id, email_step(2)).unwrap_err();
        assert!(matches!(err, CampaignError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_final() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();
        engine.start_campaign(c.id).await.unwrap();

        assert_eq!(engine.stop_campaign(c.id).unwrap().status, CampaignStatus::Stopped);
        assert_eq!(engine.stop_campaign(c.id).unwrap().status, CampaignStatus::Stopped);

        let err = engine.start_campaign(c.id).await.unwrap_err();
        assert!(matches!(err, CampaignError::InvalidTransition { .. }));
        assert!(engine.pause_campaign(c.id).is_err());
    }

    #[tokio::test]
    async fn test_pause_and_resume_campaign() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();

        assert!(matches!(
            engine.pause_campaign(c.id).unwrap_err(),
            CampaignError::InvalidTransition { .. }
        ));
        engine.start_campaign(c.id).await.unwrap();
        assert_eq!(engine.pause_campaign(c.id).unwrap().status, CampaignStatus::Paused);
        assert!(engine.resume_campaign(c.id).is_ok());
        assert!(engine.resume_campaign(c.id).is_err());
    }

    #[tokio::test]
    async fn test_customer_pause_requires_enrollment() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();
        engine.start_campaign(c.id).await.unwrap();

        assert!(matches!(
            engine.pause_customer(c.id, 2).unwrap_err(),
            CampaignError::NotFound { .. }
        ));
        assert!(engine.pause_customer(c.id, 1).unwrap().paused);
        assert!(engine.store().runnable_states(c.id).is_empty());
        assert!(!engine.resume_customer(c.id, 1).unwrap().paused);
    }

    #[test]
    fn test_resume_reactivates_stalled_cursor() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x"}));
        let now = engine.clock().now();
        engine.store().enroll(c.id, &[1], now);
        engine
            .store()
            .update_state(c.id, 1, now, |s| {
                s.status = CursorStatus::Stalled;
                s.attempts = 3;
                s.stalled_step_order = Some(1);
            })
            .unwrap();

        let state = engine.resume_customer(c.id, 1).unwrap();
        assert_eq!(state.status, CursorStatus::Active);
        assert_eq!(state.attempts, 0);
        assert!(state.stalled_step_order.is_none());
    }

    #[tokio::test]
    async fn test_fail_campaign_records_error() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x", "customer_ids": [1]}));
        engine.add_step(c.id, email_step(1)).unwrap();

        // DRAFT cannot fail.
        assert!(engine.fail_campaign(c.id, "boom").is_err());

        engine.start_campaign(c.id).await.unwrap();
        let failed = engine.fail_campaign(c.id, "boom").unwrap();
        assert_eq!(failed.status, CampaignStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_delete_cascades() {
        let (engine, _) = engine();
        let c = campaign(&engine, json!({"name": "x"}));
        engine.add_step(c.id, email_step(1)).unwrap();
        engine.delete_campaign(c.id).unwrap();
        assert!(matches!(
            engine.list_steps(c.id).unwrap_err(),
            CampaignError::NotFound { .. }
        ));
    }
}
