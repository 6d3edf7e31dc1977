//! Campaign, step, cursor and execution storage.
//!
//! In-memory concurrent maps. Production: replace with PostgreSQL, keeping
//! the cursor commit (version check + execution insert) in one transaction.
//!
//! Lock order is campaigns → steps → states → executions; no method takes a
//! guard on an earlier map while holding one on a later map.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};

use campaign_core::types::{CampaignId, CustomerId, ExecutionId, StepId};
use campaign_core::{CampaignError, CampaignResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::progress::CursorTransition;
use crate::types::{
    Campaign, CampaignExecution, CampaignStats, CampaignStatus, CampaignStep, CursorStatus,
    CustomerCampaignState, ExecutionPatch, ExecutionQuery, ExecutionRecord, ExecutionStatus,
    NewCampaign, NewExecution, NewStep, StepPatch,
};

#[derive(Default)]
pub struct CampaignStore {
    campaigns: DashMap<CampaignId, Campaign>,
    /// Sorted by `order_no`.
    steps: DashMap<CampaignId, Vec<CampaignStep>>,
    states: DashMap<(CampaignId, CustomerId), CustomerCampaignState>,
    executions: DashMap<CampaignId, Vec<CampaignExecution>>,
    campaign_seq: AtomicI64,
    step_seq: AtomicI64,
    execution_seq: AtomicI64,
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

fn state_not_found(campaign_id: CampaignId, customer_id: CustomerId) -> CampaignError {
    CampaignError::not_found("customer", format!("{customer_id} (campaign {campaign_id})"))
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Campaigns ──────────────────────────────────────────────────────

    pub fn insert_campaign(&self, new: NewCampaign, now: DateTime<Utc>) -> Campaign {
        let campaign = Campaign {
            id: next_id(&self.campaign_seq),
            name: new.name,
            campaign_type: new.campaign_type,
            status: CampaignStatus::Draft,
            run_immediately: new.run_immediately,
            schedule_time: new.schedule_time,
            customer_ids: new.customer_ids,
            filter_rules: new.filter_rules,
            created_by: new.created_by,
            error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };
        self.campaigns.insert(campaign.id, campaign.clone());
        campaign
    }

    pub fn get_campaign(&self, id: CampaignId) -> CampaignResult<Campaign> {
        self.campaigns
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| CampaignError::not_found("campaign", id))
    }

    pub fn campaign_status(&self, id: CampaignId) -> CampaignResult<CampaignStatus> {
        self.campaigns
            .get(&id)
            .map(|c| c.status)
            .ok_or_else(|| CampaignError::not_found("campaign", id))
    }

    /// Newest first.
    pub fn list_campaigns(&self, status: Option<CampaignStatus>) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self
            .campaigns
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .map(|c| c.clone())
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        campaigns
    }

    /// Apply `f` under the campaign's entry lock. Nothing is written when `f`
    /// fails. `f` must not call back into the campaign map.
    pub fn update_campaign<F>(&self, id: CampaignId, f: F) -> CampaignResult<Campaign>
    where
        F: FnOnce(&mut Campaign) -> CampaignResult<()>,
    {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or_else(|| CampaignError::not_found("campaign", id))?;
        let mut draft = entry.clone();
        f(&mut draft)?;
        *entry = draft.clone();
        Ok(draft)
    }

    /// Removes the campaign with its steps, cursors and executions.
    pub fn delete_campaign(&self, id: CampaignId) -> CampaignResult<()> {
        self.campaigns
            .remove(&id)
            .ok_or_else(|| CampaignError::not_found("campaign", id))?;
        self.steps.remove(&id);
        self.states.retain(|(campaign_id, _), _| *campaign_id != id);
        self.executions.remove(&id);
        Ok(())
    }

    // ─── Steps ──────────────────────────────────────────────────────────

    pub fn list_steps(&self, campaign_id: CampaignId) -> Vec<CampaignStep> {
        self.steps
            .get(&campaign_id)
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn get_step(
        &self,
        campaign_id: CampaignId,
        step_id: StepId,
    ) -> CampaignResult<CampaignStep> {
        self.steps
            .get(&campaign_id)
            .and_then(|steps| steps.iter().find(|s| s.id == step_id).cloned())
            .ok_or_else(|| CampaignError::not_found("step", step_id))
    }

    /// Run `f` over the campaign's steps while holding the campaign's read
    /// lock, failing unless the campaign is a DRAFT. All-or-nothing.
    fn with_draft_steps<T, F>(&self, campaign_id: CampaignId, f: F) -> CampaignResult<T>
    where
        F: FnOnce(&mut Vec<CampaignStep>) -> CampaignResult<T>,
    {
        let campaign = self
            .campaigns
            .get(&campaign_id)
            .ok_or_else(|| CampaignError::not_found("campaign", campaign_id))?;
        if campaign.status != CampaignStatus::Draft {
            return Err(CampaignError::InvalidState(format!(
                "campaign {campaign_id} is {}; steps can only be changed while DRAFT",
                campaign.status
            )));
        }

        let mut steps = self.steps.entry(campaign_id).or_default();
        let mut draft = steps.clone();
        let out = f(&mut draft)?;
        draft.sort_by_key(|s| s.order_no);
        *steps = draft;
        Ok(out)
    }

    /// Insert a batch of steps. Either every step is stored or none is.
    pub fn insert_steps(
        &self,
        campaign_id: CampaignId,
        new_steps: Vec<NewStep>,
        now: DateTime<Utc>,
    ) -> CampaignResult<Vec<CampaignStep>> {
        if new_steps.is_empty() {
            return Err(CampaignError::validation("no steps supplied"));
        }
        self.with_draft_steps(campaign_id, |steps| {
            let mut orders: HashSet<i32> = steps.iter().map(|s| s.order_no).collect();
            let mut candidates = Vec::with_capacity(new_steps.len());
            for new in new_steps {
                let step = new.into_step(0, campaign_id, now);
                step.validate()?;
                if !orders.insert(step.order_no) {
                    return Err(CampaignError::Conflict(format!(
                        "order_no {} already exists in campaign {campaign_id}",
                        step.order_no
                    )));
                }
                candidates.push(step);
            }
            for step in candidates.iter_mut() {
                step.id = next_id(&self.step_seq);
            }
            steps.extend(candidates.iter().cloned());
            Ok(candidates)
        })
    }

    pub fn update_step(
        &self,
        campaign_id: CampaignId,
        step_id: StepId,
        patch: StepPatch,
        now: DateTime<Utc>,
    ) -> CampaignResult<CampaignStep> {
        self.with_draft_steps(campaign_id, |steps| {
            let index = steps
                .iter()
                .position(|s| s.id == step_id)
                .ok_or_else(|| CampaignError::not_found("step", step_id))?;
            let mut step = steps[index].clone();
            patch.apply(&mut step, now);
            step.validate()?;
            if steps
                .iter()
                .any(|s| s.id != step_id && s.order_no == step.order_no)
            {
                return Err(CampaignError::Conflict(format!(
                    "order_no {} already exists in campaign {campaign_id}",
                    step.order_no
                )));
            }
            steps[index] = step.clone();
            Ok(step)
        })
    }

    /// Execution rows of a deleted step are kept.
    pub fn delete_step(&self, campaign_id: CampaignId, step_id: StepId) -> CampaignResult<()> {
        self.with_draft_steps(campaign_id, |steps| {
            let before = steps.len();
            steps.retain(|s| s.id != step_id);
            if steps.len() == before {
                return Err(CampaignError::not_found("step", step_id));
            }
            Ok(())
        })
    }

    // ─── Cursors ────────────────────────────────────────────────────────

    /// Create cursors for customers not yet enrolled. Returns the new ones.
    pub fn enroll(
        &self,
        campaign_id: CampaignId,
        customers: &[CustomerId],
        now: DateTime<Utc>,
    ) -> Vec<CustomerId> {
        let mut enrolled = Vec::new();
        for &customer_id in customers {
            self.states
                .entry((campaign_id, customer_id))
                .or_insert_with(|| {
                    enrolled.push(customer_id);
                    CustomerCampaignState::enrolled(campaign_id, customer_id, now)
                });
        }
        enrolled
    }

    pub fn get_state(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
    ) -> CampaignResult<CustomerCampaignState> {
        self.states
            .get(&(campaign_id, customer_id))
            .map(|s| s.clone())
            .ok_or_else(|| state_not_found(campaign_id, customer_id))
    }

    /// Ascending by customer id.
    pub fn list_states(&self, campaign_id: CampaignId) -> Vec<CustomerCampaignState> {
        let mut states: Vec<CustomerCampaignState> = self
            .states
            .iter()
            .filter(|s| s.campaign_id == campaign_id)
            .map(|s| s.clone())
            .collect();
        states.sort_by_key(|s| s.customer_id);
        states
    }

    /// Cursors the scheduler should look at: active and not paused.
    pub fn runnable_states(&self, campaign_id: CampaignId) -> Vec<CustomerCampaignState> {
        let mut states = self.list_states(campaign_id);
        states.retain(|s| s.is_runnable());
        states
    }

    /// Out-of-band cursor edit (pause, resume). Bumps the version so an
    /// in-flight dispatch re-reads before committing.
    pub fn update_state<F>(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
        now: DateTime<Utc>,
        f: F,
    ) -> CampaignResult<CustomerCampaignState>
    where
        F: FnOnce(&mut CustomerCampaignState),
    {
        let mut state = self
            .states
            .get_mut(&(campaign_id, customer_id))
            .ok_or_else(|| state_not_found(campaign_id, customer_id))?;
        f(&mut *state);
        state.version += 1;
        state.updated_at = now;
        Ok(state.clone())
    }

    /// Apply a step outcome to a cursor and append its execution row as one
    /// atomic write. Fails with `Consistency` when the cursor's version is no
    /// longer `expected_version`.
    #[allow(clippy::too_many_arguments)]
    pub fn commit(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
        expected_version: u64,
        now: DateTime<Utc>,
        transition: CursorTransition,
        message_status: Option<&str>,
        record: Option<ExecutionRecord>,
    ) -> CampaignResult<(CustomerCampaignState, Option<CampaignExecution>)> {
        let mut state = self
            .states
            .get_mut(&(campaign_id, customer_id))
            .ok_or_else(|| state_not_found(campaign_id, customer_id))?;
        if state.version != expected_version {
            return Err(CampaignError::Consistency(format!(
                "cursor {campaign_id}/{customer_id} is at version {}, expected {expected_version}",
                state.version
            )));
        }

        if transition != CursorTransition::Hold {
            transition.apply(&mut *state, now, message_status);
            state.version += 1;
            state.updated_at = now;
        }
        let execution = record.map(|r| self.append_execution(campaign_id, customer_id, r, now));
        Ok((state.clone(), execution))
    }

    // ─── Executions ─────────────────────────────────────────────────────

    fn append_execution(
        &self,
        campaign_id: CampaignId,
        customer_id: CustomerId,
        record: ExecutionRecord,
        now: DateTime<Utc>,
    ) -> CampaignExecution {
        let execution = CampaignExecution {
            id: next_id(&self.execution_seq),
            campaign_id,
            step_id: record.step_id,
            customer_id,
            channel: record.channel,
            status: record.status,
            attempt: record.attempt,
            idempotency_key: record.idempotency_key,
            message_id: record.message_id,
            note: record.note,
            created_at: now,
            updated_at: now,
        };
        self.executions
            .entry(campaign_id)
            .or_default()
            .push(execution.clone());
        execution
    }

    /// The `sent` row for (step, customer), if one exists.
    pub fn find_sent(
        &self,
        campaign_id: CampaignId,
        step_id: StepId,
        customer_id: CustomerId,
    ) -> Option<CampaignExecution> {
        self.executions.get(&campaign_id).and_then(|rows| {
            rows.iter()
                .find(|e| {
                    e.step_id == step_id
                        && e.customer_id == customer_id
                        && e.status == ExecutionStatus::Sent
                })
                .cloned()
        })
    }

    /// Newest first, paged.
    pub fn list_executions(
        &self,
        campaign_id: CampaignId,
        query: &ExecutionQuery,
    ) -> Vec<CampaignExecution> {
        let Some(rows) = self.executions.get(&campaign_id) else {
            return Vec::new();
        };
        rows.iter()
            .rev()
            .filter(|e| query.matches(e))
            .skip(query.offset())
            .take(query.limit())
            .cloned()
            .collect()
    }

    pub fn all_executions(&self, campaign_id: CampaignId) -> Vec<CampaignExecution> {
        self.executions
            .get(&campaign_id)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    /// Manual correction row. Does not touch the customer's cursor.
    pub fn insert_manual_execution(
        &self,
        campaign_id: CampaignId,
        new: NewExecution,
        now: DateTime<Utc>,
    ) -> CampaignResult<CampaignExecution> {
        self.get_campaign(campaign_id)?;
        let step = self.get_step(campaign_id, new.step_id)?;
        let record = ExecutionRecord {
            step_id: step.id,
            channel: new.channel.unwrap_or(step.channel),
            status: new.status,
            attempt: new.attempt.unwrap_or(1),
            idempotency_key: None,
            message_id: new.message_id,
            note: new.note,
        };
        Ok(self.append_execution(campaign_id, new.customer_id, record, now))
    }

    pub fn update_execution(
        &self,
        campaign_id: CampaignId,
        execution_id: ExecutionId,
        patch: ExecutionPatch,
        now: DateTime<Utc>,
    ) -> CampaignResult<CampaignExecution> {
        let mut rows = self
            .executions
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::not_found("execution", execution_id))?;
        let row = rows
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| CampaignError::not_found("execution", execution_id))?;
        if let Some(status) = patch.status {
            row.status = status;
        }
        if let Some(message_id) = patch.message_id {
            row.message_id = message_id;
        }
        if let Some(note) = patch.note {
            row.note = note;
        }
        row.updated_at = now;
        Ok(row.clone())
    }

    pub fn delete_execution(
        &self,
        campaign_id: CampaignId,
        execution_id: ExecutionId,
    ) -> CampaignResult<()> {
        let mut rows = self
            .executions
            .get_mut(&campaign_id)
            .ok_or_else(|| CampaignError::not_found("execution", execution_id))?;
        let before = rows.len();
        rows.retain(|e| e.id != execution_id);
        if rows.len() == before {
            return Err(CampaignError::not_found("execution", execution_id));
        }
        Ok(())
    }

    // ─── Stats ──────────────────────────────────────────────────────────

    pub fn stats(&self, campaign_id: CampaignId) -> CampaignStats {
        let mut stats = CampaignStats::default();
        for state in self.list_states(campaign_id) {
            stats.total_customers += 1;
            match (state.status, state.paused) {
                (CursorStatus::Finished, _) => stats.finished += 1,
                (_, true) => stats.paused += 1,
                (CursorStatus::Stalled, false) => stats.stalled += 1,
                (CursorStatus::Active, false) => stats.active += 1,
            }
        }
        if let Some(rows) = self.executions.get(&campaign_id) {
            for row in rows.iter() {
                match row.status {
                    ExecutionStatus::Sent => stats.sent_count += 1,
                    ExecutionStatus::Skipped => stats.skipped_count += 1,
                    ExecutionStatus::Failed => stats.failed_count += 1,
                }
            }
        }
        stats
    }
}
