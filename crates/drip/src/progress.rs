//! Cursor arithmetic over a campaign's ordered
//! steps, and the transitions a step outcome applies to a cursor.

use campaign_core::config::{DelayPolicy, SchedulerConfig};
use campaign_core::types::{Channel, StepId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    CampaignExecution, CampaignStep, CursorStatus, CustomerCampaignState, ExecutionStatus,
};

/// First step after `last_step_order`. `steps` must be sorted by `order_no`.
pub fn next_step(steps: &[CampaignStep], last_step_order: i32) -> Option<&CampaignStep> {
    steps.iter().find(|s| s.order_no > last_step_order)
}

/// Step immediately preceding `order_no`, if any.
pub fn previous_step(steps: &[CampaignStep], order_no: i32) -> Option<&CampaignStep> {
    steps.iter().rev().find(|s| s.order_no < order_no)
}

pub fn is_last(steps: &[CampaignStep], step: &CampaignStep) -> bool {
    next_step(steps, step.order_no).is_none()
}

/// Start of a gate's observation window: when the cursor last advanced, or
/// enrollment for the first step.
pub fn gate_anchor(state: &CustomerCampaignState) -> DateTime<Utc> {
    state.last_completed_at.unwrap_or(state.enrolled_at)
}

/// Earliest instant `step` may fire for this cursor.
pub fn due_at(
    policy: DelayPolicy,
    state: &CustomerCampaignState,
    step: &CampaignStep,
) -> DateTime<Utc> {
    let base = match policy {
        DelayPolicy::FromPreviousStep => gate_anchor(state),
        DelayPolicy::FromEnrollment => state.enrolled_at,
    };
    days_after(base, step.delay_days)
}

/// `base + days`, saturating at the latest representable instant so an
/// out-of-range offset reads as "never".
pub fn days_after(base: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    base.checked_add_signed(Duration::days(i64::from(days)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Change a step outcome applies to a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorTransition {
    /// The step reached a terminal outcome; move past it.
    Advance { order_no: i32, finished: bool },
    /// Transient failure with retry budget left; stay on the step.
    Retry { attempts: u32 },
    /// Retry budget exhausted; wait for a manual resume.
    Stall { order_no: i32, attempts: u32 },
    /// Audit-only write.
    Hold,
}

impl CursorTransition {
    pub fn advance_past(steps: &[CampaignStep], step: &CampaignStep) -> Self {
        CursorTransition::Advance {
            order_no: step.order_no,
            finished: is_last(steps, step),
        }
    }

    /// Transition for a failed attempt on `step`.
    pub fn after_failure(
        state: &CustomerCampaignState,
        steps: &[CampaignStep],
        step: &CampaignStep,
        transient: bool,
        config: &SchedulerConfig,
    ) -> Self {
        let attempts = state.attempts + 1;
        let exhausted = !transient || attempts >= config.max_attempts;
        if !exhausted {
            CursorTransition::Retry { attempts }
        } else if config.skip_forward_on_failure {
            Self::advance_past(steps, step)
        } else {
            CursorTransition::Stall {
                order_no: step.order_no,
                attempts,
            }
        }
    }

    pub fn apply(
        &self,
        state: &mut CustomerCampaignState,
        now: DateTime<Utc>,
        message_status: Option<&str>,
    ) {
        match *self {
            CursorTransition::Advance { order_no, finished } => {
                state.last_step_order = order_no;
                state.attempts = 0;
                state.stalled_step_order = None;
                state.last_completed_at = Some(now);
                state.status = if finished {
                    CursorStatus::Finished
                } else {
                    CursorStatus::Active
                };
            }
            CursorTransition::Retry { attempts } => {
                state.attempts = attempts;
            }
            CursorTransition::Stall { order_no, attempts } => {
                state.attempts = attempts;
                state.status = CursorStatus::Stalled;
                state.stalled_step_order = Some(order_no);
            }
            CursorTransition::Hold => return,
        }
        if let Some(status) = message_status {
            state.last_message_status = Some(status.to_string());
            state.last_message_at = Some(now);
        }
    }
}

// ─── Progress view ──────────────────────────────────────────────────────

/// Per-step position of one customer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepProgress {
    Pending,
    Due,
    Sent,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepProgressEntry {
    pub step_id: StepId,
    pub order_no: i32,
    pub channel: Channel,
    pub status: StepProgress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProgress {
    #[serde(flatten)]
    pub state: CustomerCampaignState,
    pub next_step_order: Option<i32>,
    pub next_due_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepProgressEntry>,
}

/// Build the progress view of one cursor. `executions` are that customer's
/// rows in this campaign, in any order.
pub fn describe(
    state: &CustomerCampaignState,
    steps: &[CampaignStep],
    executions: &[CampaignExecution],
    policy: DelayPolicy,
    now: DateTime<Utc>,
) -> CustomerProgress {
    let next = match state.status {
        CursorStatus::Finished => None,
        _ => next_step(steps, state.last_step_order),
    };

    let entries = steps
        .iter()
        .map(|step| {
            let status = if step.order_no <= state.last_step_order {
                passed_status(step.id, executions)
            } else if next.is_some_and(|n| n.id == step.id) {
                if state.status == CursorStatus::Stalled {
                    StepProgress::Failed
                } else if now >= due_at(policy, state, step) {
                    StepProgress::Due
                } else {
                    StepProgress::Pending
                }
            } else {
                StepProgress::Pending
            };
            StepProgressEntry {
                step_id: step.id,
                order_no: step.order_no,
                channel: step.channel,
                status,
            }
        })
        .collect();

    CustomerProgress {
        state: state.clone(),
        next_step_order: next.map(|s| s.order_no),
        next_due_at: next.map(|s| due_at(policy, state, s)),
        steps: entries,
    }
}

fn passed_status(step_id: StepId, executions: &[CampaignExecution]) -> StepProgress {
    let rows = executions.iter().filter(|e| e.step_id == step_id);
    let mut latest: Option<&CampaignExecution> = None;
    for row in rows {
        if row.status == ExecutionStatus::Sent {
            return StepProgress::Sent;
        }
        if latest.map_or(true, |l| row.id > l.id) {
            latest = Some(row);
        }
    }
    match latest.map(|e| e.status) {
        Some(ExecutionStatus::Failed) => StepProgress::Failed,
        // Passed with no audit row left (e.g. manually deleted).
        Some(ExecutionStatus::Skipped) | Some(ExecutionStatus::Sent) | None => {
            StepProgress::Skipped
        }
    }
}
