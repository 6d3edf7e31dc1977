use campaign_channels::{Interaction, InteractionKind};
use campaign_core::types::Channel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progress;
use crate::rules::{GateCondition, StepGate};
use crate::types::CampaignStep;

/// Outcome of evaluating a step gate at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// The step may be dispatched now.
    Due,
    /// Undecided; look again on a later tick.
    NotYet,
    /// The condition can no longer hold; the step is skipped.
    Never,
}

/// Evaluates step gates against a customer's interaction history.
#[derive(Debug, Clone, Default)]
pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Decide `gate` for the window `[anchor, anchor + within_days]`.
    ///
    /// `interactions` must already be scoped to the gate's channel; entries
    /// outside the window or of the wrong kind are ignored.
    pub fn evaluate(
        &self,
        gate: &StepGate,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
        interactions: &[Interaction],
    ) -> GateDecision {
        let window_end = progress::days_after(anchor, gate.within_days);
        let wanted = match gate.condition {
            GateCondition::Replied | GateCondition::NotReplied => InteractionKind::Replied,
            GateCondition::Opened | GateCondition::NotOpened => InteractionKind::Opened,
        };
        let observed = interactions
            .iter()
            .any(|i| i.kind == wanted && i.at >= anchor && i.at <= window_end);
        let window_closed = now >= window_end;

        match (gate.condition.is_positive(), observed, window_closed) {
            (true, true, _) => GateDecision::Due,
            (true, false, true) => GateDecision::Never,
            (false, true, _) => GateDecision::Never,
            (false, false, true) => GateDecision::Due,
            (_, false, false) => GateDecision::NotYet,
        }
    }

    /// The channel whose history a gate on `step` consults: the explicit
    /// `prev_channel`, else the preceding step's channel, else every channel.
    pub fn scope_channel(
        &self,
        gate: &StepGate,
        previous_step: Option<&CampaignStep>,
    ) -> Option<Channel> {
        gate.prev_channel.or(previous_step.map(|s| s.channel))
    }
}
