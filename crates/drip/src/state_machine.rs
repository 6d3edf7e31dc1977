use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};

use crate::types::CampaignStatus;

/// Describes a single valid state transition for a campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: CampaignStatus,
    pub to: CampaignStatus,
    pub trigger: String,
}

/// Guards the campaign lifecycle by enforcing a finite set of valid
/// state transitions.
#[derive(Debug, Clone)]
pub struct CampaignStateMachine {
    pub state: CampaignStatus,
    pub transitions: Vec<StateTransition>,
}

impl CampaignStateMachine {
    /// Creates a state machine positioned at `state`.
    pub fn new(state: CampaignStatus) -> Self {
        use crate::types::CampaignStatus::*;

        let table = [
            // Draft ->
            (Draft, Scheduled, "schedule"),
            (Draft, Running, "start"),
            (Draft, Stopped, "stop"),
            (Draft, Failed, "audience_resolution_failed"),
            // Scheduled ->
            (Scheduled, Running, "promote"),
            (Scheduled, Stopped, "stop"),
            (Scheduled, Failed, "promotion_failed"),
            // Running ->
            (Running, Paused, "pause"),
            (Running, Completed, "all_customers_finished"),
            (Running, Stopped, "stop"),
            (Running, Failed, "campaign_error"),
            // Paused ->
            (Paused, Running, "resume"),
            (Paused, Stopped, "stop"),
        ];

        Self {
            state,
            transitions: table
                .into_iter()
                .map(|(from, to, trigger)| StateTransition {
                    from,
                    to,
                    trigger: trigger.to_string(),
                })
                .collect(),
        }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: &CampaignStatus, to: &CampaignStatus) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.to == *to)
    }

    /// Attempts to move the state machine to `to`.
    pub fn transition(&mut self, to: CampaignStatus) -> CampaignResult<()> {
        if self.can_transition(&self.state, &to) {
            self.state = to;
            Ok(())
        } else {
            Err(CampaignError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// One-shot check of `from -> to`.
    pub fn check(from: CampaignStatus, to: CampaignStatus) -> CampaignResult<()> {
        Self::new(from).transition(to)
    }
}

impl Default for CampaignStateMachine {
    fn default() -> Self {
        Self::new(CampaignStatus::Draft)
    }
}
