//! Step gates: conditions on a customer's earlier message outcomes that must
//! hold before a step fires.
//!
//! Accepted JSON shapes:
//!
//! ```json
//! {"prev_channel": "EMAIL", "reply_status": "not_replied", "within_days": 3}
//! {"opened_status": "opened", "within_days": 2}
//! {"email_not_replied_within_days": 5}
//! ```

use campaign_core::types::Channel;
use campaign_core::{CampaignError, CampaignResult};
use serde::{Deserialize, Serialize};

/// Longest gate window accepted, in days.
pub const MAX_WITHIN_DAYS: u32 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCondition {
    Replied,
    NotReplied,
    Opened,
    NotOpened,
}

impl GateCondition {
    /// Positive conditions fire on a matching event; negative ones fire on its
    /// absence once the window closes.
    pub fn is_positive(&self) -> bool {
        matches!(self, GateCondition::Replied | GateCondition::Opened)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStepGate", into = "RawStepGate")]
pub struct StepGate {
    pub condition: GateCondition,
    pub within_days: u32,
    /// Channel whose history is consulted. Defaults to the preceding step's channel.
    pub prev_channel: Option<Channel>,
}

impl StepGate {
    pub fn new(condition: GateCondition, within_days: u32) -> Self {
        Self {
            condition,
            within_days,
            prev_channel: None,
        }
    }

    pub fn on_channel(mut self, channel: Channel) -> Self {
        self.prev_channel = Some(channel);
        self
    }

    pub fn validate(&self) -> CampaignResult<()> {
        if self.within_days > MAX_WITHIN_DAYS {
            return Err(CampaignError::validation(format!(
                "within_days must be at most {MAX_WITHIN_DAYS}, got {}",
                self.within_days
            )));
        }
        Ok(())
    }
}

/// Parse a step's `filter_rules` JSON. `null` and `{}` mean "no gate".
pub fn parse_step_gate(value: &serde_json::Value) -> CampaignResult<Option<StepGate>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) if map.is_empty() => Ok(None),
        other => serde_json::from_value(other.clone())
            .map(Some)
            .map_err(|e| CampaignError::validation(format!("invalid step filter_rules: {e}"))),
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ReplyStatus {
    Replied,
    NotReplied,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OpenedStatus {
    Opened,
    NotOpened,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStepGate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prev_channel: Option<Channel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_status: Option<ReplyStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    opened_status: Option<OpenedStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    within_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email_opened_within_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email_replied_within_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    email_not_replied_within_days: Option<i64>,
}

fn days(value: i64) -> CampaignResult<u32> {
    match u32::try_from(value) {
        Ok(days) if days <= MAX_WITHIN_DAYS => Ok(days),
        _ => Err(CampaignError::validation(format!(
            "within_days must be between 0 and {MAX_WITHIN_DAYS}, got {value}"
        ))),
    }
}

impl TryFrom<RawStepGate> for StepGate {
    type Error = CampaignError;

    fn try_from(raw: RawStepGate) -> Result<Self, Self::Error> {
        let shorthand = [
            (raw.email_opened_within_days, GateCondition::Opened),
            (raw.email_replied_within_days, GateCondition::Replied),
            (raw.email_not_replied_within_days, GateCondition::NotReplied),
        ];
        let explicit = [
            raw.reply_status.map(|s| match s {
                ReplyStatus::Replied => GateCondition::Replied,
                ReplyStatus::NotReplied => GateCondition::NotReplied,
            }),
            raw.opened_status.map(|s| match s {
                OpenedStatus::Opened => GateCondition::Opened,
                OpenedStatus::NotOpened => GateCondition::NotOpened,
            }),
        ];

        let conditions = shorthand.iter().filter(|(d, _)| d.is_some()).count()
            + explicit.iter().flatten().count();
        if conditions != 1 {
            return Err(CampaignError::validation(
                "filter_rules must contain exactly one condition",
            ));
        }

        if let Some(condition) = explicit.into_iter().flatten().next() {
            let within_days = raw
                .within_days
                .ok_or_else(|| CampaignError::validation("within_days is required"))?;
            return Ok(StepGate {
                condition,
                within_days: days(within_days)?,
                prev_channel: raw.prev_channel,
            });
        }

        if raw.within_days.is_some() {
            return Err(CampaignError::validation(
                "within_days cannot be combined with an email_*_within_days key",
            ));
        }
        if raw.prev_channel.is_some_and(|c| c != Channel::Email) {
            return Err(CampaignError::validation(
                "email_*_within_days keys only apply to the EMAIL channel",
            ));
        }
        let (value, condition) = shorthand
            .into_iter()
            .find_map(|(d, c)| d.map(|d| (d, c)))
            .ok_or_else(|| CampaignError::validation("filter_rules has no condition"))?;
        Ok(StepGate {
            condition,
            within_days: days(value)?,
            prev_channel: Some(Channel::Email),
        })
    }
}

impl From<StepGate> for RawStepGate {
    fn from(gate: StepGate) -> Self {
        let mut raw = RawStepGate {
            prev_channel: gate.prev_channel,
            within_days: Some(i64::from(gate.within_days)),
            ..Default::default()
        };
        match gate.condition {
            GateCondition::Replied => raw.reply_status = Some(ReplyStatus::Replied),
            GateCondition::NotReplied => raw.reply_status = Some(ReplyStatus::NotReplied),
            GateCondition::Opened => raw.opened_status = Some(OpenedStatus::Opened),
            GateCondition::NotOpened => raw.opened_status = Some(OpenedStatus::NotOpened),
        }
        raw
    }
}
