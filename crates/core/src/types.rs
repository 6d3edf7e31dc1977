use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CampaignError;

pub type CampaignId = i64;
pub type StepId = i64;
pub type CustomerId = i64;
pub type ExecutionId = i64;
pub type TemplateId = i64;
pub type GroupId = i64;

// ─── Channels ───────────────────────────────────────────────────────────

/// Outbound messaging channel a step is delivered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Channel {
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "WHATSAPP")]
    WhatsApp,
    #[serde(rename = "SMS")]
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "EMAIL",
            Channel::WhatsApp => "WHATSAPP",
            Channel::Sms => "SMS",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => Ok(Channel::Email),
            "WHATSAPP" => Ok(Channel::WhatsApp),
            "SMS" => Ok(Channel::Sms),
            other => Err(CampaignError::validation(format!("invalid channel '{other}'"))),
        }
    }
}

impl TryFrom<String> for Channel {
    type Error = CampaignError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ─── Customers ──────────────────────────────────────────────────────────

/// A customer as seen through the external customer directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub mobile: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub has_marketed: bool,
    pub last_email_status: Option<String>,
    pub last_whatsapp_status: Option<String>,
    pub last_sms_status: Option<String>,
}

impl Customer {
    /// The address a message on `channel` is delivered to, if the customer has one.
    pub fn address_for(&self, channel: Channel) -> Option<&str> {
        let address = match channel {
            Channel::Email => self.email.as_deref(),
            Channel::WhatsApp => self.whatsapp.as_deref(),
            Channel::Sms => self.mobile.as_deref(),
        };
        address.map(str::trim).filter(|a| !a.is_empty())
    }

    /// Variables available to `{{placeholder}}` rendering.
    pub fn render_context(&self) -> HashMap<String, String> {
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        HashMap::from([
            ("id".to_string(), self.id.to_string()),
            ("name".to_string(), text(&self.name)),
            ("email".to_string(), text(&self.email)),
            ("whatsapp".to_string(), text(&self.whatsapp)),
            ("mobile".to_string(), text(&self.mobile)),
            ("country".to_string(), text(&self.country)),
            ("country_code".to_string(), text(&self.country_code)),
            ("tags".to_string(), self.tags.join(", ")),
        ])
    }
}

// ─── Templates ──────────────────────────────────────────────────────────

/// A stored message template referenced by `template_id` on a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: TemplateId,
    pub channel: Channel,
    pub name: String,
    pub subject: Option<String>,
    pub content: String,
}

// ─── Engine Events ──────────────────────────────────────────────────────

/// Event emitted by the drip engine for downstream analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DripEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub campaign_id: CampaignId,
    pub customer_id: Option<CustomerId>,
    pub step_id: Option<StepId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CampaignScheduled,
    CampaignStarted,
    CampaignPaused,
    CampaignResumed,
    CampaignCompleted,
    CampaignStopped,
    CampaignFailed,
    CustomerEnrolled,
    StepSent,
    StepSkipped,
    StepFailed,
    CustomerStalled,
}
