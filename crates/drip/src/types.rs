use std::fmt;
use std::str::FromStr;

use campaign_core::types::{CampaignId, Channel, CustomerId, ExecutionId, StepId, TemplateId};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::AudienceFilter;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::rules::{parse_step_gate, StepGate};

/// Longest delay a step may carry, in days.
pub const MAX_DELAY_DAYS: u32 = 3650;

// ─── Campaigns ──────────────────────────────────────────────────────────

/// A named, multi-step outreach plan targeting a resolved customer audience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub status: CampaignStatus,
    pub run_immediately: bool,
    pub schedule_time: Option<DateTime<Utc>>,
    pub customer_ids: Vec<CustomerId>,
    pub filter_rules: Option<AudienceFilter>,
    pub created_by: Option<String>,
    /// Why the campaign moved to FAILED.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "DRAFT",
            CampaignStatus::Scheduled => "SCHEDULED",
            CampaignStatus::Running => "RUNNING",
            CampaignStatus::Paused => "PAUSED",
            CampaignStatus::Completed => "COMPLETED",
            CampaignStatus::Stopped => "STOPPED",
            CampaignStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Failed
        )
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = CampaignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(CampaignStatus::Draft),
            "SCHEDULED" => Ok(CampaignStatus::Scheduled),
            "RUNNING" => Ok(CampaignStatus::Running),
            "PAUSED" => Ok(CampaignStatus::Paused),
            "COMPLETED" => Ok(CampaignStatus::Completed),
            "STOPPED" => Ok(CampaignStatus::Stopped),
            "FAILED" => Ok(CampaignStatus::Failed),
            other => Err(CampaignError::validation(format!(
                "invalid campaign status '{other}'"
            ))),
        }
    }
}

/// Body of a campaign creation request. Campaigns are always created in DRAFT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewCampaign {
    pub name: String,
    #[serde(rename = "type", default = "default_campaign_type")]
    pub campaign_type: String,
    #[serde(default)]
    pub run_immediately: bool,
    #[serde(default, deserialize_with = "optional_datetime")]
    pub schedule_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub customer_ids: Vec<CustomerId>,
    #[serde(default, deserialize_with = "audience_filter")]
    pub filter_rules: Option<AudienceFilter>,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_campaign_type() -> String {
    "MIXED".to_string()
}

/// Partial campaign update. `name` and `created_by` are editable in any
/// state, the remaining fields only while the campaign is a DRAFT.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    pub run_immediately: Option<bool>,
    #[serde(default, deserialize_with = "patch_datetime")]
    pub schedule_time: Option<Option<DateTime<Utc>>>,
    pub customer_ids: Option<Vec<CustomerId>>,
    #[serde(default, deserialize_with = "patch_audience_filter")]
    pub filter_rules: Option<Option<AudienceFilter>>,
    pub created_by: Option<String>,
}

impl CampaignPatch {
    /// Whether the patch touches fields that are frozen once a campaign leaves DRAFT.
    pub fn is_structural(&self) -> bool {
        self.campaign_type.is_some()
            || self.run_immediately.is_some()
            || self.schedule_time.is_some()
            || self.customer_ids.is_some()
            || self.filter_rules.is_some()
    }
}

/// Aggregated counters for one campaign.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total_customers: usize,
    pub active: usize,
    pub paused: usize,
    pub stalled: usize,
    pub finished: usize,
    pub sent_count: usize,
    pub skipped_count: usize,
    pub failed_count: usize,
}

// ─── Steps ──────────────────────────────────────────────────────────────

/// One ordered unit of a campaign: a channel, a delay, an optional gate and
/// content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    pub id: StepId,
    pub campaign_id: CampaignId,
    pub order_no: i32,
    pub channel: Channel,
    pub delay_days: u32,
    pub filter_rules: Option<StepGate>,
    pub template_id: Option<TemplateId>,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub content_sid: Option<String>,
    pub content_variables: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a step delivers, checked against the content rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepContent<'a> {
    /// Stored template; `subject` overrides the template's own subject.
    Template {
        template_id: TemplateId,
        subject: Option<&'a str>,
    },
    Inline {
        subject: Option<&'a str>,
        body: &'a str,
    },
    /// WhatsApp pre-approved content template.
    ContentSid {
        content_sid: &'a str,
        variables: Option<&'a serde_json::Value>,
    },
}

impl CampaignStep {
    pub fn content(&self) -> CampaignResult<StepContent<'_>> {
        let subject = self.subject.as_deref();
        let content = self.content.as_deref();
        let content_sid = self.content_sid.as_deref();

        let provided = [self.template_id.is_some(), content.is_some(), content_sid.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if provided != 1 {
            return Err(CampaignError::validation(format!(
                "step {} must set exactly one of template_id, content, content_sid",
                self.order_no
            )));
        }

        if self.content_variables.is_some() && content_sid.is_none() {
            return Err(CampaignError::validation(
                "content_variables requires content_sid",
            ));
        }
        if let Some(variables) = &self.content_variables {
            if !variables.is_object() {
                return Err(CampaignError::validation(
                    "content_variables must be a JSON object",
                ));
            }
        }

        if let Some(sid) = content_sid {
            if self.channel != Channel::WhatsApp {
                return Err(CampaignError::validation(format!(
                    "content_sid is only valid on WHATSAPP steps, not {}",
                    self.channel
                )));
            }
            if subject.is_some() {
                return Err(CampaignError::validation(
                    "subject cannot be combined with content_sid",
                ));
            }
            return Ok(StepContent::ContentSid {
                content_sid: sid,
                variables: self.content_variables.as_ref(),
            });
        }

        match (self.template_id, content) {
            (Some(template_id), _) => Ok(StepContent::Template {
                template_id,
                subject,
            }),
            (None, Some(body)) => Ok(StepContent::Inline { subject, body }),
            (None, None) => Err(CampaignError::validation("step has no content")),
        }
    }

    /// Full write-time validation.
    pub fn validate(&self) -> CampaignResult<()> {
        if self.order_no < 1 {
            return Err(CampaignError::validation(format!(
                "order_no must be at least 1, got {}",
                self.order_no
            )));
        }
        if self.delay_days > MAX_DELAY_DAYS {
            return Err(CampaignError::validation(format!(
                "delay_days must be at most {MAX_DELAY_DAYS}, got {}",
                self.delay_days
            )));
        }
        if let Some(gate) = &self.filter_rules {
            gate.validate()?;
        }
        self.content().map(|_| ())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewStep {
    pub order_no: i32,
    pub channel: Channel,
    #[serde(default)]
    pub delay_days: u32,
    #[serde(default, deserialize_with = "step_gate")]
    pub filter_rules: Option<StepGate>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub content_sid: Option<String>,
    #[serde(default)]
    pub content_variables: Option<serde_json::Value>,
}

impl NewStep {
    pub fn into_step(
        self,
        id: StepId,
        campaign_id: CampaignId,
        now: DateTime<Utc>,
    ) -> CampaignStep {
        CampaignStep {
            id,
            campaign_id,
            order_no: self.order_no,
            channel: self.channel,
            delay_days: self.delay_days,
            filter_rules: self.filter_rules,
            template_id: self.template_id,
            subject: non_blank(self.subject),
            content: non_blank(self.content),
            content_sid: non_blank(self.content_sid),
            content_variables: self.content_variables.filter(|v| !v.is_null()),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial step update. Nullable fields distinguish "absent" (`None`) from
/// "set to null" (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepPatch {
    pub order_no: Option<i32>,
    pub channel: Option<Channel>,
    pub delay_days: Option<u32>,
    #[serde(default, deserialize_with = "patch_step_gate")]
    pub filter_rules: Option<Option<StepGate>>,
    #[serde(default, deserialize_with = "double_option")]
    pub template_id: Option<Option<TemplateId>>,
    #[serde(default, deserialize_with = "double_option")]
    pub subject: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub content: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub content_sid: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub content_variables: Option<Option<serde_json::Value>>,
}

impl StepPatch {
    pub fn apply(self, step: &mut CampaignStep, now: DateTime<Utc>) {
        if let Some(order_no) = self.order_no {
            step.order_no = order_no;
        }
        if let Some(channel) = self.channel {
            step.channel = channel;
        }
        if let Some(delay_days) = self.delay_days {
            step.delay_days = delay_days;
        }
        if let Some(gate) = self.filter_rules {
            step.filter_rules = gate;
        }
        if let Some(template_id) = self.template_id {
            step.template_id = template_id;
        }
        if let Some(subject) = self.subject {
            step.subject = non_blank(subject);
        }
        if let Some(content) = self.content {
            step.content = non_blank(content);
        }
        if let Some(content_sid) = self.content_sid {
            step.content_sid = non_blank(content_sid);
        }
        if let Some(variables) = self.content_variables {
            step.content_variables = variables.filter(|v| !v.is_null());
        }
        step.updated_at = now;
    }
}

// ─── Customer Cursors ───────────────────────────────────────────────────

/// Where a customer's cursor stands within a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    /// Eligible for the next step.
    Active,
    /// Retry budget exhausted on `stalled_step_order`; waits for a manual resume.
    Stalled,
    /// Every step reached a terminal outcome.
    Finished,
}

/// Per-customer progress cursor within one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerCampaignState {
    pub campaign_id: CampaignId,
    pub customer_id: CustomerId,
    /// Order of the last step with a terminal outcome; 0 before the first.
    pub last_step_order: i32,
    pub paused: bool,
    pub status: CursorStatus,
    pub stalled_step_order: Option<i32>,
    /// Failed attempts on the current step.
    pub attempts: u32,
    pub last_message_status: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl CustomerCampaignState {
    pub fn enrolled(campaign_id: CampaignId, customer_id: CustomerId, now: DateTime<Utc>) -> Self {
        Self {
            campaign_id,
            customer_id,
            last_step_order: 0,
            paused: false,
            status: CursorStatus::Active,
            stalled_step_order: None,
            attempts: 0,
            last_message_status: None,
            last_message_at: None,
            enrolled_at: now,
            last_completed_at: None,
            updated_at: now,
            version: 0,
        }
    }

    pub fn is_runnable(&self) -> bool {
        !self.paused && self.status == CursorStatus::Active
    }
}

// ─── Executions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Sent,
    Skipped,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Sent => "sent",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// Append-only audit record of one outcome for one (step, customer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignExecution {
    pub id: ExecutionId,
    pub campaign_id: CampaignId,
    pub step_id: StepId,
    pub customer_id: CustomerId,
    pub channel: Channel,
    pub status: ExecutionStatus,
    pub attempt: u32,
    pub idempotency_key: Option<String>,
    pub message_id: Option<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Execution fields supplied by the writer; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub step_id: StepId,
    pub channel: Channel,
    pub status: ExecutionStatus,
    pub attempt: u32,
    pub idempotency_key: Option<String>,
    pub message_id: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutionQuery {
    pub step_id: Option<StepId>,
    pub customer_id: Option<CustomerId>,
    pub status: Option<ExecutionStatus>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ExecutionQuery {
    pub const DEFAULT_LIMIT: usize = 100;
    pub const MAX_LIMIT: usize = 1000;

    pub fn matches(&self, execution: &CampaignExecution) -> bool {
        self.step_id.map_or(true, |id| execution.step_id == id)
            && self.customer_id.map_or(true, |id| execution.customer_id == id)
            && self.status.map_or(true, |s| execution.status == s)
    }

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Manual execution row, for maintenance only.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewExecution {
    pub step_id: StepId,
    pub customer_id: CustomerId,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub attempt: Option<u32>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionPatch {
    pub status: Option<ExecutionStatus>,
    #[serde(default, deserialize_with = "double_option")]
    pub message_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub note: Option<Option<String>>,
}

// ─── Serde helpers ──────────────────────────────────────────────────────

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn step_gate<'de, D>(deserializer: D) -> Result<Option<StepGate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) => parse_step_gate(&value).map_err(D::Error::custom),
    }
}

fn patch_step_gate<'de, D>(deserializer: D) -> Result<Option<Option<StepGate>>, D::Error>
where
    D: Deserializer<'de>,
{
    step_gate(deserializer).map(Some)
}

fn audience_filter<'de, D>(deserializer: D) -> Result<Option<AudienceFilter>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(value) => AudienceFilter::from_value(&value).map_err(D::Error::custom),
    }
}

fn patch_audience_filter<'de, D>(
    deserializer: D,
) -> Result<Option<Option<AudienceFilter>>, D::Error>
where
    D: Deserializer<'de>,
{
    audience_filter(deserializer).map(Some)
}

/// RFC 3339, or a naive `YYYY-MM-DDTHH:MM[:SS]` read as UTC (the console's
/// `datetime-local` input).
pub fn parse_datetime(value: &str) -> CampaignResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| CampaignError::validation(format!("invalid datetime '{value}'")))
}

fn optional_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_datetime(&s).map(Some).map_err(D::Error::custom),
    }
}

fn patch_datetime<'de, D>(deserializer: D) -> Result<Option<Option<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    optional_datetime(deserializer).map(Some)
}
