//! Turns a due step into one send attempt and records its
//! outcome together with the cursor update.

use std::sync::Arc;
use std::time::{Duration, Instant};

use campaign_channels::{ChannelRouter, OutboundMessage, SendError, SendReceipt, TemplateStore};
use campaign_core::config::SchedulerConfig;
use campaign_core::event_bus::{make_event, EventSink};
use campaign_core::templates::TemplateRenderer;
use campaign_core::types::{CampaignId, CustomerId, EventType, StepId};
use campaign_core::{CampaignError, CampaignResult};
use campaign_segmentation::CustomerDirectory;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::progress::CursorTransition;
use crate::store::CampaignStore;
use crate::types::{
    CampaignStatus, CampaignStep, CustomerCampaignState, ExecutionRecord, ExecutionStatus,
    StepContent,
};

/// What a dispatch did to one customer's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Attempt failed; the cursor either waits for a retry or moved past the step.
    Failed,
    /// Attempt failed and exhausted the retry budget.
    Stalled,
    /// A `sent` row already existed; the cursor was advanced without sending.
    Repaired,
    /// The campaign is no longer running; nothing was sent.
    Halted,
}

/// Hex SHA-256 of `campaign:step:customer:attempt`.
pub fn idempotency_key(
    campaign_id: CampaignId,
    step_id: StepId,
    customer_id: CustomerId,
    attempt: u32,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{campaign_id}:{step_id}:{customer_id}:{attempt}"));
    hex::encode(hasher.finalize())
}

pub struct Dispatcher {
    pub(crate) store: Arc<CampaignStore>,
    pub(crate) router: Arc<ChannelRouter>,
    pub(crate) templates: Arc<dyn TemplateStore>,
    pub(crate) directory: Arc<dyn CustomerDirectory>,
    pub(crate) renderer: TemplateRenderer,
    pub(crate) config: SchedulerConfig,
    pub(crate) event_sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<CampaignStore>,
        router: Arc<ChannelRouter>,
        templates: Arc<dyn TemplateStore>,
        directory: Arc<dyn CustomerDirectory>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            router,
            templates,
            directory,
            renderer: TemplateRenderer::new(),
            config,
            event_sink: campaign_core::event_bus::tracing_sink(),
        }
    }

    /// Send `step` to the cursor's customer and commit the outcome.
    pub async fn dispatch(
        &self,
        campaign_id: CampaignId,
        step: &CampaignStep,
        steps: &[CampaignStep],
        cursor: &CustomerCampaignState,
        now: DateTime<Utc>,
    ) -> CampaignResult<DispatchOutcome> {
        let customer_id = cursor.customer_id;

        let status = self.store.campaign_status(campaign_id)?;
        if status != CampaignStatus::Running {
            debug!(campaign_id, %status, "Campaign no longer running, dispatch dropped");
            return Ok(DispatchOutcome::Halted);
        }

        if self.store.find_sent(campaign_id, step.id, customer_id).is_some() {
            warn!(
                campaign_id,
                step_id = step.id,
                customer_id,
                "Step already sent, advancing cursor without resending"
            );
            let transition = CursorTransition::advance_past(steps, step);
            self.commit_outcome(campaign_id, cursor, step, now, transition, None, None)?;
            return Ok(DispatchOutcome::Repaired);
        }

        let attempt = cursor.attempts + 1;
        let key = idempotency_key(campaign_id, step.id, customer_id, attempt);
        let started = Instant::now();
        let result = match self.prepare(campaign_id, step, customer_id, &key).await {
            Ok(message) => self.send(&message).await,
            Err(err) => Err(err),
        };
        metrics::histogram!("drip.dispatch.latency_ms", "channel" => step.channel.as_str())
            .record(started.elapsed().as_millis() as f64);

        match result {
            Ok(receipt) => {
                let record = ExecutionRecord {
                    step_id: step.id,
                    channel: step.channel,
                    status: ExecutionStatus::Sent,
                    attempt,
                    idempotency_key: Some(key),
                    message_id: Some(receipt.message_id.clone()),
                    note: None,
                };
                let transition = CursorTransition::advance_past(steps, step);
                self.commit_outcome(
                    campaign_id,
                    cursor,
                    step,
                    now,
                    transition,
                    Some(&receipt.status),
                    Some(record),
                )?;

                debug!(
                    campaign_id,
                    step_id = step.id,
                    customer_id,
                    channel = %step.channel,
                    message_id = %receipt.message_id,
                    "Step sent"
                );
                metrics::counter!("drip.executions", "status" => "sent").increment(1);
                self.event_sink.emit(make_event(
                    EventType::StepSent,
                    campaign_id,
                    Some(customer_id),
                    Some(step.id),
                ));
                Ok(DispatchOutcome::Sent)
            }
            Err(err) => {
                let transition = CursorTransition::after_failure(
                    cursor,
                    steps,
                    step,
                    err.is_transient(),
                    &self.config,
                );
                let record = ExecutionRecord {
                    step_id: step.id,
                    channel: step.channel,
                    status: ExecutionStatus::Failed,
                    attempt,
                    idempotency_key: Some(key),
                    message_id: None,
                    note: Some(err.to_string()),
                };
                self.commit_outcome(
                    campaign_id,
                    cursor,
                    step,
                    now,
                    transition,
                    Some("failed"),
                    Some(record),
                )?;

                warn!(
                    campaign_id,
                    step_id = step.id,
                    customer_id,
                    attempt,
                    error = %err,
                    "Step dispatch failed"
                );
                metrics::counter!("drip.executions", "status" => "failed").increment(1);
                self.event_sink.emit(make_event(
                    EventType::StepFailed,
                    campaign_id,
                    Some(customer_id),
                    Some(step.id),
                ));

                if let CursorTransition::Stall { .. } = transition {
                    self.event_sink.emit(make_event(
                        EventType::CustomerStalled,
                        campaign_id,
                        Some(customer_id),
                        Some(step.id),
                    ));
                    return Ok(DispatchOutcome::Stalled);
                }
                Ok(DispatchOutcome::Failed)
            }
        }
    }

    /// Record `step` as skipped for the cursor's customer and move past it.
    pub fn skip(
        &self,
        campaign_id: CampaignId,
        step: &CampaignStep,
        steps: &[CampaignStep],
        cursor: &CustomerCampaignState,
        now: DateTime<Utc>,
    ) -> CampaignResult<CustomerCampaignState> {
        let record = ExecutionRecord {
            step_id: step.id,
            channel: step.channel,
            status: ExecutionStatus::Skipped,
            attempt: cursor.attempts + 1,
            idempotency_key: None,
            message_id: None,
            note: Some("gate condition can no longer be met".to_string()),
        };
        let transition = CursorTransition::advance_past(steps, step);
        let state =
            self.commit_outcome(campaign_id, cursor, step, now, transition, None, Some(record))?;

        debug!(campaign_id, step_id = step.id, customer_id = cursor.customer_id, "Step skipped");
        metrics::counter!("drip.executions", "status" => "skipped").increment(1);
        self.event_sink.emit(make_event(
            EventType::StepSkipped,
            campaign_id,
            Some(cursor.customer_id),
            Some(step.id),
        ));
        Ok(state)
    }

    /// Commit under the cursor's version, re-reading and re-applying when a
    /// concurrent write (pause, resume) bumped it. A cursor that already moved
    /// past `step` only gets the execution row.
    #[allow(clippy::too_many_arguments)]
    fn commit_outcome(
        &self,
        campaign_id: CampaignId,
        cursor: &CustomerCampaignState,
        step: &CampaignStep,
        now: DateTime<Utc>,
        mut transition: CursorTransition,
        message_status: Option<&str>,
        record: Option<ExecutionRecord>,
    ) -> CampaignResult<CustomerCampaignState> {
        let mut expected = cursor.version;
        for _ in 0..=self.config.consistency_retries {
            match self.store.commit(
                campaign_id,
                cursor.customer_id,
                expected,
                now,
                transition,
                message_status,
                record.clone(),
            ) {
                Ok((state, _)) => return Ok(state),
                Err(CampaignError::Consistency(reason)) => {
                    let current = self.store.get_state(campaign_id, cursor.customer_id)?;
                    debug!(
                        campaign_id,
                        customer_id = cursor.customer_id,
                        %reason,
                        "Re-applying step outcome"
                    );
                    if current.last_step_order >= step.order_no {
                        transition = CursorTransition::Hold;
                    }
                    expected = current.version;
                }
                Err(err) => return Err(err),
            }
        }
        Err(CampaignError::Consistency(format!(
            "could not commit step {} for customer {} after {} retries",
            step.order_no, cursor.customer_id, self.config.consistency_retries
        )))
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let limit = Duration::from_millis(self.config.dispatch_timeout_ms);
        match tokio::time::timeout(limit, self.router.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!(
                "send timed out after {} ms",
                self.config.dispatch_timeout_ms
            ))),
        }
    }

    /// Resolve recipient and content into a ready-to-send message.
    async fn prepare(
        &self,
        campaign_id: CampaignId,
        step: &CampaignStep,
        customer_id: CustomerId,
        key: &str,
    ) -> Result<OutboundMessage, SendError> {
        let customer = self
            .directory
            .get_customer(customer_id)
            .await
            .map_err(|e| SendError::Transient(format!("customer directory: {e}")))?
            .ok_or_else(|| {
                SendError::Permanent(format!("customer {customer_id} not in directory"))
            })?;
        let recipient = customer
            .address_for(step.channel)
            .ok_or_else(|| {
                SendError::Permanent(format!("customer has no {} address", step.channel))
            })?
            .to_string();
        let variables = customer.render_context();

        let mut message = OutboundMessage {
            idempotency_key: key.to_string(),
            channel: step.channel,
            campaign_id,
            step_id: step.id,
            customer_id,
            recipient,
            subject: None,
            body: None,
            content_sid: None,
            content_variables: None,
        };

        match step.content().map_err(|e| SendError::Permanent(e.to_string()))? {
            StepContent::Template {
                template_id,
                subject,
            } => {
                let template = self
                    .templates
                    .get_template(template_id)
                    .await
                    .map_err(|e| SendError::Transient(format!("template store: {e}")))?
                    .ok_or_else(|| {
                        SendError::Permanent(format!("template {template_id} not found"))
                    })?;
                if template.channel != step.channel {
                    warn!(
                        template_id,
                        template_channel = %template.channel,
                        step_channel = %step.channel,
                        "Template channel differs from step channel"
                    );
                }
                let rendered = self.renderer.render_template(&template, subject, &variables);
                message.subject = rendered.subject;
                message.body = Some(rendered.body);
            }
            StepContent::Inline { subject, body } => {
                let rendered = self.renderer.render_inline(subject, body, &variables);
                message.subject = rendered.subject;
                message.body = Some(rendered.body);
            }
            StepContent::ContentSid {
                content_sid,
                variables: content_variables,
            } => {
                message.content_sid = Some(content_sid.to_string());
                message.content_variables =
                    content_variables.map(|v| self.render_json(v, &variables));
            }
        }
        Ok(message)
    }

    fn render_json(
        &self,
        value: &serde_json::Value,
        variables: &std::collections::HashMap<String, String>,
    ) -> serde_json::Value {
        match value {
            serde_json::Value::String(s) => {
                serde_json::Value::String(self.renderer.substitute(s, variables))
            }
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.render_json(v, variables)))
                    .collect(),
            ),
            serde_json::Value::Array(items) => serde_json::Value::Array(
                items.iter().map(|v| self.render_json(v, variables)).collect(),
            ),
            other => other.clone(),
        }
    }
}
