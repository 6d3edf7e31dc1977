//! Channel senders, the transport seam between the drip engine and the
//! email / WhatsApp / SMS providers.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use campaign_core::types::{CampaignId, Channel, CustomerId, StepId};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// A fully rendered message addressed to one customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Stable per (campaign, step, customer, attempt); providers dedupe on it.
    pub idempotency_key: String,
    pub channel: Channel,
    pub campaign_id: CampaignId,
    pub step_id: StepId,
    pub customer_id: CustomerId,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: Option<String>,
    /// WhatsApp pre-approved content template.
    pub content_sid: Option<String>,
    pub content_variables: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Timeouts, throttling, provider 5xx. Worth retrying.
    #[error("transient send failure: {0}")]
    Transient(String),
    /// Invalid recipient, rejected content, disabled channel.
    #[error("permanent send failure: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }
}

#[async_trait]
pub trait ChannelSender: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError>;
}

// ─── LogSender ──────────────────────────────────────────────────────────

/// Development sender: builds the provider payload, logs it and reports the
/// message as queued.
/// In production: POST the payload to the channel provider's API.
pub struct LogSender {
    channel: Channel,
}

impl LogSender {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }

    fn payload(&self, message: &OutboundMessage) -> serde_json::Value {
        match self.channel {
            Channel::Email => serde_json::json!({
                "personalizations": [{"to": [{"email": message.recipient}]}],
                "subject": message.subject,
                "content": [{"type": "text/html", "value": message.body}],
                "custom_args": {
                    "campaign_id": message.campaign_id,
                    "step_id": message.step_id,
                    "customer_id": message.customer_id,
                },
            }),
            Channel::WhatsApp => match &message.content_sid {
                Some(sid) => serde_json::json!({
                    "to": format!("whatsapp:{}", message.recipient),
                    "content_sid": sid,
                    "content_variables": message.content_variables,
                }),
                None => serde_json::json!({
                    "to": format!("whatsapp:{}", message.recipient),
                    "body": message.body,
                }),
            },
            Channel::Sms => serde_json::json!({
                "to": message.recipient,
                "body": message.body,
            }),
        }
    }
}

#[async_trait]
impl ChannelSender for LogSender {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let payload = self.payload(message);
        debug!(
            channel = %self.channel,
            customer_id = message.customer_id,
            idempotency_key = %message.idempotency_key,
            payload = %payload,
            "Sending message"
        );
        Ok(SendReceipt {
            message_id: format!("{}-{}", self.channel.as_str().to_lowercase(), Uuid::new_v4()),
            status: "queued".to_string(),
        })
    }
}

// ─── CaptureSender ──────────────────────────────────────────────────────

/// Test sender that records deliveries and can be told to fail.
///
/// Deliveries are deduplicated by idempotency key the way a real provider
/// would: a repeated key returns the first receipt and is not recorded again.
#[derive(Default)]
pub struct CaptureSender {
    delivered: Mutex<Vec<OutboundMessage>>,
    receipts: DashMap<String, SendReceipt>,
    scripted_failures: Mutex<VecDeque<SendError>>,
    customer_failures: DashMap<CustomerId, SendError>,
    delay: Mutex<Option<Duration>>,
}

impl CaptureSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next send calls, in order, with the given errors.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = SendError>) {
        self.scripted_failures.lock().extend(errors);
    }

    /// Fail every send to `customer_id` with `error`.
    pub fn fail_customer(&self, customer_id: CustomerId, error: SendError) {
        self.customer_failures.insert(customer_id, error);
    }

    /// Sleep before answering each send.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn delivered(&self) -> Vec<OutboundMessage> {
        self.delivered.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn delivered_to(&self, customer_id: CustomerId) -> Vec<OutboundMessage> {
        self.delivered()
            .into_iter()
            .filter(|m| m.customer_id == customer_id)
            .collect()
    }
}

#[async_trait]
impl ChannelSender for CaptureSender {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.customer_failures.get(&message.customer_id) {
            return Err(error.clone());
        }
        let scripted = self.scripted_failures.lock().pop_front();
        if let Some(error) = scripted {
            return Err(error);
        }

        if let Some(receipt) = self.receipts.get(&message.idempotency_key) {
            return Ok(receipt.clone());
        }

        let receipt = SendReceipt {
            message_id: Uuid::new_v4().to_string(),
            status: "sent".to_string(),
        };
        self.receipts
            .insert(message.idempotency_key.clone(), receipt.clone());
        self.delivered.lock().push(message.clone());
        Ok(receipt)
    }
}
