//! Inbound message history: replies and open/read receipts recorded by the
//! platform's webhook ingestion, read back by the drip gate evaluator.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use campaign_core::types::{Channel, CustomerId};
use campaign_core::CampaignError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Replied,
    /// Email open or WhatsApp read receipt.
    Opened,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub customer_id: CustomerId,
    pub channel: Channel,
    pub kind: InteractionKind,
    pub at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("message history unavailable: {0}")]
    Unavailable(String),
}

impl From<HistoryError> for CampaignError {
    fn from(err: HistoryError) -> Self {
        CampaignError::Internal(anyhow::Error::new(err))
    }
}

#[async_trait]
pub trait MessageHistory: Send + Sync {
    /// Interactions for `customer_id` at or after `since`, optionally limited
    /// to one channel.
    async fn interactions(
        &self,
        customer_id: CustomerId,
        channel: Option<Channel>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, HistoryError>;
}

/// In-memory history for development and tests.
#[derive(Default)]
pub struct InMemoryHistory {
    records: DashMap<CustomerId, Vec<Interaction>>,
    unavailable: AtomicBool,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        customer_id: CustomerId,
        channel: Channel,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) {
        self.records.entry(customer_id).or_default().push(Interaction {
            customer_id,
            channel,
            kind,
            at,
        });
    }

    /// Simulate an outage: every read fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageHistory for InMemoryHistory {
    async fn interactions(
        &self,
        customer_id: CustomerId,
        channel: Option<Channel>,
        since: DateTime<Utc>,
    ) -> Result<Vec<Interaction>, HistoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(HistoryError::Unavailable("in-memory history offline".into()));
        }
        let Some(records) = self.records.get(&customer_id) else {
            return Ok(Vec::new());
        };
        Ok(records
            .iter()
            .filter(|i| i.at >= since)
            .filter(|i| channel.map_or(true, |c| i.channel == c))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_filters_by_channel_and_since() {
        let history = InMemoryHistory::new();
        let now = Utc::now();
        history.record(1, Channel::Email, InteractionKind::Opened, now - Duration::days(5));
        history.record(1, Channel::Email, InteractionKind::Replied, now - Duration::days(1));
        history.record(1, Channel::WhatsApp, InteractionKind::Replied, now);

        let email = history
            .interactions(1, Some(Channel::Email), now - Duration::days(2))
            .await
            .unwrap();
        assert_eq!(email.len(), 1);
        assert_eq!(email[0].kind, InteractionKind::Replied);

        let all = history.interactions(1, None, now - Duration::days(10)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let history = InMemoryHistory::new();
        history.set_unavailable(true);
        assert!(history.interactions(1, None, Utc::now()).await.is_err());
    }
}
