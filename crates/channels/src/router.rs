//! Routes outbound messages to the sender registered for their channel.

use std::collections::HashMap;
use std::sync::Arc;

use campaign_core::types::Channel;
use tracing::{info, warn};

use crate::sender::{ChannelSender, LogSender, OutboundMessage, SendError, SendReceipt};

pub struct ChannelRouter {
    enabled_channels: Vec<Channel>,
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
}

impl ChannelRouter {
    pub fn new(enabled_channels: Vec<Channel>) -> Self {
        info!(channels = ?enabled_channels, "Channel router initialized");
        Self {
            enabled_channels,
            senders: HashMap::new(),
        }
    }

    /// Router with a `LogSender` behind every enabled channel.
    pub fn with_log_senders(enabled_channels: Vec<Channel>) -> Self {
        let mut router = Self::new(enabled_channels.clone());
        for channel in enabled_channels {
            router = router.with_sender(channel, Arc::new(LogSender::new(channel)));
        }
        router
    }

    pub fn with_sender(mut self, channel: Channel, sender: Arc<dyn ChannelSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    /// Route one sender to every enabled channel.
    pub fn with_shared_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        for channel in &self.enabled_channels {
            self.senders.insert(*channel, sender.clone());
        }
        self
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled_channels.contains(&channel)
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        let channel = message.channel;
        if !self.is_enabled(channel) {
            metrics::counter!("channels.rejected", "channel" => channel.as_str()).increment(1);
            return Err(SendError::Permanent(format!("channel {channel} not enabled")));
        }
        let Some(sender) = self.senders.get(&channel) else {
            warn!(channel = %channel, "No sender registered for enabled channel");
            return Err(SendError::Permanent(format!("no sender for channel {channel}")));
        };

        let result = sender.send(message).await;
        let outcome = match &result {
            Ok(_) => "sent",
            Err(SendError::Transient(_)) => "transient",
            Err(SendError::Permanent(_)) => "permanent",
        };
        metrics::counter!(
            "channels.messages",
            "channel" => channel.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::CaptureSender;

    fn sms(customer_id: i64) -> OutboundMessage {
        OutboundMessage {
            idempotency_key: format!("key-{customer_id}"),
            channel: Channel::Sms,
            campaign_id: 1,
            step_id: 1,
            customer_id,
            recipient: "+15550001".into(),
            subject: None,
            body: Some("hi".into()),
            content_sid: None,
            content_variables: None,
        }
    }

    #[tokio::test]
    async fn test_disabled_channel_is_permanent_failure() {
        let capture = Arc::new(CaptureSender::new());
        let router = ChannelRouter::new(vec![Channel::Email]).with_shared_sender(capture.clone());

        let err = router.send(&sms(1)).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(capture.count(), 0);
    }

    #[tokio::test]
    async fn test_routes_to_registered_sender() {
        let capture = Arc::new(CaptureSender::new());
        let router =
            ChannelRouter::new(vec![Channel::Sms]).with_sender(Channel::Sms, capture.clone());

        router.send(&sms(7)).await.unwrap();
        assert_eq!(capture.delivered_to(7).len(), 1);
    }

    #[tokio::test]
    async fn test_log_senders_cover_enabled_channels() {
        let router = ChannelRouter::with_log_senders(vec![Channel::Sms]);
        assert!(router.send(&sms(1)).await.is_ok());
    }
}
