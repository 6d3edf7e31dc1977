//! Engine event bus.
//!
//! The drip engine hands every lifecycle change and step outcome to an
//! `Arc<dyn EventSink>`. Production wiring logs them; tests capture them.

use crate::types::{CampaignId, CustomerId, DripEvent, EventType, StepId};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DripEvent);
}

/// Writes each event as a structured `debug!` record under the
/// `drip_events` target.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DripEvent) {
        debug!(
            target: "drip_events",
            event_id = %event.event_id,
            event_type = ?event.event_type,
            campaign_id = event.campaign_id,
            customer_id = ?event.customer_id,
            step_id = ?event.step_id,
            "Drip event"
        );
    }
}

/// Keeps every emitted event in order.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<DripEvent>>,
}

impl CaptureSink {
    pub fn events(&self) -> Vec<DripEvent> {
        self.events.lock().clone()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Event types seen for one customer, oldest first.
    pub fn customer_timeline(&self, customer_id: CustomerId) -> Vec<EventType> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.customer_id == Some(customer_id))
            .map(|e| e.event_type)
            .collect()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: DripEvent) {
        self.events.lock().push(event);
    }
}

pub fn make_event(
    event_type: EventType,
    campaign_id: CampaignId,
    customer_id: Option<CustomerId>,
    step_id: Option<StepId>,
) -> DripEvent {
    DripEvent {
        event_id: Uuid::new_v4(),
        event_type,
        campaign_id,
        customer_id,
        step_id,
        timestamp: Utc::now(),
    }
}

pub fn tracing_sink() -> Arc<dyn EventSink> {
    Arc::new(TracingSink)
}

pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::default())
}
