//! End-to-end drip flows driven tick by tick with a manual clock.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use campaign_channels::{
    CaptureSender, ChannelRouter, ChannelSender, InMemoryHistory, InMemoryTemplates,
    InteractionKind, OutboundMessage, SendError, SendReceipt,
};
use campaign_core::config::{DelayPolicy, SchedulerConfig};
use campaign_core::event_bus::{capture_sink, CaptureSink};
use campaign_core::types::{CampaignId, Channel, Customer, EventType};
use campaign_drip::types::{CampaignStatus, CursorStatus, ExecutionQuery, ExecutionStatus};
use campaign_drip::{CampaignEngine, Clock, Collaborators, ManualClock, Scheduler};
use campaign_segmentation::InMemoryDirectory;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

struct Harness {
    engine: Arc<CampaignEngine>,
    scheduler: Arc<Scheduler>,
    clock: Arc<ManualClock>,
    sender: Arc<CaptureSender>,
    history: Arc<InMemoryHistory>,
    directory: Arc<InMemoryDirectory>,
    events: Arc<CaptureSink>,
    start: DateTime<Utc>,
}

fn harness(config: SchedulerConfig) -> Harness {
    harness_with_sender(config, |capture| capture)
}

/// Build a harness whose channels deliver through `wrap(capture)`.
fn harness_with_sender(
    config: SchedulerConfig,
    wrap: impl FnOnce(Arc<CaptureSender>) -> Arc<dyn ChannelSender>,
) -> Harness {
    let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let sender = Arc::new(CaptureSender::new());
    let history = Arc::new(InMemoryHistory::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let events = capture_sink();

    for id in 1..=3 {
        directory.upsert(Customer {
            id,
            name: Some(format!("Customer {id}")),
            email: Some(format!("c{id}@example.com")),
            whatsapp: Some(format!("+1555000{id}")),
            mobile: Some(format!("+1555100{id}")),
            ..Default::default()
        });
    }
    // No email address on file.
    directory.upsert(Customer {
        id: 4,
        name: Some("Customer 4".into()),
        whatsapp: Some("+15550004".into()),
        ..Default::default()
    });

    let collaborators = Collaborators {
        directory: directory.clone(),
        templates: Arc::new(InMemoryTemplates::new()),
        history: history.clone(),
        router: Arc::new(
            ChannelRouter::new(vec![Channel::Email, Channel::WhatsApp, Channel::Sms])
                .with_shared_sender(wrap(sender.clone())),
        ),
    };
    let engine = Arc::new(
        CampaignEngine::new(config, collaborators)
            .with_clock(clock.clone())
            .with_event_sink(events.clone()),
    );
    let scheduler = Arc::new(Scheduler::new(engine.clone()));

    Harness {
        engine,
        scheduler,
        clock,
        sender,
        history,
        directory,
        events,
        start,
    }
}

impl Harness {
    fn draft(&self, campaign: Value, steps: Value) -> CampaignId {
        let created = self
            .engine
            .create_campaign(serde_json::from_value(campaign).unwrap())
            .unwrap();
        self.engine
            .add_steps(created.id, serde_json::from_value(steps).unwrap())
            .unwrap();
        created.id
    }

    async fn launch(&self, customers: &[i64], steps: Value) -> CampaignId {
        let id = self.draft(json!({"name": "flow", "customer_ids": customers}), steps);
        self.engine.start_campaign(id).await.unwrap();
        id
    }

    fn at_day(&self, days: i64) {
        self.clock.set(self.start + Duration::days(days));
    }

    fn rows(&self, campaign_id: CampaignId, customer_id: i64) -> Vec<ExecutionStatus> {
        let mut rows = self.engine.store().all_executions(campaign_id);
        rows.retain(|e| e.customer_id == customer_id);
        rows.into_iter().map(|e| e.status).collect()
    }

    fn status(&self, campaign_id: CampaignId) -> CampaignStatus {
        self.engine.get_campaign(campaign_id).unwrap().status
    }
}

/// Panics on every message for one customer, delivers the rest.
struct PanicsFor {
    customer_id: i64,
    inner: Arc<CaptureSender>,
}

#[async_trait]
impl ChannelSender for PanicsFor {
    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt, SendError> {
        if message.customer_id == self.customer_id {
            panic!("provider client crashed for customer {}", message.customer_id);
        }
        self.inner.send(message).await
    }
}

fn email(order_no: i32, delay_days: u32) -> Value {
    json!({
        "order_no": order_no,
        "channel": "EMAIL",
        "delay_days": delay_days,
        "subject": "Hello {{name}}",
        "content": "Step {{ id }} for {{name}}"
    })
}

#[tokio::test]
async fn steps_without_gates_follow_their_delays() {
    let h = harness(SchedulerConfig::default());
    let sms = json!({"order_no": 2, "channel": "SMS", "delay_days": 2, "content": "ping"});
    let id = h.launch(&[1], json!([email(1, 0), sms])).await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    let first = h.sender.delivered_to(1);
    assert_eq!(first[0].subject.as_deref(), Some("Hello Customer 1"));
    assert_eq!(first[0].body.as_deref(), Some("Step 1 for Customer 1"));
    assert_eq!(first[0].recipient, "c1@example.com");

    // Same instant and one day later: step 2 is not due yet.
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 0);
    h.at_day(1);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 0);

    h.at_day(2);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(h.sender.delivered_to(1)[1].channel, Channel::Sms);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn not_replied_gate_skips_responders() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .launch(
            &[1, 2],
            json!([
                email(1, 0),
                {
                    "order_no": 2,
                    "channel": "WHATSAPP",
                    "delay_days": 3,
                    "filter_rules": {"reply_status": "not_replied", "within_days": 3},
                    "content": "Still interested?"
                }
            ]),
        )
        .await;

    assert_eq!(h.scheduler.tick().await.unwrap().sent, 2);

    h.history
        .record(1, Channel::Email, InteractionKind::Replied, h.start + Duration::days(1));
    h.at_day(1);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent + report.skipped, 0);

    h.at_day(3);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.skipped, 1);

    assert_eq!(h.rows(id, 1), vec![ExecutionStatus::Sent, ExecutionStatus::Skipped]);
    assert_eq!(h.rows(id, 2), vec![ExecutionStatus::Sent, ExecutionStatus::Sent]);
    let whatsapp: Vec<_> = h
        .sender
        .delivered()
        .into_iter()
        .filter(|m| m.channel == Channel::WhatsApp)
        .collect();
    assert_eq!(whatsapp.len(), 1);
    assert_eq!(whatsapp[0].customer_id, 2);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn not_replied_gate_waits_for_window_to_close() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .launch(
            &[1],
            json!([
                email(1, 0),
                {
                    "order_no": 2,
                    "channel": "EMAIL",
                    "delay_days": 3,
                    "filter_rules": {"reply_status": "not_replied", "within_days": 7},
                    "content": "Follow-up"
                }
            ]),
        )
        .await;
    h.scheduler.tick().await.unwrap();

    // Due by delay on day 3, but the 7-day window is still open.
    h.at_day(3);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent + report.skipped, 0);

    h.at_day(7);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);
    assert_eq!(h.rows(id, 1), vec![ExecutionStatus::Sent, ExecutionStatus::Sent]);
}

#[tokio::test]
async fn replied_gate_fires_on_reply_and_expires_without_one() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .launch(
            &[1, 2],
            json!([
                email(1, 0),
                {
                    "order_no": 2,
                    "channel": "EMAIL",
                    "filter_rules": {"email_replied_within_days": 5},
                    "content": "Thanks for replying"
                }
            ]),
        )
        .await;
    h.scheduler.tick().await.unwrap();

    h.at_day(1);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent + report.skipped, 0);

    h.history
        .record(1, Channel::Email, InteractionKind::Replied, h.start + Duration::days(2));
    h.at_day(2);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);

    h.at_day(5);
    assert_eq!(h.scheduler.tick().await.unwrap().skipped, 1);
    assert_eq!(h.rows(id, 2), vec![ExecutionStatus::Sent, ExecutionStatus::Skipped]);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn skipped_steps_chain_within_one_tick() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .launch(
            &[1],
            json!([
                email(1, 0),
                {
                    "order_no": 2,
                    "channel": "EMAIL",
                    "filter_rules": {"reply_status": "replied", "within_days": 0},
                    "content": "skip me"
                },
                email(3, 0)
            ]),
        )
        .await;
    h.scheduler.tick().await.unwrap();

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(
        h.rows(id, 1),
        vec![ExecutionStatus::Sent, ExecutionStatus::Skipped, ExecutionStatus::Sent]
    );
}

#[tokio::test]
async fn paused_customers_and_campaigns_get_nothing() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1, 2], json!([email(1, 0)])).await;

    h.engine.pause_customer(id, 1).unwrap();
    h.scheduler.tick().await.unwrap();
    assert!(h.rows(id, 1).is_empty());
    assert_eq!(h.rows(id, 2), vec![ExecutionStatus::Sent]);

    h.engine.pause_campaign(id).unwrap();
    h.engine.resume_customer(id, 1).unwrap();
    h.scheduler.tick().await.unwrap();
    assert!(h.rows(id, 1).is_empty());

    h.engine.resume_campaign(id).unwrap();
    h.scheduler.tick().await.unwrap();
    assert_eq!(h.rows(id, 1), vec![ExecutionStatus::Sent]);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn replayed_ticks_never_duplicate_sends() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1], json!([email(1, 0), email(2, 5)])).await;

    for _ in 0..3 {
        h.scheduler.tick().await.unwrap();
    }
    assert_eq!(h.sender.count(), 1);

    // A lost cursor write leaves the cursor behind its sent row.
    h.engine
        .store()
        .update_state(id, 1, h.clock.now(), |s| s.last_step_order = 0)
        .unwrap();
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(report.sent, 0);
    assert_eq!(h.sender.count(), 1);
    assert_eq!(h.rows(id, 1), vec![ExecutionStatus::Sent]);
    assert_eq!(h.engine.store().get_state(id, 1).unwrap().last_step_order, 1);
}

#[tokio::test]
async fn all_customers_finishing_completes_the_campaign() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1, 2, 3], json!([email(1, 0), email(2, 1)])).await;

    assert_eq!(h.scheduler.tick().await.unwrap().sent, 3);
    assert_eq!(h.status(id), CampaignStatus::Running);

    h.at_day(1);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 3);
    assert_eq!(report.completed, 1);

    let stats = h.engine.campaign_stats(id).unwrap();
    assert_eq!(stats.total_customers, 3);
    assert_eq!(stats.finished, 3);
    assert_eq!(stats.sent_count, 6);
    assert!(h.engine.get_campaign(id).unwrap().completed_at.is_some());
    assert_eq!(h.events.count_type(EventType::CampaignCompleted), 1);
    assert_eq!(h.events.count_type(EventType::StepSent), 6);
}

#[tokio::test]
async fn stopped_campaign_sends_nothing_more() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1], json!([email(1, 0), email(2, 1)])).await;
    h.scheduler.tick().await.unwrap();

    h.engine.stop_campaign(id).unwrap();
    h.at_day(2);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.campaigns, 0);
    assert_eq!(h.sender.count(), 1);
    assert_eq!(h.status(id), CampaignStatus::Stopped);
}

#[tokio::test]
async fn transient_failures_retry_with_fresh_keys() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1], json!([email(1, 0)])).await;
    h.sender.fail_next([
        SendError::Transient("503 from provider".into()),
        SendError::Transient("503 from provider".into()),
    ]);

    assert_eq!(h.scheduler.tick().await.unwrap().failed, 1);
    assert_eq!(h.engine.store().get_state(id, 1).unwrap().attempts, 1);
    assert_eq!(h.scheduler.tick().await.unwrap().failed, 1);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);

    let rows = h.engine.store().all_executions(id);
    assert_eq!(
        rows.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    let mut keys: Vec<_> = rows.iter().map(|r| r.idempotency_key.clone()).collect();
    keys.dedup();
    assert_eq!(keys.len(), 3);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn exhausted_retries_stall_until_resumed() {
    let h = harness(SchedulerConfig {
        max_attempts: 2,
        ..Default::default()
    });
    let id = h.launch(&[1, 2], json!([email(1, 0)])).await;
    h.sender
        .fail_customer(1, SendError::Transient("mailbox busy".into()));

    h.scheduler.tick().await.unwrap();
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.stalled, 1);

    let state = h.engine.store().get_state(id, 1).unwrap();
    assert_eq!(state.status, CursorStatus::Stalled);
    assert_eq!(state.stalled_step_order, Some(1));
    assert_eq!(h.engine.campaign_stats(id).unwrap().stalled, 1);
    assert_eq!(h.events.count_type(EventType::CustomerStalled), 1);
    let timeline = h.events.customer_timeline(1);
    assert_eq!(timeline.first(), Some(&EventType::CustomerEnrolled));
    assert_eq!(timeline.last(), Some(&EventType::CustomerStalled));

    // Stalled cursors are left alone and keep the campaign running.
    assert_eq!(h.scheduler.tick().await.unwrap().failed, 0);
    assert_eq!(h.status(id), CampaignStatus::Running);

    let resumed = h.engine.resume_customer(id, 1).unwrap();
    assert_eq!(resumed.status, CursorStatus::Active);
    assert_eq!(resumed.attempts, 0);
    assert_eq!(h.scheduler.tick().await.unwrap().failed, 1);
}

#[tokio::test]
async fn missing_address_is_a_permanent_failure() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1, 4], json!([email(1, 0)])).await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 1);
    assert_eq!(report.stalled, 1);

    let rows = h
        .engine
        .list_executions(
            id,
            &ExecutionQuery {
                customer_id: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);
    assert_eq!(rows[0].attempt, 1);
}

#[tokio::test]
async fn skip_forward_moves_past_failed_steps() {
    let h = harness(SchedulerConfig {
        skip_forward_on_failure: true,
        ..Default::default()
    });
    let id = h.launch(&[1, 4], json!([email(1, 0), email(2, 0)])).await;

    h.scheduler.tick().await.unwrap();
    let state = h.engine.store().get_state(id, 4).unwrap();
    assert_eq!(state.status, CursorStatus::Active);
    assert_eq!(state.last_step_order, 1);

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.rows(id, 4), vec![ExecutionStatus::Failed, ExecutionStatus::Failed]);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn scheduled_campaign_is_promoted_when_due() {
    let h = harness(SchedulerConfig::default());
    let id = h.draft(
        json!({
            "name": "later",
            "customer_ids": [1],
            "schedule_time": (h.start + Duration::days(1)).to_rfc3339()
        }),
        json!([email(1, 0)]),
    );
    let scheduled = h.engine.start_campaign(id).await.unwrap();
    assert_eq!(scheduled.status, CampaignStatus::Scheduled);

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.promoted, 0);
    assert_eq!(h.sender.count(), 0);

    h.at_day(1);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.promoted, 1);
    assert_eq!(report.sent, 1);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn scheduled_campaign_with_empty_audience_fails() {
    let h = harness(SchedulerConfig::default());
    let id = h.draft(
        json!({
            "name": "later",
            "customer_ids": [2],
            "schedule_time": (h.start + Duration::hours(6)).to_rfc3339()
        }),
        json!([email(1, 0)]),
    );
    h.engine.start_campaign(id).await.unwrap();
    h.directory.remove(2);

    h.at_day(1);
    h.scheduler.tick().await.unwrap();
    let campaign = h.engine.get_campaign(id).unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.error.unwrap().contains("no customers"));
}

#[tokio::test]
async fn directory_outage_fails_scheduled_campaign() {
    let h = harness(SchedulerConfig::default());
    let id = h.draft(
        json!({
            "name": "later",
            "customer_ids": [1, 2],
            "schedule_time": (h.start + Duration::hours(6)).to_rfc3339()
        }),
        json!([email(1, 0)]),
    );
    h.engine.start_campaign(id).await.unwrap();
    h.directory.set_unavailable(true);

    h.at_day(1);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.promoted, 0);
    let campaign = h.engine.get_campaign(id).unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.error.unwrap().contains("audience resolution failed"));
    assert!(campaign.completed_at.is_some());
    assert_eq!(h.events.count_type(EventType::CampaignFailed), 1);

    // Nothing left to retry once the directory is back.
    h.directory.set_unavailable(false);
    h.at_day(2);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.promoted + report.errors + report.campaigns, 0);
    assert_eq!(h.status(id), CampaignStatus::Failed);
    assert_eq!(h.sender.count(), 0);
}

#[tokio::test]
async fn directory_outage_fails_explicit_start() {
    let h = harness(SchedulerConfig::default());
    let id = h.draft(json!({"name": "now", "customer_ids": [1]}), json!([email(1, 0)]));
    h.directory.set_unavailable(true);

    let failed = h.engine.start_campaign(id).await.unwrap();
    assert_eq!(failed.status, CampaignStatus::Failed);
    assert!(failed.error.unwrap().contains("customer directory offline"));
    assert!(h.engine.store().list_states(id).is_empty());

    h.directory.set_unavailable(false);
    assert!(h.engine.start_campaign(id).await.is_err());
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 0);
}

#[tokio::test]
async fn broken_campaign_does_not_block_others() {
    let h = harness(SchedulerConfig::default());
    let healthy = h.launch(&[2, 3], json!([email(1, 0)])).await;

    // A campaign forced to RUNNING without any steps.
    let empty = serde_json::from_value(json!({"name": "empty", "customer_ids": [1]})).unwrap();
    let broken = h.engine.create_campaign(empty).unwrap().id;
    h.engine
        .store()
        .update_campaign(broken, |c| {
            c.status = CampaignStatus::Running;
            Ok(())
        })
        .unwrap();

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.campaigns, 2);
    assert_eq!(report.errors, 1);
    assert_eq!(report.sent, 2);

    let campaign = h.engine.get_campaign(broken).unwrap();
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert!(campaign.error.unwrap().contains("has no steps"));
    assert_eq!(h.status(healthy), CampaignStatus::Completed);
    assert!(h.sender.delivered_to(1).is_empty());
}

#[tokio::test]
async fn panicking_customer_does_not_block_the_rest() {
    let h = harness_with_sender(SchedulerConfig::default(), |capture| {
        Arc::new(PanicsFor {
            customer_id: 2,
            inner: capture,
        })
    });
    let id = h.launch(&[1, 2, 3], json!([email(1, 0)])).await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.errors, 1);
    assert_eq!(report.sent, 2);
    assert_eq!(h.sender.delivered_to(1).len(), 1);
    assert_eq!(h.sender.delivered_to(3).len(), 1);
    assert!(h.sender.delivered_to(2).is_empty());

    // The crashed unit left customer 2 unfinished, so the campaign runs on.
    assert_eq!(h.status(id), CampaignStatus::Running);
    assert_eq!(
        h.engine.store().get_state(id, 2).unwrap().status,
        CursorStatus::Active
    );
}

#[tokio::test]
async fn from_enrollment_policy_counts_from_enrollment() {
    let h = harness(SchedulerConfig {
        delay_policy: DelayPolicy::FromEnrollment,
        ..Default::default()
    });
    let id = h
        .launch(&[1], json!([email(1, 0), email(2, 2), email(3, 3)]))
        .await;
    h.scheduler.tick().await.unwrap();

    h.at_day(2);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);
    h.at_day(3);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);
    assert_eq!(h.status(id), CampaignStatus::Completed);
}

#[tokio::test]
async fn slow_sender_times_out_as_transient() {
    let h = harness(SchedulerConfig {
        dispatch_timeout_ms: 20,
        ..Default::default()
    });
    let id = h.launch(&[1], json!([email(1, 0)])).await;
    h.sender.set_delay(Some(StdDuration::from_millis(200)));

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.failed, 1);
    let rows = h.engine.store().all_executions(id);
    assert!(rows[0].note.as_deref().unwrap().contains("timed out"));
    assert_eq!(h.engine.store().get_state(id, 1).unwrap().status, CursorStatus::Active);
}

#[tokio::test]
async fn history_outage_defers_gates() {
    let h = harness(SchedulerConfig::default());
    let id = h
        .launch(
            &[1],
            json!([
                email(1, 0),
                {
                    "order_no": 2,
                    "channel": "EMAIL",
                    "delay_days": 2,
                    "filter_rules": {"email_not_replied_within_days": 2},
                    "content": "nudge"
                }
            ]),
        )
        .await;
    h.scheduler.tick().await.unwrap();

    h.history.set_unavailable(true);
    h.at_day(2);
    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent + report.skipped + report.errors, 0);
    assert_eq!(h.rows(id, 1), vec![ExecutionStatus::Sent]);

    h.history.set_unavailable(false);
    assert_eq!(h.scheduler.tick().await.unwrap().sent, 1);
}

#[tokio::test]
async fn customer_progress_reports_next_step() {
    let h = harness(SchedulerConfig::default());
    let id = h.launch(&[1, 2], json!([email(1, 0), email(2, 4)])).await;
    h.scheduler.tick().await.unwrap();

    let progress = h.engine.customer_progress(id).unwrap();
    assert_eq!(progress.len(), 2);
    assert_eq!(progress[0].state.customer_id, 1);
    assert_eq!(progress[0].next_step_order, Some(2));
    assert_eq!(progress[0].next_due_at, Some(h.start + Duration::days(4)));
}

#[tokio::test]
async fn bounded_concurrency_reaches_every_customer() {
    let h = harness(SchedulerConfig {
        max_concurrency: 2,
        ..Default::default()
    });
    for id in 10..30 {
        h.directory.upsert(Customer {
            id,
            email: Some(format!("bulk{id}@example.com")),
            ..Default::default()
        });
    }
    let customers: Vec<i64> = (10..30).collect();
    h.launch(&customers, json!([email(1, 0)])).await;

    let report = h.scheduler.tick().await.unwrap();
    assert_eq!(report.sent, 20);
    assert_eq!(h.sender.count(), 20);
}

#[tokio::test]
async fn background_loop_ticks_until_shutdown() {
    let h = harness(SchedulerConfig {
        tick_interval_ms: 10,
        ..Default::default()
    });
    h.launch(&[1, 2], json!([email(1, 0)])).await;

    let handle = h.scheduler.clone().spawn();
    tokio::time::sleep(StdDuration::from_millis(100)).await;
    handle.shutdown().await;

    assert_eq!(h.sender.count(), 2);
}
