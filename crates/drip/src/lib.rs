//! Drip-campaign orchestration for multi-step, multi-channel outreach
//! sequences with delays, reply/open gates, retries and per-customer
//! progress cursors.

pub mod clock;
pub mod dispatcher;
pub mod engine;
pub mod evaluator;
pub mod progress;
pub mod rules;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{CampaignEngine, Collaborators};
pub use evaluator::{GateDecision, GateEvaluator};
pub use rules::StepGate;
pub use scheduler::{Scheduler, SchedulerHandle, TickReport};
pub use store::CampaignStore;
