//! Shared building blocks for the outreach drip engine: configuration,
//! error taxonomy, domain types, the event bus and message rendering.

pub mod config;
pub mod error;
pub mod event_bus;
pub mod templates;
pub mod types;

pub use config::AppConfig;
pub use error::{CampaignError, CampaignResult};
