use serde::Deserialize;

use crate::types::Channel;

/// Root application configuration. Loaded from environment variables
/// with the prefix `OUTREACH__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// ─── Scheduler Config ───────────────────────────────────────────────────

/// Which instant a step's `delay_days` counts from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayPolicy {
    /// Delay runs from the moment the previous step reached a terminal
    /// outcome (or from enrollment for the first step). Delays compound.
    #[default]
    FromPreviousStep,
    /// Every delay is an absolute offset from enrollment.
    FromEnrollment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on customers processed concurrently within one tick.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
    /// Attempts per (step, customer) before the retry budget is exhausted.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub delay_policy: DelayPolicy,
    /// When true, an exhausted step is passed over instead of stalling the customer.
    #[serde(default)]
    pub skip_forward_on_failure: bool,
    #[serde(default = "default_consistency_retries")]
    pub consistency_retries: u32,
}

fn default_scheduler_enabled() -> bool { true }
fn default_tick_interval_ms() -> u64 { 15_000 }
fn default_max_concurrency() -> usize { 16 }
fn default_dispatch_timeout_ms() -> u64 { 10_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_consistency_retries() -> u32 { 3 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: default_scheduler_enabled(),
            tick_interval_ms: default_tick_interval_ms(),
            max_concurrency: default_max_concurrency(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            max_attempts: default_max_attempts(),
            delay_policy: DelayPolicy::default(),
            skip_forward_on_failure: false,
            consistency_retries: default_consistency_retries(),
        }
    }
}

// ─── Channels Config ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_enabled_channels")]
    pub enabled: Vec<Channel>,
}

fn default_enabled_channels() -> Vec<Channel> {
    vec![Channel::Email, Channel::WhatsApp, Channel::Sms]
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_channels(),
        }
    }
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            scheduler: SchedulerConfig::default(),
            channels: ChannelsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("OUTREACH")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("channels.enabled"),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
