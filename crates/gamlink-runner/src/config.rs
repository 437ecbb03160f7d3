use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Engine configuration consumed from settings storage via the
/// environment, `GAMLINK_` prefixed.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Hours a cached not-found billing lookup suppresses retries
    #[serde(default = "default_lookup_retry_window_hours")]
    pub lookup_retry_window_hours: u64,

    /// VLAN applied when billing carries no usable tariff
    #[serde(default = "default_vlan")]
    pub default_vlan: u16,

    /// Bandwidth profile applied when billing carries no usable tariff
    #[serde(default = "default_bandwidth_profile")]
    pub default_bandwidth_profile: String,

    /// Wall-clock time of day (UTC, HH:MM) for the daily reconciliation run
    #[serde(default = "default_reconciliation_time_of_day")]
    pub reconciliation_time_of_day: String,

    /// Provision newly detected, billing-matched endpoints automatically
    #[serde(default = "default_auto_provision_enabled")]
    pub auto_provision_enabled: bool,

    /// Devices reconciled concurrently during a run
    #[serde(default = "default_device_workers")]
    pub device_workers: usize,

    /// Concurrent billing lookups within one device run
    #[serde(default = "default_lookup_fanout")]
    pub lookup_fanout: usize,

    /// Per-request deadline for device gateway calls in seconds
    #[serde(default = "default_device_request_timeout_secs")]
    pub device_request_timeout_secs: u64,

    /// Per-request deadline for billing calls in seconds
    #[serde(default = "default_billing_request_timeout_secs")]
    pub billing_request_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_lookup_retry_window_hours() -> u64 {
    24
}

fn default_vlan() -> u16 {
    100
}

fn default_bandwidth_profile() -> String {
    "100M/20M".to_string()
}

fn default_reconciliation_time_of_day() -> String {
    "03:30".to_string()
}

fn default_auto_provision_enabled() -> bool {
    false
}

fn default_device_workers() -> usize {
    4
}

fn default_lookup_fanout() -> usize {
    4
}

fn default_device_request_timeout_secs() -> u64 {
    30
}

fn default_billing_request_timeout_secs() -> u64 {
    15
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            lookup_retry_window_hours: default_lookup_retry_window_hours(),
            default_vlan: default_vlan(),
            default_bandwidth_profile: default_bandwidth_profile(),
            reconciliation_time_of_day: default_reconciliation_time_of_day(),
            auto_provision_enabled: default_auto_provision_enabled(),
            device_workers: default_device_workers(),
            lookup_fanout: default_lookup_fanout(),
            device_request_timeout_secs: default_device_request_timeout_secs(),
            billing_request_timeout_secs: default_billing_request_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("GAMLINK"))
            .build()?
            .try_deserialize()
    }
}
