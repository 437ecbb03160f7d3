//! Assembly for the provisioning and reconciliation engine.
//!
//! The embedding service (the administration console backend) supplies the
//! device gateway, billing client and fleet repository, and gets back a
//! running engine with the daily scheduler already started:
//!
//! ```no_run
//! use gamlink_runner::{EngineBuilder, EngineConfig};
//! # use std::sync::Arc;
//! # async fn wire(
//! #     gateway: Arc<dyn gamlink_domain::DeviceGateway>,
//! #     billing: Arc<dyn gamlink_domain::BillingClient>,
//! #     devices: Arc<dyn gamlink_domain::GamDeviceRepository>,
//! # ) -> anyhow::Result<()> {
//! let engine = EngineBuilder::new(EngineConfig::from_env()?)
//!     .with_device_gateway(gateway)
//!     .with_billing_client(billing)
//!     .with_device_repository(devices)
//!     .build()?;
//!
//! let coordinator = engine.coordinator();
//! coordinator.trigger_reconciliation_now().await?;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gamlink_domain::{
    AttemptCache, AuditSink, BillingClient, Clock, DeviceGateway, EndpointRepository,
    GamDeviceRepository, InMemoryEndpointRepository, InMemoryProvisioningStateStore,
    InventoryMatcher, ProvisionDefaults, ProvisioningService, ProvisioningStateStore,
    ReconciliationEngine, ReconciliationEngineConfig, SystemClock, TimeoutBillingClient,
    TimeoutDeviceGateway, TracingAuditSink,
};
use reconciliation_worker::{
    Coordinator, CoordinatorConfig, ReconciliationScheduler, SchedulerConfig,
};

pub use config::EngineConfig;

/// Wires collaborator implementations into a running engine.
///
/// Device gateway, billing client and device repository are required; the
/// rest defaults to in-memory stores, the system clock and a log-only
/// audit sink.
pub struct EngineBuilder {
    config: EngineConfig,
    device_gateway: Option<Arc<dyn DeviceGateway>>,
    billing_client: Option<Arc<dyn BillingClient>>,
    device_repository: Option<Arc<dyn GamDeviceRepository>>,
    endpoint_repository: Option<Arc<dyn EndpointRepository>>,
    provisioning_state_store: Option<Arc<dyn ProvisioningStateStore>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            device_gateway: None,
            billing_client: None,
            device_repository: None,
            endpoint_repository: None,
            provisioning_state_store: None,
            audit_sink: None,
            clock: None,
        }
    }

    pub fn with_device_gateway(mut self, gateway: Arc<dyn DeviceGateway>) -> Self {
        self.device_gateway = Some(gateway);
        self
    }

    pub fn with_billing_client(mut self, billing: Arc<dyn BillingClient>) -> Self {
        self.billing_client = Some(billing);
        self
    }

    pub fn with_device_repository(mut self, devices: Arc<dyn GamDeviceRepository>) -> Self {
        self.device_repository = Some(devices);
        self
    }

    pub fn with_endpoint_repository(mut self, endpoints: Arc<dyn EndpointRepository>) -> Self {
        self.endpoint_repository = Some(endpoints);
        self
    }

    pub fn with_provisioning_state_store(
        mut self,
        states: Arc<dyn ProvisioningStateStore>,
    ) -> Self {
        self.provisioning_state_store = Some(states);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(audit);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> anyhow::Result<RunningEngine> {
        let config = self.config;

        let gateway = self
            .device_gateway
            .context("a DeviceGateway implementation is required")?;
        let billing = self
            .billing_client
            .context("a BillingClient implementation is required")?;
        let devices = self
            .device_repository
            .context("a GamDeviceRepository implementation is required")?;

        let endpoints = self
            .endpoint_repository
            .unwrap_or_else(|| Arc::new(InMemoryEndpointRepository::new()));
        let states = self
            .provisioning_state_store
            .unwrap_or_else(|| Arc::new(InMemoryProvisioningStateStore::new()));
        let audit = self
            .audit_sink
            .unwrap_or_else(|| Arc::new(TracingAuditSink));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let time_of_day = NaiveTime::parse_from_str(&config.reconciliation_time_of_day, "%H:%M")
            .with_context(|| {
                format!(
                    "invalid reconciliation_time_of_day \"{}\", expected HH:MM",
                    config.reconciliation_time_of_day
                )
            })?;

        // Per-request deadlines turn hung transports into transient errors
        let gateway: Arc<dyn DeviceGateway> = Arc::new(TimeoutDeviceGateway::new(
            gateway,
            Duration::from_secs(config.device_request_timeout_secs),
        ));
        let billing: Arc<dyn BillingClient> = Arc::new(TimeoutBillingClient::new(
            billing,
            Duration::from_secs(config.billing_request_timeout_secs),
        ));

        let cache = Arc::new(AttemptCache::new(
            clock,
            chrono::Duration::hours(config.lookup_retry_window_hours as i64),
        ));
        let matcher = Arc::new(InventoryMatcher::new(billing.clone(), cache));

        let provisioning = Arc::new(ProvisioningService::new(
            gateway.clone(),
            matcher.clone(),
            endpoints.clone(),
            states,
            audit.clone(),
            ProvisionDefaults {
                vlan: config.default_vlan,
                bandwidth_profile: config.default_bandwidth_profile.clone(),
            },
        ));

        let engine = Arc::new(ReconciliationEngine::new(
            devices,
            gateway,
            matcher.clone(),
            billing,
            audit,
            ReconciliationEngineConfig {
                device_workers: config.device_workers,
                lookup_fanout: config.lookup_fanout,
            },
        ));

        let shutdown = CancellationToken::new();
        let coordinator = Arc::new(Coordinator::new(
            engine,
            matcher,
            provisioning,
            endpoints,
            CoordinatorConfig {
                auto_provision: config.auto_provision_enabled,
            },
            shutdown.clone(),
        ));

        let scheduler = ReconciliationScheduler::new(
            coordinator.clone(),
            SchedulerConfig { time_of_day },
            shutdown.clone(),
        );
        let scheduler_handle = scheduler.spawn();

        info!(
            time_of_day = %time_of_day,
            auto_provision = config.auto_provision_enabled,
            "engine started"
        );

        Ok(RunningEngine {
            coordinator,
            scheduler_handle,
            shutdown,
        })
    }
}

/// A built engine with its daily scheduler running.
pub struct RunningEngine {
    coordinator: Arc<Coordinator>,
    scheduler_handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl RunningEngine {
    pub fn coordinator(&self) -> Arc<Coordinator> {
        self.coordinator.clone()
    }

    /// Stop the scheduler, cancel any in-flight reconciliation run and
    /// wait for both to wind down.
    pub async fn shutdown(self) {
        info!("shutting down engine");
        self.shutdown.cancel();
        self.coordinator.shutdown().await;
        if let Err(e) = self.scheduler_handle.await {
            error!("scheduler task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gamlink_domain::{MockBillingClient, MockDeviceGateway, MockGamDeviceRepository};

    fn mock_collaborators() -> (
        Arc<dyn DeviceGateway>,
        Arc<dyn BillingClient>,
        Arc<dyn GamDeviceRepository>,
    ) {
        let mut devices = MockGamDeviceRepository::new();
        devices.expect_list_devices().returning(|| Ok(Vec::new()));
        (
            Arc::new(MockDeviceGateway::new()),
            Arc::new(MockBillingClient::new()),
            Arc::new(devices),
        )
    }

    #[tokio::test]
    async fn test_build_requires_collaborators() {
        let result = EngineBuilder::new(EngineConfig::default()).build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_time_of_day() {
        let (gateway, billing, devices) = mock_collaborators();
        let config = EngineConfig {
            reconciliation_time_of_day: "25:99".to_string(),
            ..EngineConfig::default()
        };

        let result = EngineBuilder::new(config)
            .with_device_gateway(gateway)
            .with_billing_client(billing)
            .with_device_repository(devices)
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_and_shutdown() {
        let (gateway, billing, devices) = mock_collaborators();

        let engine = EngineBuilder::new(EngineConfig::default())
            .with_device_gateway(gateway)
            .with_billing_client(billing)
            .with_device_repository(devices)
            .build()
            .unwrap();

        let run_id = engine
            .coordinator()
            .trigger_reconciliation_now()
            .await
            .unwrap();
        assert!(!run_id.is_empty());

        engine.shutdown().await;
    }
}
