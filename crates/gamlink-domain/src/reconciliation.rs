use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::billing::BillingClient;
use crate::device::{GamDevice, GamDeviceRepository};
use crate::device_gateway::DeviceGateway;
use crate::error::{DomainError, DomainResult};
use crate::inventory_matcher::{InventoryMatcher, LookupResult};
use crate::mac::MacAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MismatchCategory {
    /// Subscriber resolves but its name differs from the billing customer
    NameDrift,
    /// Subscriber exists on the device but billing no longer resolves it
    Orphaned,
    /// Billing shows an active service for a live endpoint with no subscriber
    UnprovisionedButBilled,
}

impl fmt::Display for MismatchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MismatchCategory::NameDrift => "name_drift",
            MismatchCategory::Orphaned => "orphaned",
            MismatchCategory::UnprovisionedButBilled => "unprovisioned_but_billed",
        };
        f.write_str(name)
    }
}

/// Drift detected between device-side and billing-side state. Created per
/// run, never mutated; the next run's set supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MismatchRecord {
    pub device_id: String,
    pub mac: MacAddr,
    pub subscriber_id: Option<String>,
    pub category: MismatchCategory,
    pub detail: String,
}

/// Classification that could not be made because of a transient failure;
/// the endpoint is skipped, not misreported.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedEndpoint {
    pub mac: MacAddr,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRunStatus {
    Completed,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReconciliation {
    pub device_id: String,
    pub status: DeviceRunStatus,
    pub consistent: usize,
    pub mismatches: Vec<MismatchRecord>,
    pub skipped: Vec<SkippedEndpoint>,
    /// Set when the mismatch ticket could not be filed
    pub ticket_error: Option<String>,
}

impl DeviceReconciliation {
    fn completed(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            status: DeviceRunStatus::Completed,
            consistent: 0,
            mismatches: Vec::new(),
            skipped: Vec::new(),
            ticket_error: None,
        }
    }

    fn failed(device_id: &str, error: &DomainError) -> Self {
        Self {
            status: DeviceRunStatus::Failed(error.to_string()),
            ..Self::completed(device_id)
        }
    }

    fn cancelled(device_id: &str) -> Self {
        Self {
            status: DeviceRunStatus::Cancelled,
            ..Self::completed(device_id)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationRunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices: Vec<DeviceReconciliation>,
    pub warnings: Vec<String>,
}

impl ReconciliationRunReport {
    pub fn total_mismatches(&self) -> usize {
        self.devices.iter().map(|d| d.mismatches.len()).sum()
    }

    pub fn failed_devices(&self) -> usize {
        self.devices
            .iter()
            .filter(|d| matches!(d.status, DeviceRunStatus::Failed(_)))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngineConfig {
    /// Devices reconciled concurrently during a run
    pub device_workers: usize,
    /// Concurrent billing lookups within one device run
    pub lookup_fanout: usize,
}

impl Default for ReconciliationEngineConfig {
    fn default() -> Self {
        Self {
            device_workers: 4,
            lookup_fanout: 4,
        }
    }
}

/// Compares device-side subscribers against billing inventory across the
/// fleet and classifies each pair into a consistency category.
///
/// Device-level isolation is mandatory: one device failing or being
/// unreachable never aborts the runs of the others, and a cancelled run
/// discards its in-flight mismatch batch rather than emitting a partial
/// set.
pub struct ReconciliationEngine {
    devices: Arc<dyn GamDeviceRepository>,
    gateway: Arc<dyn DeviceGateway>,
    matcher: Arc<InventoryMatcher>,
    billing: Arc<dyn BillingClient>,
    audit: Arc<dyn AuditSink>,
    config: ReconciliationEngineConfig,
}

impl ReconciliationEngine {
    pub fn new(
        devices: Arc<dyn GamDeviceRepository>,
        gateway: Arc<dyn DeviceGateway>,
        matcher: Arc<InventoryMatcher>,
        billing: Arc<dyn BillingClient>,
        audit: Arc<dyn AuditSink>,
        config: ReconciliationEngineConfig,
    ) -> Self {
        Self {
            devices,
            gateway,
            matcher,
            billing,
            audit,
            config,
        }
    }

    /// Run a full fleet reconciliation pass.
    #[instrument(skip(self, cancel), fields(run_id = %run_id))]
    pub async fn run(
        &self,
        run_id: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<ReconciliationRunReport> {
        let started_at = Utc::now();
        info!("starting reconciliation run");

        if let Err(e) = self
            .audit
            .record(AuditEvent::ReconciliationStarted {
                run_id: run_id.to_string(),
            })
            .await
        {
            warn!("failed to record audit event: {}", e);
        }

        let devices = self.devices.list_devices().await?;
        info!(devices = devices.len(), "reconciling fleet");

        let results: Vec<DeviceReconciliation> = stream::iter(devices)
            .map(|device| async move { self.reconcile_device(device, cancel).await })
            .buffer_unordered(self.config.device_workers.max(1))
            .collect()
            .await;

        let mut warnings = Vec::new();
        for result in &results {
            if let Some(error) = &result.ticket_error {
                warnings.push(format!(
                    "device {}: failed to file mismatch ticket: {}",
                    result.device_id, error
                ));
            }
        }

        let report = ReconciliationRunReport {
            run_id: run_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            devices: results,
            warnings,
        };

        if let Err(e) = self
            .audit
            .record(AuditEvent::ReconciliationFinished {
                run_id: run_id.to_string(),
                mismatches: report.total_mismatches(),
            })
            .await
        {
            warn!("failed to record audit event: {}", e);
        }

        info!(
            mismatches = report.total_mismatches(),
            failed_devices = report.failed_devices(),
            "reconciliation run complete"
        );
        Ok(report)
    }

    /// Reconcile a single device. Failures are embedded in the returned
    /// status, never propagated, so sibling devices are unaffected.
    #[instrument(skip(self, cancel), fields(device_id = %device.device_id))]
    pub async fn reconcile_device(
        &self,
        device: GamDevice,
        cancel: &CancellationToken,
    ) -> DeviceReconciliation {
        let device_id = device.device_id.as_str();

        if cancel.is_cancelled() {
            return DeviceReconciliation::cancelled(device_id);
        }

        let subscribers = match self.gateway.list_subscribers(device_id).await {
            Ok(subscribers) => subscribers,
            Err(e) => {
                warn!("failed to list subscribers: {}", e);
                return DeviceReconciliation::failed(device_id, &e);
            }
        };
        let endpoints = match self.gateway.list_endpoints(device_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                warn!("failed to list endpoints: {}", e);
                return DeviceReconciliation::failed(device_id, &e);
            }
        };

        // One billing lookup per relevant MAC, issued concurrently up to
        // the fan-out limit
        let mut relevant: HashSet<MacAddr> =
            subscribers.iter().map(|s| s.mac).collect();
        relevant.extend(endpoints.iter().filter(|e| e.live).map(|e| e.mac));
        let macs: Vec<MacAddr> = relevant.into_iter().collect();

        let lookups: HashMap<MacAddr, DomainResult<LookupResult>> = stream::iter(macs)
            .map(|mac| async move {
                // Reconciliation compares against fresh billing state, so a
                // stale cached resolution is dropped first
                self.matcher.invalidate(&mac).await;
                (mac, self.matcher.lookup(&mac).await)
            })
            .buffer_unordered(self.config.lookup_fanout.max(1))
            .collect()
            .await;

        // A cancellation observed mid-run discards the batch instead of
        // reporting the device as fully reconciled
        if cancel.is_cancelled() {
            debug!("run cancelled, discarding in-flight mismatch batch");
            return DeviceReconciliation::cancelled(device_id);
        }

        let mut result = DeviceReconciliation::completed(device_id);

        for subscriber in &subscribers {
            match lookups.get(&subscriber.mac) {
                Some(Ok(resolution)) if resolution.found => {
                    match resolution.customer_name() {
                        Some(name) if name == subscriber.name => result.consistent += 1,
                        Some(name) => result.mismatches.push(MismatchRecord {
                            device_id: device_id.to_string(),
                            mac: subscriber.mac,
                            subscriber_id: Some(subscriber.subscriber_id.clone()),
                            category: MismatchCategory::NameDrift,
                            detail: format!(
                                "device subscriber \"{}\" vs billing customer \"{}\"",
                                subscriber.name, name
                            ),
                        }),
                        None => result.mismatches.push(MismatchRecord {
                            device_id: device_id.to_string(),
                            mac: subscriber.mac,
                            subscriber_id: Some(subscriber.subscriber_id.clone()),
                            category: MismatchCategory::NameDrift,
                            detail: format!(
                                "device subscriber \"{}\" but billing record has no linked customer",
                                subscriber.name
                            ),
                        }),
                    }
                }
                Some(Ok(_)) => result.mismatches.push(MismatchRecord {
                    device_id: device_id.to_string(),
                    mac: subscriber.mac,
                    subscriber_id: Some(subscriber.subscriber_id.clone()),
                    category: MismatchCategory::Orphaned,
                    detail: format!(
                        "subscriber \"{}\" has no billing inventory for {}",
                        subscriber.name, subscriber.mac
                    ),
                }),
                Some(Err(e)) => result.skipped.push(SkippedEndpoint {
                    mac: subscriber.mac,
                    reason: e.to_string(),
                }),
                None => result.skipped.push(SkippedEndpoint {
                    mac: subscriber.mac,
                    reason: "no lookup result".to_string(),
                }),
            }
        }

        let subscriber_macs: HashSet<MacAddr> = subscribers.iter().map(|s| s.mac).collect();
        for endpoint in endpoints
            .iter()
            .filter(|e| e.live && !subscriber_macs.contains(&e.mac))
        {
            match lookups.get(&endpoint.mac) {
                Some(Ok(resolution)) if resolution.found && resolution.has_active_service() => {
                    let tariffs: Vec<&str> = resolution
                        .services
                        .iter()
                        .map(|s| s.tariff_name.as_str())
                        .collect();
                    result.mismatches.push(MismatchRecord {
                        device_id: device_id.to_string(),
                        mac: endpoint.mac,
                        subscriber_id: None,
                        category: MismatchCategory::UnprovisionedButBilled,
                        detail: format!(
                            "live endpoint {} billed ({}) but has no subscriber",
                            endpoint.mac,
                            tariffs.join(", ")
                        ),
                    });
                }
                Some(Err(e)) => result.skipped.push(SkippedEndpoint {
                    mac: endpoint.mac,
                    reason: e.to_string(),
                }),
                _ => {}
            }
        }

        if cancel.is_cancelled() {
            debug!("run cancelled before ticket filing, discarding mismatch batch");
            return DeviceReconciliation::cancelled(device_id);
        }

        if !result.mismatches.is_empty() {
            if let Err(e) = self
                .billing
                .file_ticket(device_id, &result.mismatches)
                .await
            {
                // Ticket filing never blocks the device result
                warn!("failed to file mismatch ticket: {}", e);
                result.ticket_error = Some(e.to_string());
            }
        }

        info!(
            consistent = result.consistent,
            mismatches = result.mismatches.len(),
            skipped = result.skipped.len(),
            "device reconciled"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditSink;
    use crate::billing::{
        BillingCustomer, BillingInventoryItem, BillingMatch, BillingService, BillingServiceStatus,
        MockBillingClient,
    };
    use crate::clock::SystemClock;
    use crate::device::MockGamDeviceRepository;
    use crate::device_gateway::MockDeviceGateway;
    use crate::endpoint::{Endpoint, OperationalState};
    use crate::lookup_cache::AttemptCache;
    use crate::subscriber::{ServiceProfile, Subscriber};

    fn mac_n(n: u8) -> MacAddr {
        format!("00:00:00:00:00:{:02X}", n).parse().unwrap()
    }

    fn subscriber_n(device_id: &str, n: u8, name: &str) -> Subscriber {
        Subscriber {
            subscriber_id: format!("sub-{}", n),
            device_id: device_id.to_string(),
            mac: mac_n(n),
            name: name.to_string(),
            profile: ServiceProfile {
                bandwidth_profile: "fiber-100".to_string(),
                vlan: 100,
                poe_enabled: false,
            },
        }
    }

    fn endpoint_n(device_id: &str, n: u8, live: bool) -> Endpoint {
        Endpoint {
            endpoint_id: format!("ep-{}", n),
            device_id: device_id.to_string(),
            mac: mac_n(n),
            port_index: Some(n as u32),
            live,
            oper_state: OperationalState::Live,
            subscriber_name: None,
            last_seen: None,
        }
    }

    fn match_for(n: u8, customer_name: &str, status: BillingServiceStatus) -> BillingMatch {
        BillingMatch {
            inventory: BillingInventoryItem {
                item_id: format!("item-{}", n),
                mac: mac_n(n),
                model: None,
            },
            customer: Some(BillingCustomer {
                customer_id: format!("cust-{}", n),
                name: customer_name.to_string(),
                address: None,
            }),
            services: vec![BillingService {
                tariff_name: "fiber-100".to_string(),
                download_kbps: 100_000,
                upload_kbps: 20_000,
                status,
            }],
        }
    }

    fn single_device_repo(device_id: &str) -> MockGamDeviceRepository {
        let device = GamDevice {
            device_id: device_id.to_string(),
            name: format!("{} name", device_id),
            address: "10.0.0.1".to_string(),
        };
        let mut repo = MockGamDeviceRepository::new();
        repo.expect_list_devices()
            .returning(move || Ok(vec![device.clone()]));
        repo
    }

    fn engine(
        devices: MockGamDeviceRepository,
        gateway: MockDeviceGateway,
        billing: MockBillingClient,
    ) -> ReconciliationEngine {
        let billing: Arc<dyn BillingClient> = Arc::new(billing);
        let cache = Arc::new(AttemptCache::new(
            Arc::new(SystemClock),
            chrono::Duration::hours(24),
        ));
        let matcher = Arc::new(InventoryMatcher::new(billing.clone(), cache));
        let mut audit = MockAuditSink::new();
        audit.expect_record().returning(|_| Ok(()));
        ReconciliationEngine::new(
            Arc::new(devices),
            Arc::new(gateway),
            matcher,
            billing,
            Arc::new(audit),
            ReconciliationEngineConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_orphaned_and_consistent_classification_counts() {
        // Five subscribers; two of them have no billing match
        let mut gateway = MockDeviceGateway::new();
        gateway.expect_list_subscribers().returning(|device_id| {
            Ok((1..=5)
                .map(|n| subscriber_n(device_id, n, &format!("Customer {}", n)))
                .collect())
        });
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok((1..=5).map(|n| endpoint_n(device_id, n, true)).collect()));

        let mut billing = MockBillingClient::new();
        billing.expect_find_inventory_by_mac().returning(|mac| {
            let n = mac.octets()[5];
            if n <= 3 {
                Ok(Some(match_for(
                    n,
                    &format!("Customer {}", n),
                    BillingServiceStatus::Active,
                )))
            } else {
                Ok(None)
            }
        });
        billing.expect_file_ticket().times(1).returning(|_, _| Ok(()));

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        assert_eq!(report.devices.len(), 1);
        let device = &report.devices[0];
        assert_eq!(device.status, DeviceRunStatus::Completed);
        assert_eq!(device.consistent, 3);
        assert_eq!(device.mismatches.len(), 2);
        assert!(device
            .mismatches
            .iter()
            .all(|m| m.category == MismatchCategory::Orphaned));
        assert!(device.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_name_drift_classification() {
        let mut gateway = MockDeviceGateway::new();
        gateway
            .expect_list_subscribers()
            .returning(|device_id| Ok(vec![subscriber_n(device_id, 1, "Old Name")]));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true)]));

        let mut billing = MockBillingClient::new();
        billing
            .expect_find_inventory_by_mac()
            .returning(|_| Ok(Some(match_for(1, "New Name", BillingServiceStatus::Active))));
        billing.expect_file_ticket().times(1).returning(|_, _| Ok(()));

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        let device = &report.devices[0];
        assert_eq!(device.mismatches.len(), 1);
        assert_eq!(device.mismatches[0].category, MismatchCategory::NameDrift);
        assert!(device.mismatches[0].detail.contains("Old Name"));
        assert!(device.mismatches[0].detail.contains("New Name"));
    }

    #[tokio::test]
    async fn test_transient_lookup_skips_one_subscriber_not_the_device() {
        let mut gateway = MockDeviceGateway::new();
        gateway.expect_list_subscribers().returning(|device_id| {
            Ok((1..=3)
                .map(|n| subscriber_n(device_id, n, &format!("Customer {}", n)))
                .collect())
        });
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok((1..=3).map(|n| endpoint_n(device_id, n, true)).collect()));

        let mut billing = MockBillingClient::new();
        billing.expect_find_inventory_by_mac().returning(|mac| {
            let n = mac.octets()[5];
            if n == 2 {
                Err(DomainError::Transient("billing timeout".to_string()))
            } else {
                Ok(Some(match_for(
                    n,
                    &format!("Customer {}", n),
                    BillingServiceStatus::Active,
                )))
            }
        });

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        let device = &report.devices[0];
        assert_eq!(device.status, DeviceRunStatus::Completed);
        assert_eq!(device.consistent, 2);
        assert_eq!(device.skipped.len(), 1);
        assert_eq!(device.skipped[0].mac, mac_n(2));
        assert!(device.mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_but_billed_detection() {
        let mut gateway = MockDeviceGateway::new();
        // No subscribers; one live endpoint with an active billed service
        gateway
            .expect_list_subscribers()
            .returning(|_| Ok(Vec::new()));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true), endpoint_n(device_id, 2, false)]));

        let mut billing = MockBillingClient::new();
        billing
            .expect_find_inventory_by_mac()
            .times(1)
            .returning(|_| Ok(Some(match_for(1, "Customer 1", BillingServiceStatus::Active))));
        billing.expect_file_ticket().times(1).returning(|_, _| Ok(()));

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        let device = &report.devices[0];
        assert_eq!(device.mismatches.len(), 1);
        assert_eq!(
            device.mismatches[0].category,
            MismatchCategory::UnprovisionedButBilled
        );
    }

    #[tokio::test]
    async fn test_suspended_service_is_not_flagged_as_billed() {
        let mut gateway = MockDeviceGateway::new();
        gateway
            .expect_list_subscribers()
            .returning(|_| Ok(Vec::new()));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true)]));

        let mut billing = MockBillingClient::new();
        billing.expect_find_inventory_by_mac().returning(|_| {
            Ok(Some(match_for(
                1,
                "Customer 1",
                BillingServiceStatus::Suspended,
            )))
        });

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        assert!(report.devices[0].mismatches.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_device_does_not_abort_siblings() {
        let mut repo = MockGamDeviceRepository::new();
        repo.expect_list_devices().returning(|| {
            Ok(vec![
                GamDevice {
                    device_id: "dev-bad".to_string(),
                    name: "bad".to_string(),
                    address: "10.0.0.1".to_string(),
                },
                GamDevice {
                    device_id: "dev-good".to_string(),
                    name: "good".to_string(),
                    address: "10.0.0.2".to_string(),
                },
            ])
        });

        let mut gateway = MockDeviceGateway::new();
        gateway
            .expect_list_subscribers()
            .withf(|device_id| device_id == "dev-bad")
            .returning(|_| Err(DomainError::Transient("device unreachable".to_string())));
        gateway
            .expect_list_subscribers()
            .withf(|device_id| device_id == "dev-good")
            .returning(|device_id| Ok(vec![subscriber_n(device_id, 1, "Customer 1")]));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true)]));

        let mut billing = MockBillingClient::new();
        billing
            .expect_find_inventory_by_mac()
            .returning(|_| Ok(Some(match_for(1, "Customer 1", BillingServiceStatus::Active))));

        let engine = engine(repo, gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        assert_eq!(report.devices.len(), 2);
        let bad = report
            .devices
            .iter()
            .find(|d| d.device_id == "dev-bad")
            .unwrap();
        let good = report
            .devices
            .iter()
            .find(|d| d.device_id == "dev-good")
            .unwrap();
        assert!(matches!(bad.status, DeviceRunStatus::Failed(_)));
        assert_eq!(good.status, DeviceRunStatus::Completed);
        assert_eq!(good.consistent, 1);
    }

    #[tokio::test]
    async fn test_ticket_failure_is_a_warning_not_an_error() {
        let mut gateway = MockDeviceGateway::new();
        gateway
            .expect_list_subscribers()
            .returning(|device_id| Ok(vec![subscriber_n(device_id, 1, "Customer 1")]));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true)]));

        let mut billing = MockBillingClient::new();
        billing
            .expect_find_inventory_by_mac()
            .returning(|_| Ok(None));
        billing
            .expect_file_ticket()
            .returning(|_, _| Err(DomainError::Transient("ticketing down".to_string())));

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let report = engine.run("run-1", &CancellationToken::new()).await.unwrap();

        let device = &report.devices[0];
        assert_eq!(device.status, DeviceRunStatus::Completed);
        assert_eq!(device.mismatches.len(), 1);
        assert!(device.ticket_error.is_some());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("ticketing down"));
    }

    #[tokio::test]
    async fn test_cancelled_run_discards_mismatch_batch() {
        let mut gateway = MockDeviceGateway::new();
        gateway
            .expect_list_subscribers()
            .returning(|device_id| Ok(vec![subscriber_n(device_id, 1, "Customer 1")]));
        gateway
            .expect_list_endpoints()
            .returning(|device_id| Ok(vec![endpoint_n(device_id, 1, true)]));

        let mut billing = MockBillingClient::new();
        billing
            .expect_find_inventory_by_mac()
            .returning(|_| Ok(None));
        // file_ticket must never be called for a cancelled run
        billing.expect_file_ticket().times(0);

        let engine = engine(single_device_repo("dev-1"), gateway, billing);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = engine.run("run-1", &cancel).await.unwrap();
        let device = &report.devices[0];
        assert_eq!(device.status, DeviceRunStatus::Cancelled);
        assert!(device.mismatches.is_empty());
    }
}
