use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{DomainError, DomainResult};
use crate::mac::MacAddr;
use crate::reconciliation::MismatchRecord;

/// Billing-system inventory record for a physical unit, keyed by MAC.
/// Read-only from this engine's perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingInventoryItem {
    pub item_id: String,
    pub mac: MacAddr,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingCustomer {
    pub customer_id: String,
    pub name: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingServiceStatus {
    Active,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingService {
    pub tariff_name: String,
    pub download_kbps: u32,
    pub upload_kbps: u32,
    pub status: BillingServiceStatus,
}

/// A successful billing-side resolution of a MAC: the inventory item plus
/// whatever customer and services are linked to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BillingMatch {
    pub inventory: BillingInventoryItem,
    pub customer: Option<BillingCustomer>,
    pub services: Vec<BillingService>,
}

impl BillingMatch {
    pub fn customer_name(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.name.as_str())
    }

    pub fn active_service(&self) -> Option<&BillingService> {
        self.services
            .iter()
            .find(|s| s.status == BillingServiceStatus::Active)
    }

    pub fn has_active_service(&self) -> bool {
        self.active_service().is_some()
    }
}

/// Client for the external billing/inventory system.
///
/// `Ok(None)` from `find_inventory_by_mac` is an authoritative not-found;
/// timeouts and 5xx-style failures surface as `DomainError::Transient` and
/// must never be treated as not-found.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// Resolve a MAC to its inventory item, customer and services
    async fn find_inventory_by_mac(&self, mac: &MacAddr) -> DomainResult<Option<BillingMatch>>;

    /// File a follow-up ticket for a device's mismatch set
    async fn file_ticket(&self, device_id: &str, mismatches: &[MismatchRecord])
        -> DomainResult<()>;
}

/// Decorator enforcing a per-request deadline on billing calls.
/// An elapsed deadline is a transient error, never a not-found.
pub struct TimeoutBillingClient {
    inner: Arc<dyn BillingClient>,
    timeout: Duration,
}

impl TimeoutBillingClient {
    pub fn new(inner: Arc<dyn BillingClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn deadline<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = DomainResult<T>> + Send,
    ) -> DomainResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(DomainError::Transient(format!(
                "billing {} timed out after {:?}",
                operation, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl BillingClient for TimeoutBillingClient {
    async fn find_inventory_by_mac(&self, mac: &MacAddr) -> DomainResult<Option<BillingMatch>> {
        self.deadline("find_inventory_by_mac", self.inner.find_inventory_by_mac(mac))
            .await
    }

    async fn file_ticket(
        &self,
        device_id: &str,
        mismatches: &[MismatchRecord],
    ) -> DomainResult<()> {
        self.deadline("file_ticket", self.inner.file_ticket(device_id, mismatches))
            .await
    }
}
