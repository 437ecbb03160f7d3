use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::billing::{BillingClient, BillingCustomer, BillingInventoryItem, BillingMatch, BillingService};
use crate::error::DomainResult;
use crate::lookup_cache::{AttemptCache, AttemptOutcome};
use crate::mac::MacAddr;

/// Result of resolving a detected endpoint's MAC against billing.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub mac: MacAddr,
    pub found: bool,
    pub inventory: Option<BillingInventoryItem>,
    pub customer: Option<BillingCustomer>,
    pub services: Vec<BillingService>,
}

impl LookupResult {
    pub fn not_found(mac: MacAddr) -> Self {
        Self {
            mac,
            found: false,
            inventory: None,
            customer: None,
            services: Vec::new(),
        }
    }

    pub fn from_match(mac: MacAddr, billing_match: BillingMatch) -> Self {
        Self {
            mac,
            found: true,
            inventory: Some(billing_match.inventory),
            customer: billing_match.customer,
            services: billing_match.services,
        }
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.name.as_str())
    }

    pub fn has_active_service(&self) -> bool {
        self.services
            .iter()
            .any(|s| s.status == crate::billing::BillingServiceStatus::Active)
    }
}

/// Resolves a detected endpoint's MAC to a billing inventory item, customer
/// and active services, throttling repeat lookups for persistently
/// unmatched MACs through the attempt cache.
///
/// Never mutates device or billing state; attempt bookkeeping is the only
/// side effect.
pub struct InventoryMatcher {
    billing: Arc<dyn BillingClient>,
    cache: Arc<AttemptCache>,
}

impl InventoryMatcher {
    pub fn new(billing: Arc<dyn BillingClient>, cache: Arc<AttemptCache>) -> Self {
        Self { billing, cache }
    }

    /// Resolve a MAC, consulting the attempt cache first.
    ///
    /// A cached not-found inside its retry window answers without touching
    /// billing. Billing-side transient errors propagate and leave no
    /// attempt behind, so the next natural trigger retries.
    #[instrument(skip(self), fields(mac = %mac))]
    pub async fn lookup(&self, mac: &MacAddr) -> DomainResult<LookupResult> {
        if let Some(attempt) = self.cache.get(mac).await {
            match attempt.outcome {
                AttemptOutcome::Found(billing_match) => {
                    debug!("returning cached billing resolution");
                    return Ok(LookupResult::from_match(*mac, billing_match));
                }
                AttemptOutcome::NotFound => {
                    debug!("lookup suppressed inside retry window");
                    return Ok(LookupResult::not_found(*mac));
                }
            }
        }

        match self.billing.find_inventory_by_mac(mac).await {
            Ok(Some(billing_match)) => {
                debug!(item_id = %billing_match.inventory.item_id, "billing inventory matched");
                self.cache.record_found(*mac, billing_match.clone()).await;
                Ok(LookupResult::from_match(*mac, billing_match))
            }
            Ok(None) => {
                debug!("billing has no record, caching not-found");
                self.cache.record_not_found(*mac).await;
                Ok(LookupResult::not_found(*mac))
            }
            Err(e) => {
                warn!("billing lookup failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop any cached attempt for a MAC so the next lookup queries billing.
    /// Used by reconciliation and by a fresh endpoint detection cycle.
    pub async fn invalidate(&self, mac: &MacAddr) {
        self.cache.invalidate(mac).await;
    }
}
