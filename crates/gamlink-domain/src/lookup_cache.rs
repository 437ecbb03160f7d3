use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::billing::BillingMatch;
use crate::clock::Clock;
use crate::mac::MacAddr;

/// Outcome of an inventory lookup attempt for a MAC.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Authoritative resolution, cached until explicitly invalidated.
    Found(BillingMatch),
    /// Billing has no record; suppress lookups until the retry window ends.
    NotFound,
}

/// Transient record of a matcher query for a MAC. Never mutated, only
/// superseded or evicted.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupAttempt {
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
    /// Not-found attempts expire; found attempts carry no deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LookupAttempt {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Keyed store of per-MAC lookup attempts with TTL semantics.
///
/// Last-write-wins per MAC, with one invariant: a live `Found` attempt is
/// never overwritten by a later `NotFound` — a successful resolution cannot
/// regress without an explicit invalidation. Expired attempts are evicted
/// lazily on the next read for that MAC.
pub struct AttemptCache {
    clock: Arc<dyn Clock>,
    retry_window: Duration,
    attempts: RwLock<HashMap<MacAddr, LookupAttempt>>,
}

impl AttemptCache {
    pub fn new(clock: Arc<dyn Clock>, retry_window: Duration) -> Self {
        Self {
            clock,
            retry_window,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, mac: &MacAddr) -> Option<LookupAttempt> {
        let now = self.clock.now();
        let mut attempts = self.attempts.write().await;
        let expired = attempts
            .get(mac)
            .map(|attempt| attempt.is_expired(now))
            .unwrap_or(false);
        if expired {
            attempts.remove(mac);
            return None;
        }
        attempts.get(mac).cloned()
    }

    pub async fn record_found(&self, mac: MacAddr, billing_match: BillingMatch) {
        let now = self.clock.now();
        let mut attempts = self.attempts.write().await;
        attempts.insert(
            mac,
            LookupAttempt {
                outcome: AttemptOutcome::Found(billing_match),
                recorded_at: now,
                expires_at: None,
            },
        );
    }

    pub async fn record_not_found(&self, mac: MacAddr) {
        let now = self.clock.now();
        let mut attempts = self.attempts.write().await;

        if let Some(existing) = attempts.get(&mac) {
            if matches!(existing.outcome, AttemptOutcome::Found(_)) && !existing.is_expired(now) {
                return;
            }
        }

        attempts.insert(
            mac,
            LookupAttempt {
                outcome: AttemptOutcome::NotFound,
                recorded_at: now,
                expires_at: Some(now + self.retry_window),
            },
        );
    }

    pub async fn invalidate(&self, mac: &MacAddr) {
        let mut attempts = self.attempts.write().await;
        attempts.remove(mac);
    }

    pub async fn len(&self) -> usize {
        let attempts = self.attempts.read().await;
        attempts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::BillingInventoryItem;
    use crate::clock::ManualClock;

    fn mac() -> MacAddr {
        "aa:bb:cc:00:11:22".parse().unwrap()
    }

    fn billing_match() -> BillingMatch {
        BillingMatch {
            inventory: BillingInventoryItem {
                item_id: "item-1".to_string(),
                mac: mac(),
                model: None,
            },
            customer: None,
            services: Vec::new(),
        }
    }

    fn cache_with_clock() -> (Arc<ManualClock>, AttemptCache) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = AttemptCache::new(clock.clone(), Duration::hours(24));
        (clock, cache)
    }

    #[tokio::test]
    async fn test_not_found_expires_after_retry_window() {
        let (clock, cache) = cache_with_clock();

        cache.record_not_found(mac()).await;
        assert!(cache.get(&mac()).await.is_some());

        clock.advance(Duration::hours(23));
        assert!(cache.get(&mac()).await.is_some());

        clock.advance(Duration::hours(2));
        assert!(cache.get(&mac()).await.is_none());
        // Lazy eviction removed the expired attempt
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_found_never_expires() {
        let (clock, cache) = cache_with_clock();

        cache.record_found(mac(), billing_match()).await;
        clock.advance(Duration::days(365));

        let attempt = cache.get(&mac()).await.unwrap();
        assert!(matches!(attempt.outcome, AttemptOutcome::Found(_)));
    }

    #[tokio::test]
    async fn test_found_is_not_overwritten_by_not_found() {
        let (_clock, cache) = cache_with_clock();

        cache.record_found(mac(), billing_match()).await;
        cache.record_not_found(mac()).await;

        let attempt = cache.get(&mac()).await.unwrap();
        assert!(matches!(attempt.outcome, AttemptOutcome::Found(_)));
    }

    #[tokio::test]
    async fn test_invalidate_allows_regression() {
        let (_clock, cache) = cache_with_clock();

        cache.record_found(mac(), billing_match()).await;
        cache.invalidate(&mac()).await;
        cache.record_not_found(mac()).await;

        let attempt = cache.get(&mac()).await.unwrap();
        assert_eq!(attempt.outcome, AttemptOutcome::NotFound);
    }
}
