use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainResult;

/// Endpoint-scoped provisioning state.
///
/// Transitions only move forward, except `Failed`, which re-enters
/// `Configuring` on retry. `Provisioned` is terminal until an explicit
/// unprovision request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Unprovisioned,
    Configuring,
    SubscriberPending,
    Provisioned,
    Failed,
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProvisioningState::Unprovisioned => "unprovisioned",
            ProvisioningState::Configuring => "configuring",
            ProvisioningState::SubscriberPending => "subscriber_pending",
            ProvisioningState::Provisioned => "provisioned",
            ProvisioningState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRecord {
    pub endpoint_id: String,
    pub state: ProvisioningState,
    /// Device-side subscriber created for this endpoint, once provisioned.
    pub subscriber_id: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProvisioningRecord {
    pub fn unprovisioned(endpoint_id: &str) -> Self {
        Self {
            endpoint_id: endpoint_id.to_string(),
            state: ProvisioningState::Unprovisioned,
            subscriber_id: None,
            last_error: None,
            updated_at: None,
        }
    }
}

/// Store for per-endpoint provisioning state.
///
/// `transition` is a single atomic compare-and-set: of two concurrent
/// callers, exactly one observes an allowed current state and wins; the
/// loser gets `PreconditionFailed`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ProvisioningStateStore: Send + Sync {
    /// Get the record for an endpoint; endpoints with no history are
    /// `Unprovisioned`.
    async fn get(&self, endpoint_id: &str) -> DomainResult<ProvisioningRecord>;

    /// Atomically move to `to` if the current state is in `allowed_from`,
    /// returning the previous state. `PreconditionFailed` otherwise.
    async fn transition(
        &self,
        endpoint_id: &str,
        allowed_from: &[ProvisioningState],
        to: ProvisioningState,
    ) -> DomainResult<ProvisioningState>;

    /// Record or clear the device-side subscriber linkage
    async fn set_subscriber(
        &self,
        endpoint_id: &str,
        subscriber_id: Option<String>,
    ) -> DomainResult<()>;

    /// Record or clear the causal error for a failed endpoint
    async fn set_error(&self, endpoint_id: &str, error: Option<String>) -> DomainResult<()>;
}
