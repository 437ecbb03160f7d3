use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{DomainError, DomainResult};
use crate::provisioning_state_store::{
    ProvisioningRecord, ProvisioningState, ProvisioningStateStore,
};

/// In-memory implementation of ProvisioningStateStore.
///
/// A single mutex guards the whole map so `transition` is a true
/// compare-and-set across concurrent callers.
pub struct InMemoryProvisioningStateStore {
    records: Mutex<HashMap<String, ProvisioningRecord>>,
}

impl InMemoryProvisioningStateStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryProvisioningStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProvisioningStateStore for InMemoryProvisioningStateStore {
    async fn get(&self, endpoint_id: &str) -> DomainResult<ProvisioningRecord> {
        let records = self.records.lock().await;
        Ok(records
            .get(endpoint_id)
            .cloned()
            .unwrap_or_else(|| ProvisioningRecord::unprovisioned(endpoint_id)))
    }

    async fn transition(
        &self,
        endpoint_id: &str,
        allowed_from: &[ProvisioningState],
        to: ProvisioningState,
    ) -> DomainResult<ProvisioningState> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(endpoint_id.to_string())
            .or_insert_with(|| ProvisioningRecord::unprovisioned(endpoint_id));

        if !allowed_from.contains(&record.state) {
            return Err(DomainError::PreconditionFailed(format!(
                "endpoint {} is {}, expected one of {:?}",
                endpoint_id, record.state, allowed_from
            )));
        }

        let previous = record.state;
        record.state = to;
        record.updated_at = Some(Utc::now());
        Ok(previous)
    }

    async fn set_subscriber(
        &self,
        endpoint_id: &str,
        subscriber_id: Option<String>,
    ) -> DomainResult<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(endpoint_id.to_string())
            .or_insert_with(|| ProvisioningRecord::unprovisioned(endpoint_id));
        record.subscriber_id = subscriber_id;
        Ok(())
    }

    async fn set_error(&self, endpoint_id: &str, error: Option<String>) -> DomainResult<()> {
        let mut records = self.records.lock().await;
        let record = records
            .entry(endpoint_id.to_string())
            .or_insert_with(|| ProvisioningRecord::unprovisioned(endpoint_id));
        record.last_error = error;
        Ok(())
    }
}
