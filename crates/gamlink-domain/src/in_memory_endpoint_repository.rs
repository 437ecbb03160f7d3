use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::endpoint::{Endpoint, EndpointRepository};
use crate::error::DomainResult;

/// In-memory implementation of EndpointRepository using HashMap
pub struct InMemoryEndpointRepository {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl InMemoryEndpointRepository {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryEndpointRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EndpointRepository for InMemoryEndpointRepository {
    async fn get_endpoint(&self, endpoint_id: &str) -> DomainResult<Option<Endpoint>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints.get(endpoint_id).cloned())
    }

    async fn upsert_endpoint(&self, endpoint: Endpoint) -> DomainResult<Endpoint> {
        let mut endpoints = self.endpoints.write().await;
        endpoints.insert(endpoint.endpoint_id.clone(), endpoint.clone());
        Ok(endpoint)
    }

    async fn list_live_endpoints(&self, device_id: &str) -> DomainResult<Vec<Endpoint>> {
        let endpoints = self.endpoints.read().await;
        Ok(endpoints
            .values()
            .filter(|e| e.device_id == device_id && e.live)
            .cloned()
            .collect())
    }
}
