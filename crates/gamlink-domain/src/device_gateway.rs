use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::endpoint::Endpoint;
use crate::error::{DomainError, DomainResult};
use crate::subscriber::{NewSubscriber, Subscriber};

/// Result of a device-side endpoint configuration push.
///
/// `already_configured` is the device reporting the configuration exists;
/// callers absorb it as success so retries never duplicate configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigureOutcome {
    pub already_configured: bool,
}

/// Gateway to a GAM device's management plane.
///
/// Definitive configuration rejections surface as
/// `DomainError::DeviceRejected`; unreachability and timeouts surface as
/// `DomainError::Transient`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// List endpoints detected on a device
    async fn list_endpoints(&self, device_id: &str) -> DomainResult<Vec<Endpoint>>;

    /// List subscribers provisioned on a device
    async fn list_subscribers(&self, device_id: &str) -> DomainResult<Vec<Subscriber>>;

    /// Push endpoint configuration (provisioning phase 1)
    async fn configure_endpoint(
        &self,
        endpoint_id: &str,
        port_index: u32,
    ) -> DomainResult<ConfigureOutcome>;

    /// Create a subscriber on the device (provisioning phase 2)
    async fn create_subscriber(&self, subscriber: NewSubscriber) -> DomainResult<Subscriber>;

    /// Delete a device-side subscriber
    async fn delete_subscriber(&self, subscriber_id: &str) -> DomainResult<()>;
}

/// Decorator enforcing a per-request deadline on device calls.
/// An elapsed deadline is a transient error.
pub struct TimeoutDeviceGateway {
    inner: Arc<dyn DeviceGateway>,
    timeout: Duration,
}

impl TimeoutDeviceGateway {
    pub fn new(inner: Arc<dyn DeviceGateway>, timeout: Duration) -> Self {
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
                "device {} timed out after {:?}",
                operation, self.timeout
            ))),
        }
    }
}

#[async_trait]
impl DeviceGateway for TimeoutDeviceGateway {
    async fn list_endpoints(&self, device_id: &str) -> DomainResult<Vec<Endpoint>> {
        self.deadline("list_endpoints", self.inner.list_endpoints(device_id))
            .await
    }

    async fn list_subscribers(&self, device_id: &str) -> DomainResult<Vec<Subscriber>> {
        self.deadline("list_subscribers", self.inner.list_subscribers(device_id))
            .await
    }

    async fn configure_endpoint(
        &self,
        endpoint_id: &str,
        port_index: u32,
    ) -> DomainResult<ConfigureOutcome> {
        self.deadline(
            "configure_endpoint",
            self.inner.configure_endpoint(endpoint_id, port_index),
        )
        .await
    }

    async fn create_subscriber(&self, subscriber: NewSubscriber) -> DomainResult<Subscriber> {
        self.deadline("create_subscriber", self.inner.create_subscriber(subscriber))
            .await
    }

    async fn delete_subscriber(&self, subscriber_id: &str) -> DomainResult<()> {
        self.deadline("delete_subscriber", self.inner.delete_subscriber(subscriber_id))
            .await
    }
}
