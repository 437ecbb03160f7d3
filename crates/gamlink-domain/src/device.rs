use async_trait::async_trait;

use crate::error::DomainResult;

/// GAM device fleet entry enumerated by a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamDevice {
    pub device_id: String,
    pub name: String,
    pub address: String,
}

/// Repository trait for the managed device fleet.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait GamDeviceRepository: Send + Sync {
    /// List all managed devices
    async fn list_devices(&self) -> DomainResult<Vec<GamDevice>>;
}
