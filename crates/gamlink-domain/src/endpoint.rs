use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DomainResult;
use crate::mac::MacAddr;

/// Physical CPE endpoint as seen by a GAM device port.
///
/// Created when first detected by the device gateway and updated on every
/// telemetry refresh. A detached endpoint is represented by `live = false`,
/// never by deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub endpoint_id: String,
    pub device_id: String,
    pub mac: MacAddr,
    /// Device-detected port; provisioning requires one.
    pub port_index: Option<u32>,
    pub live: bool,
    pub oper_state: OperationalState,
    /// Configured-name linkage to a device-side subscriber, if any.
    pub subscriber_name: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Closed classification of the device's free-text operational state tag.
///
/// The mapping happens at the device gateway boundary; nothing downstream
/// pattern-matches on free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationalState {
    Live,
    Quarantined,
    Unknown,
    Error(String),
}

impl OperationalState {
    pub fn from_tag(tag: &str) -> Self {
        let normalized = tag.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "up" | "online" | "active" | "live" | "in-service" => OperationalState::Live,
            "quarantine" | "quarantined" | "isolated" | "blocked" => OperationalState::Quarantined,
            "" | "unknown" => OperationalState::Unknown,
            _ if normalized.starts_with("err")
                || normalized.starts_with("fault")
                || normalized.starts_with("alarm") =>
            {
                OperationalState::Error(tag.trim().to_string())
            }
            _ => OperationalState::Unknown,
        }
    }
}

/// Repository trait for detected endpoints.
/// Infrastructure implements this; an in-memory implementation is provided.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// Get an endpoint by ID
    async fn get_endpoint(&self, endpoint_id: &str) -> DomainResult<Option<Endpoint>>;

    /// Insert or update an endpoint from a telemetry refresh
    async fn upsert_endpoint(&self, endpoint: Endpoint) -> DomainResult<Endpoint>;

    /// List live endpoints attached to a device
    async fn list_live_endpoints(&self, device_id: &str) -> DomainResult<Vec<Endpoint>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_maps_known_states() {
        assert_eq!(OperationalState::from_tag("online"), OperationalState::Live);
        assert_eq!(OperationalState::from_tag(" UP "), OperationalState::Live);
        assert_eq!(
            OperationalState::from_tag("Quarantined"),
            OperationalState::Quarantined
        );
        assert_eq!(OperationalState::from_tag(""), OperationalState::Unknown);
        assert_eq!(
            OperationalState::from_tag("something-new"),
            OperationalState::Unknown
        );
    }

    #[test]
    fn test_from_tag_keeps_error_detail() {
        assert_eq!(
            OperationalState::from_tag("fault: los on port 3"),
            OperationalState::Error("fault: los on port 3".to_string())
        );
    }
}
