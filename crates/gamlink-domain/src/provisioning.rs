use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::audit::{AuditEvent, AuditSink};
use crate::device_gateway::DeviceGateway;
use crate::endpoint::EndpointRepository;
use crate::error::{DomainError, DomainResult};
use crate::inventory_matcher::{InventoryMatcher, LookupResult};
use crate::provisioning_state_store::{ProvisioningState, ProvisioningStateStore};
use crate::subscriber::{NewSubscriber, ServiceProfile};

/// Service parameters applied when billing carries no usable tariff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionDefaults {
    pub vlan: u16,
    pub bandwidth_profile: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionPhase {
    Configure,
    CreateSubscriber,
}

impl fmt::Display for ProvisionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionPhase::Configure => f.write_str("configure"),
            ProvisionPhase::CreateSubscriber => f.write_str("create_subscriber"),
        }
    }
}

/// Terminal result of a provisioning attempt. Precondition violations are
/// returned as errors instead; a `Failed` state here always names the phase
/// that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionOutcome {
    pub endpoint_id: String,
    pub state: ProvisioningState,
    pub failed_phase: Option<ProvisionPhase>,
    pub error: Option<String>,
}

/// Drives an endpoint from `Unprovisioned` to `Provisioned` through
/// device-side configuration and subscriber creation.
///
/// Provisioning is a two-phase operation against a device without
/// multi-step transactions, so each phase is idempotent: a device reporting
/// "already configured" in phase 1 is absorbed as success, and re-entry
/// after a phase 2 failure repeats phase 1 harmlessly. The check-and-enter
/// into `Configuring` is a single compare-and-set, so of two concurrent
/// callers exactly one drives the device.
pub struct ProvisioningService {
    gateway: Arc<dyn DeviceGateway>,
    matcher: Arc<InventoryMatcher>,
    endpoints: Arc<dyn EndpointRepository>,
    states: Arc<dyn ProvisioningStateStore>,
    audit: Arc<dyn AuditSink>,
    defaults: ProvisionDefaults,
}

impl ProvisioningService {
    pub fn new(
        gateway: Arc<dyn DeviceGateway>,
        matcher: Arc<InventoryMatcher>,
        endpoints: Arc<dyn EndpointRepository>,
        states: Arc<dyn ProvisioningStateStore>,
        audit: Arc<dyn AuditSink>,
        defaults: ProvisionDefaults,
    ) -> Self {
        Self {
            gateway,
            matcher,
            endpoints,
            states,
            audit,
            defaults,
        }
    }

    /// Provision an endpoint.
    ///
    /// Requires a detected port, a billing match and a current state of
    /// `Unprovisioned` or `Failed`; anything else is `PreconditionFailed`.
    /// Phase failures park the endpoint in `Failed` with the causal error
    /// recorded, and the outcome names the failing phase.
    #[instrument(skip(self), fields(endpoint_id = %endpoint_id, actor = %actor))]
    pub async fn provision(
        &self,
        endpoint_id: &str,
        actor: &str,
    ) -> DomainResult<ProvisionOutcome> {
        let endpoint = self
            .endpoints
            .get_endpoint(endpoint_id)
            .await?
            .ok_or_else(|| DomainError::EndpointNotFound(endpoint_id.to_string()))?;

        let port_index = endpoint.port_index.ok_or_else(|| {
            DomainError::PreconditionFailed(format!(
                "endpoint {} has no detected port",
                endpoint_id
            ))
        })?;

        let resolution = self.matcher.lookup(&endpoint.mac).await?;
        if !resolution.found {
            return Err(DomainError::PreconditionFailed(format!(
                "no billing inventory match for {}",
                endpoint.mac
            )));
        }
        let customer = resolution.customer.clone().ok_or_else(|| {
            DomainError::PreconditionFailed(format!(
                "billing inventory for {} has no linked customer",
                endpoint.mac
            ))
        })?;

        // Atomic entry point; a concurrent caller loses here with no
        // device calls made
        let previous = self
            .states
            .transition(
                endpoint_id,
                &[ProvisioningState::Unprovisioned, ProvisioningState::Failed],
                ProvisioningState::Configuring,
            )
            .await?;
        self.record_transition(endpoint_id, previous, ProvisioningState::Configuring, actor)
            .await;

        // Phase 1: endpoint configuration
        match self.gateway.configure_endpoint(endpoint_id, port_index).await {
            Ok(outcome) => {
                if outcome.already_configured {
                    info!("device reports endpoint already configured, absorbing as success");
                }
            }
            Err(e) => {
                return self
                    .fail(endpoint_id, ProvisionPhase::Configure, e, actor)
                    .await;
            }
        }

        let previous = self
            .states
            .transition(
                endpoint_id,
                &[ProvisioningState::Configuring],
                ProvisioningState::SubscriberPending,
            )
            .await?;
        self.record_transition(
            endpoint_id,
            previous,
            ProvisioningState::SubscriberPending,
            actor,
        )
        .await;

        // Phase 2: subscriber creation with the canonical payload
        let payload = NewSubscriber {
            device_id: endpoint.device_id.clone(),
            mac: endpoint.mac,
            name: customer.name.clone(),
            address: customer.address.clone(),
            profile: self.service_profile(&resolution),
        };

        match self.gateway.create_subscriber(payload).await {
            Ok(subscriber) => {
                self.states
                    .set_subscriber(endpoint_id, Some(subscriber.subscriber_id.clone()))
                    .await?;
                self.states.set_error(endpoint_id, None).await?;
                let previous = self
                    .states
                    .transition(
                        endpoint_id,
                        &[ProvisioningState::SubscriberPending],
                        ProvisioningState::Provisioned,
                    )
                    .await?;
                self.record_transition(
                    endpoint_id,
                    previous,
                    ProvisioningState::Provisioned,
                    actor,
                )
                .await;

                info!(subscriber_id = %subscriber.subscriber_id, "endpoint provisioned");
                Ok(ProvisionOutcome {
                    endpoint_id: endpoint_id.to_string(),
                    state: ProvisioningState::Provisioned,
                    failed_phase: None,
                    error: None,
                })
            }
            Err(e) => {
                self.fail(endpoint_id, ProvisionPhase::CreateSubscriber, e, actor)
                    .await
            }
        }
    }

    /// Unprovision a `Provisioned` endpoint by deleting its device-side
    /// subscriber. If deletion fails the state stays `Provisioned` and the
    /// error surfaces, never an ambiguous intermediate.
    #[instrument(skip(self), fields(endpoint_id = %endpoint_id, actor = %actor))]
    pub async fn unprovision(&self, endpoint_id: &str, actor: &str) -> DomainResult<()> {
        let record = self.states.get(endpoint_id).await?;
        if record.state != ProvisioningState::Provisioned {
            return Err(DomainError::PreconditionFailed(format!(
                "endpoint {} is {}, expected provisioned",
                endpoint_id, record.state
            )));
        }
        let subscriber_id = record.subscriber_id.ok_or_else(|| {
            DomainError::PreconditionFailed(format!(
                "endpoint {} has no recorded subscriber",
                endpoint_id
            ))
        })?;

        self.gateway.delete_subscriber(&subscriber_id).await?;

        self.states.set_subscriber(endpoint_id, None).await?;
        let previous = self
            .states
            .transition(
                endpoint_id,
                &[ProvisioningState::Provisioned],
                ProvisioningState::Unprovisioned,
            )
            .await?;
        self.record_transition(
            endpoint_id,
            previous,
            ProvisioningState::Unprovisioned,
            actor,
        )
        .await;

        info!(subscriber_id = %subscriber_id, "endpoint unprovisioned");
        Ok(())
    }

    fn service_profile(&self, resolution: &LookupResult) -> ServiceProfile {
        let bandwidth_profile = resolution
            .services
            .iter()
            .find(|s| s.status == crate::billing::BillingServiceStatus::Active)
            .map(|s| s.tariff_name.clone())
            .unwrap_or_else(|| self.defaults.bandwidth_profile.clone());

        ServiceProfile {
            bandwidth_profile,
            vlan: self.defaults.vlan,
            poe_enabled: false,
        }
    }

    async fn fail(
        &self,
        endpoint_id: &str,
        phase: ProvisionPhase,
        error: DomainError,
        actor: &str,
    ) -> DomainResult<ProvisionOutcome> {
        warn!(phase = %phase, "provisioning failed: {}", error);

        let previous = self
            .states
            .transition(
                endpoint_id,
                &[
                    ProvisioningState::Configuring,
                    ProvisioningState::SubscriberPending,
                ],
                ProvisioningState::Failed,
            )
            .await?;
        self.states
            .set_error(endpoint_id, Some(error.to_string()))
            .await?;
        self.record_transition(endpoint_id, previous, ProvisioningState::Failed, actor)
            .await;

        Ok(ProvisionOutcome {
            endpoint_id: endpoint_id.to_string(),
            state: ProvisioningState::Failed,
            failed_phase: Some(phase),
            error: Some(error.to_string()),
        })
    }

    async fn record_transition(
        &self,
        endpoint_id: &str,
        from: ProvisioningState,
        to: ProvisioningState,
        actor: &str,
    ) {
        info!(
            endpoint_id = %endpoint_id,
            from = %from,
            to = %to,
            actor = %actor,
            "provisioning state transition"
        );
        let event = AuditEvent::StateTransition {
            endpoint_id: endpoint_id.to_string(),
            from,
            to,
            actor: actor.to_string(),
        };
        if let Err(e) = self.audit.record(event).await {
            warn!(endpoint_id = %endpoint_id, "failed to record audit event: {}", e);
        }
    }
}
