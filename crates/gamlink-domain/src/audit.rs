use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DomainResult;
use crate::provisioning_state_store::ProvisioningState;

/// Events consumed by the external audit collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditEvent {
    StateTransition {
        endpoint_id: String,
        from: ProvisioningState,
        to: ProvisioningState,
        actor: String,
    },
    ReconciliationStarted {
        run_id: String,
    },
    ReconciliationFinished {
        run_id: String,
        mismatches: usize,
    },
}

/// Fire-and-forget audit sink; callers log failures and never propagate them.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent) -> DomainResult<()>;
}

/// Default sink that emits audit events as structured log lines.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: AuditEvent) -> DomainResult<()> {
        info!(event = ?event, "audit");
        Ok(())
    }
}
