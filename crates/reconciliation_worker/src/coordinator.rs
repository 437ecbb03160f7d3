use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use gamlink_domain::{
    DomainError, DomainResult, Endpoint, EndpointRepository, InventoryMatcher, LookupResult,
    ProvisionOutcome, ProvisioningService, ReconciliationEngine,
};

use crate::run_status::{ReconciliationStatus, RunFailure, RunState, RunSummary};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Provision newly detected, billing-matched endpoints automatically
    pub auto_provision: bool,
}

struct StatusInner {
    state: RunState,
    last_success: Option<RunSummary>,
    last_failure: Option<RunFailure>,
}

struct RunHandle {
    run_id: String,
    token: CancellationToken,
    join: JoinHandle<()>,
}

/// Owns the reconciliation cadence's execution side and the interactive
/// entry points exposed to the administration console.
///
/// At most one reconciliation run executes at a time: a new trigger
/// colliding with an overrunning run cancels the old run and waits for it
/// to discard its in-flight batches before starting the new one.
pub struct Coordinator {
    engine: Arc<ReconciliationEngine>,
    matcher: Arc<InventoryMatcher>,
    provisioning: Arc<ProvisioningService>,
    endpoints: Arc<dyn EndpointRepository>,
    config: CoordinatorConfig,
    status: Arc<RwLock<StatusInner>>,
    current_run: Mutex<Option<RunHandle>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(
        engine: Arc<ReconciliationEngine>,
        matcher: Arc<InventoryMatcher>,
        provisioning: Arc<ProvisioningService>,
        endpoints: Arc<dyn EndpointRepository>,
        config: CoordinatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            matcher,
            provisioning,
            endpoints,
            config,
            status: Arc::new(RwLock::new(StatusInner {
                state: RunState::Idle,
                last_success: None,
                last_failure: None,
            })),
            current_run: Mutex::new(None),
            shutdown,
        }
    }

    /// Start a reconciliation run now, cancelling an overrunning one.
    /// Returns the new run's id; the run executes in the background.
    #[instrument(skip(self))]
    pub async fn trigger_reconciliation_now(&self) -> DomainResult<String> {
        let mut current = self.current_run.lock().await;

        if let Some(handle) = current.take() {
            if handle.join.is_finished() {
                let _ = handle.join.await;
            } else {
                warn!(
                    run_id = %handle.run_id,
                    "previous reconciliation run still in progress, cancelling"
                );
                handle.token.cancel();
                if let Err(e) = handle.join.await {
                    error!("reconciliation task panicked: {}", e);
                }
            }
        }

        let run_id = xid::new().to_string();
        let token = self.shutdown.child_token();
        let started_at = Utc::now();

        {
            let mut status = self.status.write().await;
            status.state = RunState::InProgress {
                run_id: run_id.clone(),
                started_at,
            };
        }

        let engine = self.engine.clone();
        let status = self.status.clone();
        let task_run_id = run_id.clone();
        let task_token = token.clone();

        let join = tokio::spawn(async move {
            let result = engine.run(&task_run_id, &task_token).await;

            let mut status = status.write().await;
            status.state = RunState::Idle;
            match result {
                Ok(_) if task_token.is_cancelled() => {
                    info!(run_id = %task_run_id, "reconciliation run cancelled");
                }
                Ok(report) => {
                    status.last_success = Some(RunSummary::from(&report));
                }
                Err(e) => {
                    error!(run_id = %task_run_id, "reconciliation run failed: {}", e);
                    status.last_failure = Some(RunFailure {
                        run_id: task_run_id.clone(),
                        at: Utc::now(),
                        error: e.to_string(),
                    });
                }
            }
        });

        *current = Some(RunHandle {
            run_id: run_id.clone(),
            token,
            join,
        });

        info!(run_id = %run_id, "reconciliation run started");
        Ok(run_id)
    }

    pub async fn reconciliation_status(&self) -> ReconciliationStatus {
        let status = self.status.read().await;
        ReconciliationStatus {
            state: status.state.clone(),
            last_success: status.last_success.clone(),
            last_failure: status.last_failure.clone(),
        }
    }

    /// Resolve a detected endpoint against billing, interactively.
    #[instrument(skip(self), fields(endpoint_id = %endpoint_id))]
    pub async fn lookup_now(&self, endpoint_id: &str) -> DomainResult<LookupResult> {
        let endpoint = self
            .endpoints
            .get_endpoint(endpoint_id)
            .await?
            .ok_or_else(|| DomainError::EndpointNotFound(endpoint_id.to_string()))?;
        self.matcher.lookup(&endpoint.mac).await
    }

    pub async fn provision_now(
        &self,
        endpoint_id: &str,
        actor: &str,
    ) -> DomainResult<ProvisionOutcome> {
        self.provisioning.provision(endpoint_id, actor).await
    }

    pub async fn unprovision_now(&self, endpoint_id: &str, actor: &str) -> DomainResult<()> {
        self.provisioning.unprovision(endpoint_id, actor).await
    }

    /// Handle a newly detected endpoint reported by the device gateway.
    ///
    /// Starts a fresh detection cycle for the MAC (dropping any cached
    /// billing attempt) and, when auto-provision is on, provisions the
    /// endpoint if billing resolves it. Auto-provision failures are logged
    /// and reported as `None`, never escalated.
    #[instrument(skip(self, endpoint), fields(endpoint_id = %endpoint.endpoint_id, mac = %endpoint.mac))]
    pub async fn handle_endpoint_detected(
        &self,
        endpoint: Endpoint,
    ) -> DomainResult<Option<ProvisionOutcome>> {
        let endpoint = self.endpoints.upsert_endpoint(endpoint).await?;
        self.matcher.invalidate(&endpoint.mac).await;

        if !self.config.auto_provision {
            return Ok(None);
        }
        if !endpoint.live || endpoint.port_index.is_none() {
            debug!("endpoint not provisionable yet, skipping auto-provision");
            return Ok(None);
        }

        match self
            .provisioning
            .provision(&endpoint.endpoint_id, "auto-provision")
            .await
        {
            Ok(outcome) => Ok(Some(outcome)),
            Err(DomainError::PreconditionFailed(reason)) => {
                debug!(%reason, "auto-provision skipped");
                Ok(None)
            }
            Err(e) if e.is_transient() => {
                warn!("auto-provision deferred: {}", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel any in-flight run and wait for it to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut current = self.current_run.lock().await;
        if let Some(handle) = current.take() {
            handle.token.cancel();
            if let Err(e) = handle.join.await {
                error!("reconciliation task panicked: {}", e);
            }
        }
    }
}
