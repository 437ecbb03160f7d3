use chrono::{DateTime, Utc};

use gamlink_domain::ReconciliationRunReport;

/// Whether a reconciliation run is currently executing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    InProgress {
        run_id: String,
        started_at: DateTime<Utc>,
    },
}

/// Condensed result of the last completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices: usize,
    pub failed_devices: usize,
    pub mismatches: usize,
    pub warnings: Vec<String>,
}

impl From<&ReconciliationRunReport> for RunSummary {
    fn from(report: &ReconciliationRunReport) -> Self {
        Self {
            run_id: report.run_id.clone(),
            started_at: report.started_at,
            finished_at: report.finished_at,
            devices: report.devices.len(),
            failed_devices: report.failed_devices(),
            mismatches: report.total_mismatches(),
            warnings: report.warnings.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub run_id: String,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// Per-run observability surface exposed to the administration console.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationStatus {
    pub state: RunState,
    pub last_success: Option<RunSummary>,
    pub last_failure: Option<RunFailure>,
}
