//! Scheduling and coordination for the reconciliation engine: daily runs
//! with overrun cancellation, bounded device concurrency (owned by the
//! engine), and the synchronous entry points used by the administration
//! console.

pub mod coordinator;
pub mod run_status;
pub mod scheduler;

pub use coordinator::{Coordinator, CoordinatorConfig};
pub use run_status::{ReconciliationStatus, RunFailure, RunState, RunSummary};
pub use scheduler::{ReconciliationScheduler, SchedulerConfig};
