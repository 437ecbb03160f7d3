use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coordinator::Coordinator;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Wall-clock time of day (UTC) at which the daily run fires
    pub time_of_day: NaiveTime,
}

/// Fires a reconciliation run at the configured time every day.
///
/// Overrun handling lives in the coordinator: triggering while a previous
/// run is still executing cancels that run first.
pub struct ReconciliationScheduler {
    coordinator: Arc<Coordinator>,
    config: SchedulerConfig,
    shutdown: CancellationToken,
}

impl ReconciliationScheduler {
    pub fn new(
        coordinator: Arc<Coordinator>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop().await })
    }

    async fn run_loop(self) {
        loop {
            let now = Utc::now();
            let next = next_occurrence(now, self.config.time_of_day);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(next_run = %next, "reconciliation scheduled");

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.coordinator.trigger_reconciliation_now().await {
                Ok(run_id) => info!(run_id = %run_id, "scheduled reconciliation triggered"),
                Err(e) => error!("failed to trigger scheduled reconciliation: {}", e),
            }
        }

        info!("reconciliation scheduler stopped");
    }
}

/// Next strictly-future occurrence of a wall-clock time.
fn next_occurrence(now: DateTime<Utc>, time_of_day: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(time_of_day).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_next_occurrence_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 1, 0, 0).unwrap();
        let tod = NaiveTime::from_hms_opt(3, 30, 0).unwrap();

        let next = next_occurrence(now, tod);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 10, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 4, 0, 0).unwrap();
        let tod = NaiveTime::from_hms_opt(3, 30, 0).unwrap();

        let next = next_occurrence(now, tod);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 11, 3, 30, 0).unwrap());
    }

    #[test]
    fn test_next_occurrence_exact_now_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 3, 30, 0).unwrap();
        let tod = NaiveTime::from_hms_opt(3, 30, 0).unwrap();

        let next = next_occurrence(now, tod);
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 11, 3, 30, 0).unwrap());
    }
}
