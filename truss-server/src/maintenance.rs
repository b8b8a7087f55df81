//! Background upkeep: stale-assignment requeuing, result flushing, and a
//! periodic status line.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{error, info};

use truss_core::Scheduler;

use crate::results::ResultsSink;
use crate::role::ConnectionRole;

#[derive(Debug, Clone)]
pub struct MaintenancePlan {
    pub interval: Duration,
    pub role: ConnectionRole,
    /// Requeue assignments older than this.
    pub assignment_timeout: Option<Duration>,
}

/// One maintenance pass. Returns (requeued, flushed).
pub async fn run_once(
    plan: &MaintenancePlan,
    scheduler: &Arc<Scheduler>,
    sink: &ResultsSink,
) -> (usize, usize) {
    let mut requeued = 0;
    let mut flushed = 0;

    match plan.role {
        ConnectionRole::Assignment => {
            if let Some(max_age) = plan.assignment_timeout {
                requeued = scheduler.requeue_stale(max_age);
            }
        }
        ConnectionRole::DropOff => match sink.flush(scheduler).await {
            Ok(Some((path, count))) => {
                info!(count, path = %path.display(), "results flushed");
                flushed = count;
            }
            Ok(None) => {}
            Err(e) => error!("results flush failed: {e}"),
        },
    }

    match scheduler.snapshot().to_json() {
        Ok(status) => info!(%status, "scheduler status"),
        Err(e) => error!("status snapshot failed: {e}"),
    }
    (requeued, flushed)
}

/// Run [`run_once`] every `plan.interval` until the task is aborted.
pub fn spawn(
    plan: MaintenancePlan,
    scheduler: Arc<Scheduler>,
    sink: Arc<ResultsSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(plan.interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_once(&plan, &scheduler, &sink).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assignment_pass_requeues_stale_jobs() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.load("any 0 sleep 100\n");
        scheduler.assign("c1", "linux", 0);

        let plan = MaintenancePlan {
            interval: Duration::from_secs(1),
            role: ConnectionRole::Assignment,
            assignment_timeout: Some(Duration::ZERO),
        };
        let sink = ResultsSink::with_instance(std::env::temp_dir(), 1);
        assert_eq!(run_once(&plan, &scheduler, &sink).await, (1, 0));
        assert_eq!(scheduler.unassigned_count(), 1);
    }

    #[tokio::test]
    async fn assignment_pass_without_timeout_leaves_jobs() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.load("any 0 sleep 100\n");
        scheduler.assign("c1", "linux", 0);

        let plan = MaintenancePlan {
            interval: Duration::from_secs(1),
            role: ConnectionRole::Assignment,
            assignment_timeout: None,
        };
        let sink = ResultsSink::with_instance(std::env::temp_dir(), 1);
        assert_eq!(run_once(&plan, &scheduler, &sink).await, (0, 0));
        assert_eq!(scheduler.assigned_count(), 1);
    }
}
