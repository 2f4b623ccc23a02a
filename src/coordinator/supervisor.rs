//! Supervisory tick loop
//!
//! The supervisor owns the background task that calls
//! [`MigrationCoordinator::tick`] on a fixed interval. It is launched by a
//! successful start and stops on its own once the coordinator publishes an
//! inactive snapshot (completion, rollback, abort). Ticks run inside a single
//! task and each is awaited before the next, so they never overlap; missed
//! intervals are skipped rather than bursted.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use super::{MigrationCoordinator, MigrationStatus};
use crate::error::AppResult;

/// Owner of the periodic validation task
pub struct Supervisor {
    coordinator: Arc<MigrationCoordinator>,
    interval: Duration,
    task: Mutex<Option<AbortHandle>>,
    /// Generation of the live loop, 0 when none is running
    running: Arc<AtomicU64>,
    launches: AtomicU64,
}

impl Supervisor {
    pub fn new(coordinator: Arc<MigrationCoordinator>, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
            task: Mutex::new(None),
            running: Arc::new(AtomicU64::new(0)),
            launches: AtomicU64::new(0),
        }
    }

    pub fn coordinator(&self) -> &Arc<MigrationCoordinator> {
        &self.coordinator
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the tick loop is currently alive
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) != 0
    }

    /// Start a migration and launch the tick loop for it
    ///
    /// # Errors
    ///
    /// Propagates `InvalidStateTransition` and `PreflightFailed` from the
    /// coordinator; the loop is not launched in that case.
    pub async fn start_migration(&self, force: bool) -> AppResult<MigrationStatus> {
        let status = self.coordinator.start(force).await?;
        self.launch();
        Ok(status)
    }

    /// Launch the tick loop, replacing any previous one
    pub fn launch(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = task.take() {
            previous.abort();
        }

        let coordinator = Arc::clone(&self.coordinator);
        let interval = self.interval;
        let generation = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        self.running.store(generation, Ordering::SeqCst);

        let handle = tokio::spawn(run_loop(Arc::clone(&coordinator), interval));
        *task = Some(handle.abort_handle());

        // Monitor the loop so a panic never leaves traffic shifted without validation
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            let result = handle.await;
            // A replaced loop must not clear the flag of its successor
            let _ = running.compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst);
            match result {
                Ok(()) => {
                    tracing::debug!("Supervisor loop finished");
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Supervisor loop cancelled");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Supervisor loop panicked. Aborting the migration so no traffic \
                        stays on the real source without validation."
                    );
                    coordinator.abort("supervisor task panicked").await;
                }
            }
        });
    }

    /// Stop the tick loop without touching migration state
    pub fn stop(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
            tracing::info!("Supervisor loop stopped");
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(coordinator: Arc<MigrationCoordinator>, interval: Duration) {
    let mut status_rx = coordinator.subscribe();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        "Starting supervisor loop"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let outcome = coordinator.tick().await;
                tracing::debug!(outcome = ?outcome, "Supervisor tick completed");
                if outcome.ends_migration() {
                    tracing::info!(outcome = ?outcome, "Migration no longer active, supervisor exiting");
                    break;
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    tracing::error!("Status channel closed, supervisor exiting");
                    break;
                }
                let active = status_rx.borrow_and_update().active;
                if !active {
                    tracing::info!("Migration deactivated by command, supervisor exiting");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{MigrationPhase, MigrationPlan, PhaseSpec};
    use crate::metrics::Metrics;
    use crate::preflight::Preflight;
    use crate::recorder::MetricsRecorder;

    fn supervisor(hold: Duration) -> Supervisor {
        let phases = [5, 25, 50, 75, 100]
            .into_iter()
            .map(|pct| PhaseSpec {
                target_percentage: pct,
                min_hold: hold,
                error_rate_threshold: 0.01,
                p95_latency_threshold_ms: 500.0,
                integrity_tolerance: 0.0,
                min_samples: 10,
            })
            .collect();
        let coordinator = Arc::new(MigrationCoordinator::new(
            MigrationPlan::new(phases, 2).unwrap(),
            Arc::new(MetricsRecorder::new(100)),
            Arc::new(Metrics::new().unwrap()),
            Preflight::empty(),
        ));
        Supervisor::new(coordinator, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_walks_to_completion() {
        let sup = supervisor(Duration::from_secs(2));
        sup.start_migration(false).await.unwrap();
        assert!(sup.is_running());

        let mut rx = sup.coordinator().subscribe();
        tokio::time::timeout(Duration::from_secs(120), async {
            loop {
                if rx.borrow_and_update().phase == MigrationPhase::Completed {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("migration should complete");

        let status = sup.coordinator().status();
        assert_eq!(status.percentage, 100);
        assert!(!status.active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_loop_without_waiting_for_tick() {
        let sup = supervisor(Duration::from_secs(600));
        sup.start_migration(false).await.unwrap();

        sup.coordinator().abort("test").await;
        tokio::time::timeout(Duration::from_millis(500), async {
            while sup.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("loop should exit well before the next tick");
        assert_eq!(sup.coordinator().status().percentage, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_abort_keeps_loop_reported_running() {
        let sup = supervisor(Duration::from_secs(600));
        sup.start_migration(false).await.unwrap();
        sup.coordinator().abort("drill").await;
        sup.start_migration(false).await.unwrap();

        // Let the replaced loop and its monitor finish
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(sup.coordinator().status().active);
        assert!(sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_running_flag() {
        let sup = supervisor(Duration::from_secs(600));
        sup.start_migration(false).await.unwrap();
        sup.stop();
        tokio::time::timeout(Duration::from_millis(500), async {
            while sup.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("monitor should clear the flag once the loop is cancelled");
    }

    #[tokio::test]
    async fn test_start_while_active_is_rejected() {
        let sup = supervisor(Duration::from_secs(600));
        sup.start_migration(false).await.unwrap();
        assert!(sup.start_migration(false).await.is_err());
        assert!(sup.coordinator().status().active);
        sup.stop();
    }
}
