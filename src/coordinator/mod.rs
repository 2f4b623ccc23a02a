//! Migration coordinator
//!
//! [`MigrationCoordinator`] owns the phase state machine. Every mutation
//! (`start`, `tick`, `rollback`, `abort`, `reset`) runs under one writer lock
//! and publishes a complete [`PhaseSnapshot`] through a `watch` channel, so a
//! reader can never observe a phase from one transition and a percentage from
//! another. Critical sections do no I/O: preflight checks run before the lock
//! is taken.

pub mod phase;
pub mod supervisor;

pub use phase::{DEFAULT_MIN_SAMPLES, MigrationPhase, MigrationPlan, PhaseSpec};
pub use supervisor::Supervisor;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::preflight::Preflight;
use crate::recorder::{MetricsCounters, MetricsRecorder, unix_millis};
use crate::validation::{ValidationGate, ValidationVerdict};

/// Receiver side of the published phase snapshot
pub type StatusReceiver = watch::Receiver<Arc<PhaseSnapshot>>;

/// Phase, percentage and verdict as published by the last transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSnapshot {
    pub attempt_id: Option<Uuid>,
    pub active: bool,
    pub phase: MigrationPhase,
    /// Share of traffic routed to the real source, 0-100
    pub percentage: u8,
    pub validation: ValidationVerdict,
    pub phase_started_at: u64,
    pub updated_at: u64,
}

impl PhaseSnapshot {
    fn idle() -> Self {
        let now = unix_millis();
        Self {
            attempt_id: None,
            active: false,
            phase: MigrationPhase::Idle,
            percentage: 0,
            validation: ValidationVerdict::PASSING,
            phase_started_at: now,
            updated_at: now,
        }
    }
}

/// Externally visible migration status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    pub active: bool,
    pub phase: MigrationPhase,
    pub percentage: u8,
    pub metrics: MetricsCounters,
    pub validation: ValidationVerdict,
    pub attempt_id: Option<Uuid>,
    pub phase_started_at: u64,
    pub updated_at: u64,
}

/// What caused a rollback event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RollbackTrigger {
    Manual,
    Automatic,
    Abort,
}

impl RollbackTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Automatic => "automatic",
            Self::Abort => "abort",
        }
    }
}

impl fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record of a rollback or abort
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackEvent {
    pub attempt_id: Option<Uuid>,
    pub from_phase: MigrationPhase,
    pub to_phase: MigrationPhase,
    pub from_percentage: u8,
    pub to_percentage: u8,
    pub trigger: RollbackTrigger,
    pub reason: String,
    pub timestamp: u64,
}

/// Result of one supervisory tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No migration is active
    Inactive,
    /// Stayed in the current phase
    Hold { consecutive_failures: u32 },
    Advanced {
        from: MigrationPhase,
        to: MigrationPhase,
    },
    Completed,
    RolledBack(RollbackEvent),
}

impl TickOutcome {
    /// True when the migration is no longer active after this tick
    pub fn ends_migration(&self) -> bool {
        matches!(
            self,
            Self::Inactive | Self::Completed | Self::RolledBack(_)
        )
    }
}

#[derive(Debug)]
struct ControlState {
    phase_entered: Instant,
    consecutive_failures: u32,
}

impl ControlState {
    fn entered_now() -> Self {
        Self {
            phase_entered: Instant::now(),
            consecutive_failures: 0,
        }
    }
}

/// Phase state machine for one migration at a time
pub struct MigrationCoordinator {
    plan: MigrationPlan,
    gate: ValidationGate,
    preflight: Preflight,
    recorder: Arc<MetricsRecorder>,
    metrics: Arc<Metrics>,
    writer: Mutex<ControlState>,
    status_tx: watch::Sender<Arc<PhaseSnapshot>>,
    events: RwLock<Vec<RollbackEvent>>,
}

impl MigrationCoordinator {
    pub fn new(
        plan: MigrationPlan,
        recorder: Arc<MetricsRecorder>,
        metrics: Arc<Metrics>,
        preflight: Preflight,
    ) -> Self {
        let (status_tx, _) = watch::channel(Arc::new(PhaseSnapshot::idle()));
        metrics.set_migration_state(MigrationPhase::Idle, 0);

        tracing::info!(
            phases = plan.phases().len(),
            failure_debounce_ticks = plan.failure_debounce_ticks(),
            preflight_checks = preflight.len(),
            "MigrationCoordinator initialized in idle phase"
        );

        Self {
            plan,
            gate: ValidationGate::new(),
            preflight,
            recorder,
            metrics,
            writer: Mutex::new(ControlState::entered_now()),
            status_tx,
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    /// Latest published phase snapshot
    pub fn snapshot(&self) -> Arc<PhaseSnapshot> {
        self.status_tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> StatusReceiver {
        self.status_tx.subscribe()
    }

    /// Non-blocking status read: published snapshot plus live counters
    pub fn status(&self) -> MigrationStatus {
        let snapshot = self.snapshot();
        MigrationStatus {
            active: snapshot.active,
            phase: snapshot.phase,
            percentage: snapshot.percentage,
            metrics: self.recorder.counters(),
            validation: snapshot.validation,
            attempt_id: snapshot.attempt_id,
            phase_started_at: snapshot.phase_started_at,
            updated_at: snapshot.updated_at,
        }
    }

    /// Copy of the rollback audit log, oldest first
    pub fn rollback_events(&self) -> Vec<RollbackEvent> {
        self.events
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn lock_writer(&self) -> MutexGuard<'_, ControlState> {
        self.writer.lock().await
    }

    fn publish(&self, snapshot: PhaseSnapshot) {
        self.metrics
            .set_migration_state(snapshot.phase, snapshot.percentage);
        self.status_tx.send_replace(Arc::new(snapshot));
    }

    fn append_event(&self, event: RollbackEvent) {
        self.events
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }

    fn ensure_startable(&self) -> AppResult<()> {
        let current = self.snapshot();
        if current.active {
            return Err(AppError::InvalidStateTransition {
                action: "start",
                phase: current.phase,
            });
        }
        Ok(())
    }

    /// Begin a migration at the first canary phase
    ///
    /// Valid from idle or any terminal phase. Preflight checks run before the
    /// writer lock is taken; a forced start proceeds past failing checks and
    /// logs each one.
    ///
    /// # Errors
    ///
    /// - `InvalidStateTransition` if a migration is already active
    /// - `PreflightFailed` if any check fails and `force` is false
    pub async fn start(&self, force: bool) -> AppResult<MigrationStatus> {
        self.ensure_startable()?;

        let failures = self.preflight.run().await;
        if !failures.is_empty() {
            if !force {
                tracing::warn!(
                    failed_checks = failures.len(),
                    failures = ?failures,
                    "Migration start rejected by preflight checks"
                );
                return Err(AppError::PreflightFailed { failures });
            }
            for failure in &failures {
                tracing::warn!(
                    failure = %failure,
                    "Preflight check failed but start was forced by operator"
                );
            }
        }

        let mut state = self.lock_writer().await;
        // A concurrent start may have won while preflight was running
        self.ensure_startable()?;

        self.recorder.reset();
        *state = ControlState::entered_now();

        let first = MigrationPhase::ACTIVE[0];
        let now = unix_millis();
        let attempt_id = Uuid::new_v4();
        self.publish(PhaseSnapshot {
            attempt_id: Some(attempt_id),
            active: true,
            phase: first,
            percentage: self.plan.percentage_of(first),
            validation: ValidationVerdict::PASSING,
            phase_started_at: now,
            updated_at: now,
        });
        drop(state);

        tracing::info!(
            attempt_id = %attempt_id,
            phase = %first,
            percentage = self.plan.percentage_of(first),
            forced = force,
            "Migration started"
        );

        Ok(self.status())
    }

    /// Evaluate the gate and advance, hold, or roll back
    ///
    /// Called by the supervisor on every interval. Advancing requires the
    /// phase's minimum hold to have elapsed and every check to pass; a
    /// rollback requires `failure_debounce_ticks` consecutive failing ticks.
    pub async fn tick(&self) -> TickOutcome {
        let mut state = self.lock_writer().await;
        let current = self.snapshot();

        if !current.active {
            return TickOutcome::Inactive;
        }
        let Some(spec) = self.plan.spec(current.phase) else {
            return TickOutcome::Inactive;
        };

        let report = self.gate.evaluate(&self.recorder.snapshot(), spec);
        let verdict = report.verdict;
        let now = unix_millis();

        if !verdict.all_pass() {
            state.consecutive_failures += 1;
            let failing = verdict.failing_checks();

            if state.consecutive_failures < self.plan.failure_debounce_ticks() {
                tracing::warn!(
                    phase = %current.phase,
                    failing = ?failing,
                    consecutive_failures = state.consecutive_failures,
                    debounce_ticks = self.plan.failure_debounce_ticks(),
                    error_rate = ?report.observed_error_rate,
                    p95_ms = ?report.observed_p95_ms,
                    "Validation failed, holding until failure persists"
                );
                self.publish(PhaseSnapshot {
                    validation: verdict,
                    updated_at: now,
                    ..(*current).clone()
                });
                return TickOutcome::Hold {
                    consecutive_failures: state.consecutive_failures,
                };
            }

            let reason = format!("automatic: validation failed ({})", failing.join(", "));
            let event = self.roll_back_locked(
                &mut state,
                &current,
                RollbackTrigger::Automatic,
                reason,
                verdict,
            );
            return TickOutcome::RolledBack(event);
        }

        state.consecutive_failures = 0;
        let held = state.phase_entered.elapsed();

        if held < spec.min_hold {
            tracing::debug!(
                phase = %current.phase,
                held_seconds = held.as_secs(),
                min_hold_seconds = spec.min_hold.as_secs(),
                samples = report.samples,
                sufficient_samples = report.sufficient_samples,
                shadow_available = report.shadow_available,
                "Validation passed, minimum hold not yet elapsed"
            );
            self.publish(PhaseSnapshot {
                validation: verdict,
                updated_at: now,
                ..(*current).clone()
            });
            return TickOutcome::Hold {
                consecutive_failures: 0,
            };
        }

        let Some(next) = current.phase.next() else {
            return TickOutcome::Inactive;
        };

        state.phase_entered = Instant::now();
        let percentage = self.plan.percentage_of(next);
        self.publish(PhaseSnapshot {
            attempt_id: current.attempt_id,
            active: next.is_active(),
            phase: next,
            percentage,
            validation: verdict,
            phase_started_at: now,
            updated_at: now,
        });

        if next == MigrationPhase::Completed {
            tracing::info!(
                attempt_id = ?current.attempt_id,
                percentage,
                "Migration completed, all traffic served by the real source"
            );
            return TickOutcome::Completed;
        }

        tracing::info!(
            from = %current.phase,
            to = %next,
            percentage,
            samples = report.samples,
            "Migration advanced to next phase"
        );
        TickOutcome::Advanced {
            from: current.phase,
            to: next,
        }
    }

    /// Operator rollback to the previous phase's percentage
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` unless a migration is active.
    pub async fn rollback(&self) -> AppResult<MigrationStatus> {
        let mut state = self.lock_writer().await;
        let current = self.snapshot();

        if !current.phase.is_active() {
            return Err(AppError::InvalidStateTransition {
                action: "rollback",
                phase: current.phase,
            });
        }

        self.roll_back_locked(
            &mut state,
            &current,
            RollbackTrigger::Manual,
            "manual".to_string(),
            current.validation,
        );
        drop(state);

        Ok(self.status())
    }

    fn roll_back_locked(
        &self,
        state: &mut ControlState,
        current: &PhaseSnapshot,
        trigger: RollbackTrigger,
        reason: String,
        validation: ValidationVerdict,
    ) -> RollbackEvent {
        let to_percentage = self.plan.rollback_percentage(current.phase);
        let now = unix_millis();

        self.publish(PhaseSnapshot {
            attempt_id: current.attempt_id,
            active: false,
            phase: MigrationPhase::RolledBack,
            percentage: to_percentage,
            validation,
            phase_started_at: now,
            updated_at: now,
        });
        state.consecutive_failures = 0;

        self.recorder.record_rollback();
        if let Err(e) = self.metrics.record_rollback(trigger) {
            tracing::warn!(error = %e, trigger = %trigger, "Failed to record rollback metric");
        }

        let event = RollbackEvent {
            attempt_id: current.attempt_id,
            from_phase: current.phase,
            to_phase: MigrationPhase::RolledBack,
            from_percentage: current.percentage,
            to_percentage,
            trigger,
            reason,
            timestamp: now,
        };
        self.append_event(event.clone());

        tracing::warn!(
            from = %current.phase,
            from_percentage = current.percentage,
            to_percentage,
            trigger = %trigger,
            reason = %event.reason,
            "Migration rolled back"
        );

        event
    }

    /// Abort to 0% real traffic from any state
    ///
    /// Never fails. The percentage flip is published before the audit event
    /// and metrics are written. Aborting an already aborted migration is a
    /// no-op.
    pub async fn abort(&self, reason: &str) -> MigrationStatus {
        let mut state = self.lock_writer().await;
        self.abort_locked(&mut state, reason);
        drop(state);
        self.status()
    }

    fn abort_locked(&self, state: &mut ControlState, reason: &str) {
        let current = self.snapshot();
        if current.phase == MigrationPhase::Aborted {
            tracing::debug!(reason = %reason, "Abort requested but migration already aborted");
            return;
        }

        let now = unix_millis();
        self.publish(PhaseSnapshot {
            attempt_id: current.attempt_id,
            active: false,
            phase: MigrationPhase::Aborted,
            percentage: 0,
            validation: current.validation,
            phase_started_at: now,
            updated_at: now,
        });
        state.consecutive_failures = 0;

        self.append_event(RollbackEvent {
            attempt_id: current.attempt_id,
            from_phase: current.phase,
            to_phase: MigrationPhase::Aborted,
            from_percentage: current.percentage,
            to_percentage: 0,
            trigger: RollbackTrigger::Abort,
            reason: reason.to_string(),
            timestamp: now,
        });
        if let Err(e) = self.metrics.record_rollback(RollbackTrigger::Abort) {
            tracing::warn!(error = %e, "Failed to record abort metric");
        }

        tracing::warn!(
            from = %current.phase,
            from_percentage = current.percentage,
            reason = %reason,
            "Migration aborted, all traffic returned to mock source"
        );
    }

    /// Re-arm from idle or a terminal phase, clearing metrics and status
    ///
    /// # Errors
    ///
    /// `InvalidStateTransition` while a migration is active.
    pub async fn reset(&self) -> AppResult<MigrationStatus> {
        let mut state = self.lock_writer().await;
        let current = self.snapshot();
        if current.active {
            return Err(AppError::InvalidStateTransition {
                action: "reset",
                phase: current.phase,
            });
        }
        self.reset_locked(&mut state);
        drop(state);
        Ok(self.status())
    }

    fn reset_locked(&self, state: &mut ControlState) {
        self.recorder.reset();
        *state = ControlState::entered_now();
        self.publish(PhaseSnapshot::idle());
        tracing::info!("Migration state reset to idle");
    }

    /// Abort and reset in one critical section
    ///
    /// For use when state is believed corrupted. Never fails.
    pub async fn emergency_reset(&self, reason: &str) -> MigrationStatus {
        let mut state = self.lock_writer().await;
        self.abort_locked(&mut state, reason);
        self.reset_locked(&mut state);
        drop(state);
        self.status()
    }
}
