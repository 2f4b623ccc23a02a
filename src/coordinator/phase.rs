//! Migration phases and the per-phase validation plan

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Phase of a traffic migration
///
/// Canary phases and `Full` are the active phases, ordered by the share of
/// traffic they route to the real source. `Completed`, `RolledBack` and
/// `Aborted` are terminal: the supervisor stops and only `start` or `reset`
/// leave them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    #[default]
    Idle,
    Canary5,
    Canary25,
    Canary50,
    Canary75,
    Full,
    Completed,
    RolledBack,
    Aborted,
}

impl MigrationPhase {
    /// Active phases in the order automatic advancement walks them
    pub const ACTIVE: [MigrationPhase; 5] = [
        MigrationPhase::Canary5,
        MigrationPhase::Canary25,
        MigrationPhase::Canary50,
        MigrationPhase::Canary75,
        MigrationPhase::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Canary5 => "canary5",
            Self::Canary25 => "canary25",
            Self::Canary50 => "canary50",
            Self::Canary75 => "canary75",
            Self::Full => "full",
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
            Self::Aborted => "aborted",
        }
    }

    /// True for the canary phases and `Full`
    pub fn is_active(&self) -> bool {
        self.active_index().is_some()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack | Self::Aborted)
    }

    /// Position within [`MigrationPhase::ACTIVE`], if this is an active phase
    pub fn active_index(&self) -> Option<usize> {
        Self::ACTIVE.iter().position(|p| p == self)
    }

    /// Phase that follows this one on a successful hold window
    ///
    /// `Full` advances to `Completed`. Non-active phases have no successor.
    pub fn next(&self) -> Option<MigrationPhase> {
        match self.active_index()? {
            i if i + 1 < Self::ACTIVE.len() => Some(Self::ACTIVE[i + 1]),
            _ => Some(Self::Completed),
        }
    }

    /// Active phase before this one, `None` for the first canary
    pub fn previous(&self) -> Option<MigrationPhase> {
        match self.active_index()? {
            0 => None,
            i => Some(Self::ACTIVE[i - 1]),
        }
    }

    /// Stable ordinal used for the phase gauge
    pub fn ordinal(&self) -> i64 {
        match self {
            Self::Idle => 0,
            Self::Canary5 => 1,
            Self::Canary25 => 2,
            Self::Canary50 => 3,
            Self::Canary75 => 4,
            Self::Full => 5,
            Self::Completed => 6,
            Self::RolledBack => 7,
            Self::Aborted => 8,
        }
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window size below which error rate and latency are not judged
pub const DEFAULT_MIN_SAMPLES: usize = 20;

/// Thresholds and hold time for one active phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    /// Share of traffic routed to the real source, 0-100
    pub target_percentage: u8,
    /// Minimum time spent in the phase before it may advance
    pub min_hold: Duration,
    /// Window error rate must stay strictly below this fraction
    pub error_rate_threshold: f64,
    /// Window p95 latency must stay strictly below this many milliseconds
    pub p95_latency_threshold_ms: f64,
    /// Highest tolerated shadow mismatch rate (fraction)
    pub integrity_tolerance: f64,
    /// Fewest windowed requests before error rate and p95 can fail the gate
    pub min_samples: usize,
}

/// Ordered phase specs plus the rollback debounce
///
/// Holds exactly one [`PhaseSpec`] per entry of [`MigrationPhase::ACTIVE`].
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    phases: Vec<PhaseSpec>,
    failure_debounce_ticks: u32,
}

impl MigrationPlan {
    /// Build a plan, validating the phase list
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the number of phases does not match the
    /// active phase count, percentages are not strictly increasing and ending
    /// at 100, a threshold is not a positive finite number, or the debounce is zero.
    pub fn new(phases: Vec<PhaseSpec>, failure_debounce_ticks: u32) -> AppResult<Self> {
        if phases.len() != MigrationPhase::ACTIVE.len() {
            return Err(AppError::Config(format!(
                "migration plan needs exactly {} phases ({}), got {}",
                MigrationPhase::ACTIVE.len(),
                MigrationPhase::ACTIVE
                    .iter()
                    .map(MigrationPhase::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
                phases.len()
            )));
        }

        if failure_debounce_ticks == 0 {
            return Err(AppError::Config(
                "failure_debounce_ticks must be at least 1".to_string(),
            ));
        }

        let mut last = 0u8;
        for (phase, spec) in MigrationPhase::ACTIVE.iter().zip(&phases) {
            if spec.target_percentage <= last || spec.target_percentage > 100 {
                return Err(AppError::Config(format!(
                    "phase {} has target_percentage {}; percentages must strictly increase \
                    within 1-100",
                    phase, spec.target_percentage
                )));
            }
            last = spec.target_percentage;

            for (name, value) in [
                ("error_rate_threshold", spec.error_rate_threshold),
                ("p95_latency_threshold_ms", spec.p95_latency_threshold_ms),
            ] {
                if !value.is_finite() || value <= 0.0 {
                    return Err(AppError::Config(format!(
                        "phase {} has invalid {} {}; must be a positive finite number",
                        phase, name, value
                    )));
                }
            }

            if !spec.integrity_tolerance.is_finite()
                || !(0.0..=1.0).contains(&spec.integrity_tolerance)
            {
                return Err(AppError::Config(format!(
                    "phase {} has invalid integrity_tolerance {}; must be within 0.0-1.0",
                    phase, spec.integrity_tolerance
                )));
            }
        }

        if last != 100 {
            return Err(AppError::Config(format!(
                "the full phase must route 100% of traffic, got {}",
                last
            )));
        }

        Ok(Self {
            phases,
            failure_debounce_ticks,
        })
    }

    /// Spec for an active phase, `None` for idle and terminal phases
    pub fn spec(&self, phase: MigrationPhase) -> Option<&PhaseSpec> {
        phase.active_index().map(|i| &self.phases[i])
    }

    /// Target percentage of a phase
    ///
    /// Idle and aborted route nothing to the real source; completed routes everything.
    /// `RolledBack` has no intrinsic target (it keeps the percentage it rolled back to).
    pub fn percentage_of(&self, phase: MigrationPhase) -> u8 {
        match phase {
            MigrationPhase::Completed => 100,
            _ => self.spec(phase).map(|s| s.target_percentage).unwrap_or(0),
        }
    }

    /// Percentage a rollback from `phase` lands on
    ///
    /// The previous phase's target, or 0 from the first canary.
    pub fn rollback_percentage(&self, phase: MigrationPhase) -> u8 {
        phase
            .previous()
            .map(|prev| self.percentage_of(prev))
            .unwrap_or(0)
    }

    pub fn failure_debounce_ticks(&self) -> u32 {
        self.failure_debounce_ticks
    }

    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }
}

impl Default for MigrationPlan {
    /// Five phases at 5/25/50/75/100 percent, held 5/10/15/10/5 minutes
    fn default() -> Self {
        let phases = [(5, 5), (25, 10), (50, 15), (75, 10), (100, 5)]
            .into_iter()
            .map(|(pct, minutes)| PhaseSpec {
                target_percentage: pct,
                min_hold: Duration::from_secs(minutes * 60),
                error_rate_threshold: 0.01,
                p95_latency_threshold_ms: 500.0,
                integrity_tolerance: 0.01,
                min_samples: DEFAULT_MIN_SAMPLES,
            })
            .collect();

        Self {
            phases,
            failure_debounce_ticks: 2,
        }
    }
}
