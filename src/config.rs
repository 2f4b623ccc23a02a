//! Configuration management for phaseshift
//!
//! Parses TOML configuration files and provides typed access to settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::coordinator::{DEFAULT_MIN_SAMPLES, MigrationPlan, PhaseSpec};
use crate::error::{AppError, AppResult};
use crate::recorder::DEFAULT_WINDOW_SIZE;
use crate::source::{SourceMode, SourceSettings};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub preflight: PreflightConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Timeout applied to every data source request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Supervisory loop and phase plan
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MigrationConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Consecutive failing ticks before an automatic rollback
    #[serde(default = "default_failure_debounce_ticks")]
    pub failure_debounce_ticks: u32,
    /// Number of recent request outcomes the validation gate samples
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Operational target for detect-and-roll-back time; not enforced
    #[serde(default = "default_rollback_slo_seconds")]
    pub rollback_slo_seconds: u64,
    /// Exactly five phases when present; the default ladder otherwise
    #[serde(default)]
    pub phases: Vec<PhaseConfig>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            failure_debounce_ticks: default_failure_debounce_ticks(),
            window_size: default_window_size(),
            rollback_slo_seconds: default_rollback_slo_seconds(),
            phases: Vec::new(),
        }
    }
}

fn default_tick_interval_ms() -> u64 {
    5000
}

fn default_failure_debounce_ticks() -> u32 {
    2
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_rollback_slo_seconds() -> u64 {
    38
}

impl MigrationConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Worst-case time from sustained failure to rollback
    pub fn detection_bound(&self) -> Duration {
        self.tick_interval() * self.failure_debounce_ticks
    }

    /// Build the validated phase plan
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the configured phases are invalid.
    pub fn plan(&self) -> AppResult<MigrationPlan> {
        if self.phases.is_empty() {
            let defaults = MigrationPlan::default();
            return MigrationPlan::new(defaults.phases().to_vec(), self.failure_debounce_ticks);
        }

        let phases = self.phases.iter().map(PhaseConfig::to_spec).collect();
        MigrationPlan::new(phases, self.failure_debounce_ticks)
    }
}

/// One `[[migration.phases]]` entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PhaseConfig {
    pub percentage: u8,
    pub min_hold_seconds: u64,
    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,
    #[serde(default = "default_p95_latency_ms")]
    pub p95_latency_ms: f64,
    #[serde(default = "default_integrity_tolerance")]
    pub integrity_tolerance: f64,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_error_rate_threshold() -> f64 {
    0.01
}

fn default_p95_latency_ms() -> f64 {
    500.0
}

fn default_integrity_tolerance() -> f64 {
    0.01
}

fn default_min_samples() -> usize {
    DEFAULT_MIN_SAMPLES
}

impl PhaseConfig {
    fn to_spec(&self) -> PhaseSpec {
        PhaseSpec {
            target_percentage: self.percentage,
            min_hold: Duration::from_secs(self.min_hold_seconds),
            error_rate_threshold: self.error_rate_threshold,
            p95_latency_threshold_ms: self.p95_latency_ms,
            integrity_tolerance: self.integrity_tolerance,
            min_samples: self.min_samples,
        }
    }
}

/// Data source endpoints and routing defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    pub mock_base_url: String,
    pub real_base_url: String,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default)]
    pub shadow: ShadowConfig,
}

fn default_true() -> bool {
    true
}

fn default_max_in_flight() -> usize {
    1024
}

impl SourcesConfig {
    pub fn settings(&self) -> SourceSettings {
        SourceSettings {
            mode: self.mode,
            fallback_enabled: self.fallback_enabled,
        }
    }
}

/// Shadow-read comparison for the data integrity gate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShadowConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Top-level payload fields ignored when comparing
    #[serde(default)]
    pub ignore_fields: Vec<String>,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: default_sample_rate(),
            ignore_fields: Vec::new(),
        }
    }
}

fn default_sample_rate() -> f64 {
    0.05
}

/// Start-time checks
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PreflightConfig {
    /// Environment variables holding real-source credentials
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Free in-flight read slots required to start
    #[serde(default)]
    pub min_available_capacity: usize,
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_seconds)
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> AppResult<()> {
        if self.server.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "request_timeout_seconds cannot exceed 300 seconds (5 minutes), got {}",
                self.server.request_timeout_seconds
            )));
        }

        for (name, url) in [
            ("sources.mock_base_url", &self.sources.mock_base_url),
            ("sources.real_base_url", &self.sources.real_base_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Config(format!(
                    "{} '{}' must start with 'http://' or 'https://'",
                    name, url
                )));
            }
        }

        if self.sources.max_in_flight == 0 {
            return Err(AppError::Config(
                "sources.max_in_flight must be greater than 0".to_string(),
            ));
        }

        let rate = self.sources.shadow.sample_rate;
        if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
            return Err(AppError::Config(format!(
                "sources.shadow.sample_rate must be within 0.0-1.0, got {}",
                rate
            )));
        }

        if self.preflight.min_available_capacity > self.sources.max_in_flight {
            return Err(AppError::Config(format!(
                "preflight.min_available_capacity ({}) cannot exceed sources.max_in_flight ({}); \
                the capacity check could never pass",
                self.preflight.min_available_capacity, self.sources.max_in_flight
            )));
        }

        if self.migration.tick_interval_ms == 0 {
            return Err(AppError::Config(
                "migration.tick_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.migration.window_size == 0 {
            return Err(AppError::Config(
                "migration.window_size must be greater than 0".to_string(),
            ));
        }

        let plan = self.migration.plan()?;
        for spec in plan.phases() {
            if spec.min_samples > self.migration.window_size {
                return Err(AppError::Config(format!(
                    "phase at {}% has min_samples {} above migration.window_size {}; \
                    error rate and latency could never fail the gate",
                    spec.target_percentage, spec.min_samples, self.migration.window_size
                )));
            }
        }

        let bound = self.migration.detection_bound();
        if bound > Duration::from_secs(self.migration.rollback_slo_seconds) {
            tracing::warn!(
                detection_bound_ms = bound.as_millis() as u64,
                rollback_slo_seconds = self.migration.rollback_slo_seconds,
                "tick_interval_ms * failure_debounce_ticks exceeds the rollback SLO"
            );
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
