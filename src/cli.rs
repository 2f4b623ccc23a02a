//! Command-line interface for phaseshift
//!
//! `serve` runs the controller. The remaining subcommands either write a
//! configuration template or drive a running controller over its admin API.

use clap::{Parser, Subcommand};

/// Phased traffic-migration controller
#[derive(Parser)]
#[command(name = "phaseshift")]
#[command(version)]
#[command(about = "Phased traffic-migration controller with validation gates and fast rollback")]
#[command(
    long_about = "phaseshift shifts read traffic from a mock data source to a real one in \
    canary phases (5, 25, 50, 75, 100 percent), validating error rate, latency and data \
    integrity before each advance and rolling back automatically when a gate fails."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    /// Base URL of a running controller (client subcommands)
    #[arg(long, default_value = "http://127.0.0.1:3000", global = true)]
    pub server: String,

    /// Operator identity sent as `x-operator` (defaults to $USER)
    #[arg(long, global = true)]
    pub operator: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the controller (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Show migration status
    Status,
    /// Start a migration at the first canary phase
    Start {
        /// Start even if preflight checks fail
        #[arg(long)]
        force: bool,
    },
    /// Roll back to the previous phase's percentage
    Rollback,
    /// Route all traffic back to the mock source immediately
    Abort {
        /// Reason recorded in the audit log
        #[arg(long)]
        reason: String,
    },
    /// Return a finished migration to idle
    Reset {
        /// Abort first if a migration is active
        #[arg(long)]
        emergency: bool,
    },
    /// List rollback and abort events
    Events,
}

impl Cli {
    /// Operator name for admin calls, falling back to the login user
    pub fn operator_name(&self) -> Option<String> {
        self.operator
            .clone()
            .or_else(|| std::env::var("USER").ok())
            .filter(|name| !name.trim().is_empty())
    }
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# phaseshift Configuration
# =========================
#
# Configures the HTTP server, the migration plan, both data sources and the
# checks that gate the start of a migration.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on (admin API, data plane, /health and /metrics)
port = 3000

# Timeout for each read against a data source, in seconds (1-300)
request_timeout_seconds = 30

# ─────────────────────────────────────────────────────────────────────────────
# MIGRATION PLAN
# ─────────────────────────────────────────────────────────────────────────────

[migration]
# How often the supervisor evaluates the validation gate
tick_interval_ms = 5000

# Consecutive failing evaluations before an automatic rollback
failure_debounce_ticks = 2

# Number of most recent reads the gate evaluates
window_size = 1000

# Target for detect-and-roll-back time. A warning is logged at startup when
# tick_interval_ms * failure_debounce_ticks exceeds it.
rollback_slo_seconds = 38

# Exactly five phases with strictly increasing percentages ending at 100.
# Thresholds are strict upper bounds (error rate, p95 latency); the integrity
# tolerance is the highest acceptable shadow mismatch rate. Until the window
# holds min_samples reads, error rate and latency cannot fail a phase.

[[migration.phases]]
percentage = 5
min_hold_seconds = 300
error_rate_threshold = 0.01
p95_latency_ms = 500.0
integrity_tolerance = 0.01
min_samples = 20

[[migration.phases]]
percentage = 25
min_hold_seconds = 600
error_rate_threshold = 0.01
p95_latency_ms = 500.0
integrity_tolerance = 0.01
min_samples = 20

[[migration.phases]]
percentage = 50
min_hold_seconds = 900
error_rate_threshold = 0.01
p95_latency_ms = 500.0
integrity_tolerance = 0.01
min_samples = 20

[[migration.phases]]
percentage = 75
min_hold_seconds = 600
error_rate_threshold = 0.01
p95_latency_ms = 500.0
integrity_tolerance = 0.01
min_samples = 20

[[migration.phases]]
percentage = 100
min_hold_seconds = 300
error_rate_threshold = 0.01
p95_latency_ms = 500.0
integrity_tolerance = 0.01
min_samples = 20

# ─────────────────────────────────────────────────────────────────────────────
# DATA SOURCES
# ─────────────────────────────────────────────────────────────────────────────

[sources]
mock_base_url = "http://localhost:9001"
real_base_url = "http://localhost:9002"

# "hybrid" follows the migration percentage; "mock" and "real" pin every read
mode = "hybrid"

# Serve from the mock source when a real read fails
fallback_enabled = true

# Concurrent reads allowed across both sources
max_in_flight = 1024

[sources.shadow]
# Read the other source for a sample of requests and compare payloads
enabled = false
sample_rate = 0.05
# Top-level fields that legitimately differ between sources
ignore_fields = []

# ─────────────────────────────────────────────────────────────────────────────
# PREFLIGHT
# ─────────────────────────────────────────────────────────────────────────────

[preflight]
# Environment variables that must hold real-source credentials
required_env = []

# Free in-flight slots required before a migration may start
min_available_capacity = 0

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are always available at /metrics on the server port
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::str::FromStr;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path_and_command() {
        let cli = Cli::parse_from(["phaseshift"]);
        assert_eq!(cli.config, "config.toml");
        assert_eq!(cli.server, "http://127.0.0.1:3000");
        assert!(cli.command.is_none());
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["phaseshift", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn start_accepts_force() {
        let cli = Cli::parse_from(["phaseshift", "start", "--force"]);
        assert_eq!(cli.command, Some(Command::Start { force: true }));
    }

    #[test]
    fn abort_requires_reason() {
        assert!(Cli::try_parse_from(["phaseshift", "abort"]).is_err());
        let cli = Cli::parse_from(["phaseshift", "abort", "--reason", "bad payloads"]);
        assert_eq!(
            cli.command,
            Some(Command::Abort {
                reason: "bad payloads".to_string()
            })
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "phaseshift",
            "status",
            "--server",
            "http://controller:8080",
            "--operator",
            "oncall",
        ]);
        assert_eq!(cli.server, "http://controller:8080");
        assert_eq!(cli.operator_name().as_deref(), Some("oncall"));
    }

    #[test]
    fn template_parses_as_valid_config() {
        let config = crate::config::Config::from_str(generate_config_template())
            .expect("template should be a valid config");
        assert_eq!(config.migration.phases.len(), 5);
        assert_eq!(config.migration.detection_bound().as_secs(), 10);
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        for section in [
            "[server]",
            "[migration]",
            "[[migration.phases]]",
            "[sources]",
            "[sources.shadow]",
            "[preflight]",
            "[observability]",
        ] {
            assert!(template.contains(section), "missing {section}");
        }
    }
}
