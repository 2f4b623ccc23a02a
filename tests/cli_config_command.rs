//! Integration tests for the `phaseshift config` subcommand
//!
//! Verifies that the generated template writes to disk and loads back as a
//! valid configuration.

use phaseshift::cli::generate_config_template;
use phaseshift::config::Config;
use phaseshift::coordinator::MigrationPhase;
use phaseshift::source::SourceMode;
use std::fs;
use tempfile::TempDir;

fn create_temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

#[test]
fn test_generated_template_creates_valid_config_file() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    fs::write(&config_path, generate_config_template()).expect("Failed to write template");

    let config =
        Config::from_file(&config_path).expect("Generated template should load as valid Config");

    assert_eq!(config.sources.mode, SourceMode::Hybrid);
    assert!(config.sources.fallback_enabled);
    assert_eq!(config.migration.failure_debounce_ticks, 2);

    let plan = config.migration.plan().expect("template plan is valid");
    let percentages: Vec<u8> = MigrationPhase::ACTIVE
        .iter()
        .map(|phase| plan.percentage_of(*phase))
        .collect();
    assert_eq!(percentages, vec![5, 25, 50, 75, 100]);
}

#[test]
fn test_template_matches_default_plan() {
    let config: Config = generate_config_template().parse().unwrap();
    let from_template = config.migration.plan().unwrap();
    let default = phaseshift::coordinator::MigrationPlan::default();
    assert_eq!(from_template.phases(), default.phases());
}

#[test]
fn test_template_file_content_matches_generation() {
    let temp_dir = create_temp_dir();
    let config_path = temp_dir.path().join("config.toml");

    let template = generate_config_template();
    fs::write(&config_path, template).expect("Failed to write template");

    let content = fs::read_to_string(&config_path).expect("Failed to read back");
    assert_eq!(content, template);
}

#[test]
fn test_template_detection_bound_meets_rollback_slo() {
    let config: Config = generate_config_template().parse().unwrap();
    assert!(
        config.migration.detection_bound().as_secs() <= config.migration.rollback_slo_seconds
    );
}
