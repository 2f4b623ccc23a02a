//! phaseshift - phased traffic migration from a mock data source to a real one
//!
//! A [`MigrationCoordinator`](coordinator::MigrationCoordinator) walks read
//! traffic through canary phases while a
//! [`Supervisor`](coordinator::Supervisor) evaluates the validation gate on a
//! fixed tick. The [`DataSourceManager`](source::DataSourceManager) routes each
//! request according to the published percentage and records its outcome for
//! the gate.

pub mod cli;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod preflight;
pub mod recorder;
pub mod source;
pub mod telemetry;
pub mod validation;
