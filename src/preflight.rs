//! Start-time preflight checks
//!
//! Checks run once per `start`, concurrently, and every failure is reported
//! so the operator can fix all of them in one pass. They never run on the
//! supervisory tick.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::coordinator::{MigrationPhase, MigrationPlan};
use crate::source::DataSource;

#[async_trait]
pub trait PreflightCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Err` carries a human-readable reason
    async fn run(&self) -> Result<(), String>;
}

/// Ordered set of preflight checks
#[derive(Default)]
pub struct Preflight {
    checks: Vec<Box<dyn PreflightCheck>>,
}

impl Preflight {
    /// No checks; every start passes preflight
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_check(mut self, check: impl PreflightCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check and return the failures as `"name: reason"`
    pub async fn run(&self) -> Vec<String> {
        let results =
            futures::future::join_all(self.checks.iter().map(|check| async move {
                (check.name(), check.run().await)
            }))
            .await;

        results
            .into_iter()
            .filter_map(|(name, result)| match result {
                Ok(()) => {
                    tracing::debug!(check = name, "Preflight check passed");
                    None
                }
                Err(reason) => {
                    tracing::warn!(check = name, reason = %reason, "Preflight check failed");
                    Some(format!("{name}: {reason}"))
                }
            })
            .collect()
    }
}

/// The real source answers a ping
pub struct SourceConnectivity {
    source: Arc<dyn DataSource>,
}

impl SourceConnectivity {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl PreflightCheck for SourceConnectivity {
    fn name(&self) -> &'static str {
        "connectivity"
    }

    async fn run(&self) -> Result<(), String> {
        self.source
            .ping()
            .await
            .map_err(|e| format!("{} source unreachable: {e}", self.source.kind()))
    }
}

/// Required credentials are present in the environment
pub struct CredentialsPresent {
    variables: Vec<String>,
}

impl CredentialsPresent {
    pub fn new(variables: Vec<String>) -> Self {
        Self { variables }
    }
}

#[async_trait]
impl PreflightCheck for CredentialsPresent {
    fn name(&self) -> &'static str {
        "credentials"
    }

    async fn run(&self) -> Result<(), String> {
        let missing: Vec<&str> = self
            .variables
            .iter()
            .filter(|var| std::env::var(var).map(|v| v.is_empty()).unwrap_or(true))
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing or empty: {}", missing.join(", ")))
        }
    }
}

/// A rollback can actually be carried out
///
/// Every active phase must roll back to a strictly lower percentage, and the
/// mock source that absorbs rolled-back traffic must be reachable.
pub struct RollbackSelfTest {
    plan: MigrationPlan,
    fallback: Arc<dyn DataSource>,
}

impl RollbackSelfTest {
    pub fn new(plan: MigrationPlan, fallback: Arc<dyn DataSource>) -> Self {
        Self { plan, fallback }
    }
}

#[async_trait]
impl PreflightCheck for RollbackSelfTest {
    fn name(&self) -> &'static str {
        "rollback"
    }

    async fn run(&self) -> Result<(), String> {
        for phase in MigrationPhase::ACTIVE {
            let current = self.plan.percentage_of(phase);
            let target = self.plan.rollback_percentage(phase);
            if target >= current {
                return Err(format!(
                    "rolling back from {phase} would not reduce traffic ({current}% -> {target}%)"
                ));
            }
        }

        self.fallback
            .ping()
            .await
            .map_err(|e| format!("{} source cannot absorb rolled-back traffic: {e}", self.fallback.kind()))
    }
}

/// Enough free read capacity to absorb the migration
pub struct CapacityHeadroom {
    limiter: Arc<Semaphore>,
    min_available: usize,
}

impl CapacityHeadroom {
    pub fn new(limiter: Arc<Semaphore>, min_available: usize) -> Self {
        Self {
            limiter,
            min_available,
        }
    }
}

#[async_trait]
impl PreflightCheck for CapacityHeadroom {
    fn name(&self) -> &'static str {
        "capacity"
    }

    async fn run(&self) -> Result<(), String> {
        let available = self.limiter.available_permits();
        if available >= self.min_available {
            Ok(())
        } else {
            Err(format!(
                "{available} in-flight slots free, {} required",
                self.min_available
            ))
        }
    }
}
