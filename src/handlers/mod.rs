//! HTTP request handlers for the phaseshift API

use axum::{
    Router, middleware,
    routing::get,
};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordinator::{MigrationCoordinator, Supervisor};
use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::middleware::request_id_middleware;
use crate::preflight::{
    CapacityHeadroom, CredentialsPresent, Preflight, RollbackSelfTest, SourceConnectivity,
};
use crate::recorder::MetricsRecorder;
use crate::source::{
    DataSource, DataSourceManager, ExactMatch, HttpDataSource, IgnoreFields, RandomSource,
    ShadowComparator, SourceKind, ThreadRandom,
};

pub mod data;
pub mod extract;
pub mod health;
pub mod metrics;
pub mod migration;
pub mod source;

/// Application state shared across all handlers
///
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    coordinator: Arc<MigrationCoordinator>,
    supervisor: Arc<Supervisor>,
    sources: Arc<DataSourceManager>,
    recorder: Arc<MetricsRecorder>,
    metrics: Arc<Metrics>,
}

impl AppState {
    /// Create a new AppState from configuration
    ///
    /// Builds HTTP clients for both sources and wires the coordinator, the
    /// supervisor and the source manager around one recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built, the phase plan is
    /// invalid or the metrics registry fails to initialize.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let timeout = config.request_timeout();
        let mock: Arc<dyn DataSource> = Arc::new(HttpDataSource::new(
            SourceKind::Mock,
            &config.sources.mock_base_url,
            timeout,
        )?);
        let real: Arc<dyn DataSource> = Arc::new(HttpDataSource::new(
            SourceKind::Real,
            &config.sources.real_base_url,
            timeout,
        )?);

        Self::with_sources(config, mock, real, Arc::new(ThreadRandom))
    }

    /// Create state around caller-supplied sources and random draws
    pub fn with_sources(
        config: Arc<Config>,
        mock: Arc<dyn DataSource>,
        real: Arc<dyn DataSource>,
        random: Arc<dyn RandomSource>,
    ) -> AppResult<Self> {
        let metrics = Arc::new(
            Metrics::new()
                .map_err(|e| AppError::Internal(format!("Failed to initialize metrics: {}", e)))?,
        );
        let recorder = Arc::new(MetricsRecorder::new(config.migration.window_size));
        let plan = config.migration.plan()?;
        let limiter = Arc::new(Semaphore::new(config.sources.max_in_flight));

        let mut preflight = Preflight::empty()
            .with_check(SourceConnectivity::new(Arc::clone(&real)))
            .with_check(RollbackSelfTest::new(plan.clone(), Arc::clone(&mock)));
        if !config.preflight.required_env.is_empty() {
            preflight = preflight.with_check(CredentialsPresent::new(
                config.preflight.required_env.clone(),
            ));
        }
        if config.preflight.min_available_capacity > 0 {
            preflight = preflight.with_check(CapacityHeadroom::new(
                Arc::clone(&limiter),
                config.preflight.min_available_capacity,
            ));
        }

        let coordinator = Arc::new(MigrationCoordinator::new(
            plan,
            Arc::clone(&recorder),
            Arc::clone(&metrics),
            preflight,
        ));

        let mut sources = DataSourceManager::new(
            mock,
            real,
            Arc::clone(&recorder),
            Arc::clone(&metrics),
            coordinator.subscribe(),
            random,
        )
        .with_settings(config.sources.settings())
        .with_limiter(limiter);

        let shadow = &config.sources.shadow;
        if shadow.enabled {
            let comparator: Arc<dyn ShadowComparator> = if shadow.ignore_fields.is_empty() {
                Arc::new(ExactMatch)
            } else {
                Arc::new(IgnoreFields::new(shadow.ignore_fields.clone()))
            };
            tracing::info!(
                comparator = comparator.name(),
                sample_rate = shadow.sample_rate,
                "Shadow reads enabled"
            );
            sources = sources.with_shadow(comparator, shadow.sample_rate);
        }

        let supervisor = Arc::new(Supervisor::new(
            Arc::clone(&coordinator),
            config.migration.tick_interval(),
        ));

        Ok(Self {
            config,
            coordinator,
            supervisor,
            sources: Arc::new(sources),
            recorder,
            metrics,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<MigrationCoordinator> {
        &self.coordinator
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub fn sources(&self) -> &Arc<DataSourceManager> {
        &self.sources
    }

    pub fn recorder(&self) -> &Arc<MetricsRecorder> {
        &self.recorder
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}

/// Build the full HTTP surface: admin API, data plane and ops endpoints
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/admin/migration",
            get(migration::status)
                .post(migration::command)
                .delete(migration::emergency_reset),
        )
        .route("/admin/migration/events", get(migration::events))
        .route("/admin/migration/stream", get(migration::stream))
        .route("/admin/source", get(source::get_settings).put(source::put_settings))
        .route("/data/{*resource}", get(data::handler))
        .route("/health", get(health::handler))
        .route("/metrics", get(metrics::handler))
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::source::{RequestContext, SeededRandom, SourceError};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::str::FromStr;

    pub const TEST_CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[migration]
tick_interval_ms = 1000

[sources]
mock_base_url = "http://localhost:9001"
real_base_url = "http://localhost:9002"
"#;

    /// In-memory source answering with its own kind
    pub struct EchoSource(pub SourceKind);

    #[async_trait]
    impl DataSource for EchoSource {
        fn kind(&self) -> SourceKind {
            self.0
        }

        async fn fetch(&self, ctx: &RequestContext) -> Result<Value, SourceError> {
            Ok(json!({ "source": self.0.as_str(), "resource": ctx.resource }))
        }

        async fn ping(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    pub fn test_state() -> AppState {
        let config = Arc::new(Config::from_str(TEST_CONFIG).expect("test config should parse"));
        AppState::with_sources(
            config,
            Arc::new(EchoSource(SourceKind::Mock)),
            Arc::new(EchoSource(SourceKind::Real)),
            Arc::new(SeededRandom::new(7)),
        )
        .expect("should create AppState")
    }
}
