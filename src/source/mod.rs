//! Data sources and per-request routing
//!
//! The read path calls [`DataSourceManager::fetch`], which picks the mock or
//! real source for each request from the coordinator's current percentage,
//! applies fallback, and records exactly one outcome per request.

pub mod http;
pub mod manager;
pub mod random;
pub mod shadow;

pub use http::HttpDataSource;
pub use manager::{DataSourceManager, Served, SourceSettings};
pub use random::{RandomSource, SeededRandom, ThreadRandom};
pub use shadow::{ExactMatch, IgnoreFields, ShadowComparator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Which backing source serves a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Mock,
    Real,
}

impl SourceKind {
    /// Convert to Prometheus label / log string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Real => "real",
        }
    }

    /// The other source, used for shadow reads
    pub fn other(&self) -> Self {
        match self {
            Self::Mock => Self::Real,
            Self::Real => Self::Mock,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual routing override
///
/// `Hybrid` follows the migration percentage; `Mock` and `Real` pin every
/// request to one source regardless of phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Mock,
    Real,
    #[default]
    Hybrid,
}

/// Per-request context handed down the read path
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Resource path requested by the caller, without a leading slash
    pub resource: String,
}

impl RequestContext {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            resource: resource.into(),
        }
    }

    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

/// Failure reported by a data source
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SourceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("invalid payload: {0}")]
    Payload(String),
}

/// A backing store the read path can serve from
#[async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Read one resource
    async fn fetch(&self, ctx: &RequestContext) -> Result<serde_json::Value, SourceError>;

    /// Cheap reachability check used by preflight
    async fn ping(&self) -> Result<(), SourceError>;
}
