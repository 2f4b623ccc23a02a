//! HTTP-backed data source
//!
//! Serves `GET {base_url}/{resource}` and checks reachability with
//! `HEAD {base_url}`.

use async_trait::async_trait;
use std::time::Duration;

use super::{DataSource, RequestContext, SourceError, SourceKind};
use crate::error::{AppError, AppResult};
use crate::middleware::request_id::REQUEST_ID_HEADER;

pub struct HttpDataSource {
    kind: SourceKind,
    base_url: String,
    client: reqwest::Client,
}

impl HttpDataSource {
    /// Create a source with a shared client and per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(kind: SourceKind, base_url: &str, timeout: Duration) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::Config(format!("failed to build HTTP client for {kind} source: {e}"))
            })?;

        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, ctx: &RequestContext) -> Result<serde_json::Value, SourceError> {
        let url = self.url_for(&ctx.resource);

        let response = self
            .client
            .get(&url)
            .header(REQUEST_ID_HEADER, ctx.request_id.to_string())
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(
                source = %self.kind,
                url = %url,
                status = %status,
                request_id = %ctx.request_id,
                "Data source returned non-success status"
            );
            return Err(SourceError::Status(status.as_u16()));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| SourceError::Payload(e.to_string()))
    }

    async fn ping(&self) -> Result<(), SourceError> {
        let response = self
            .client
            .head(&self.base_url)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        tracing::debug!(
            source = %self.kind,
            url = %self.base_url,
            status = %status,
            "Data source ping completed"
        );

        if status.is_success() {
            Ok(())
        } else {
            Err(SourceError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_without_double_slash() {
        let source =
            HttpDataSource::new(SourceKind::Real, "http://localhost:9000/api/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(source.base_url(), "http://localhost:9000/api");
        assert_eq!(source.url_for("/users/1"), "http://localhost:9000/api/users/1");
        assert_eq!(source.url_for("users/1"), "http://localhost:9000/api/users/1");
    }

    #[test]
    fn test_kind_is_preserved() {
        let source =
            HttpDataSource::new(SourceKind::Mock, "http://localhost:9001", Duration::from_secs(1))
                .unwrap();
        assert_eq!(source.kind(), SourceKind::Mock);
    }
}
