//! Admin API client used by the CLI subcommands

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

use crate::coordinator::{MigrationStatus, RollbackEvent};
use crate::error::{AppError, AppResult};
use crate::handlers::extract::OPERATOR_HEADER;

/// Thin typed wrapper over the `/admin/migration` endpoints
pub struct AdminClient {
    http: reqwest::Client,
    base_url: String,
    operator: String,
}

impl AdminClient {
    pub fn new(base_url: &str, operator: impl Into<String>) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            operator: operator.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header(OPERATOR_HEADER, &self.operator)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> AppResult<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::AdminApi(format!("request to {} failed: {}", self.base_url, e)))?;
        decode(response).await
    }

    pub async fn status(&self) -> AppResult<MigrationStatus> {
        self.send(self.request(Method::GET, "/admin/migration")).await
    }

    pub async fn start(&self, force: bool) -> AppResult<MigrationStatus> {
        let body = json!({ "action": "start", "force": force });
        self.send(self.request(Method::POST, "/admin/migration").json(&body))
            .await
    }

    pub async fn rollback(&self) -> AppResult<MigrationStatus> {
        let body = json!({ "action": "rollback" });
        self.send(self.request(Method::POST, "/admin/migration").json(&body))
            .await
    }

    pub async fn abort(&self, reason: &str) -> AppResult<MigrationStatus> {
        let body = json!({ "action": "abort", "reason": reason });
        self.send(self.request(Method::POST, "/admin/migration").json(&body))
            .await
    }

    pub async fn reset(&self) -> AppResult<MigrationStatus> {
        let body = json!({ "action": "reset" });
        self.send(self.request(Method::POST, "/admin/migration").json(&body))
            .await
    }

    pub async fn emergency_reset(&self) -> AppResult<MigrationStatus> {
        self.send(self.request(Method::DELETE, "/admin/migration"))
            .await
    }

    pub async fn events(&self) -> AppResult<Vec<RollbackEvent>> {
        self.send(self.request(Method::GET, "/admin/migration/events"))
            .await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> AppResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        return Err(AppError::AdminApi(format!("{}: {}", status, message)));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AppError::AdminApi(format!("unexpected response body: {}", e)))
}
