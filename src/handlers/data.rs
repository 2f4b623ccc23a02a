//! Data plane: `GET /data/{*resource}`
//!
//! Serves each read through the [`DataSourceManager`](crate::source::DataSourceManager)
//! and reports which source answered in the `x-served-by` header.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::HeaderValue,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::source::RequestContext;

pub const SERVED_BY_HEADER: &str = "x-served-by";
pub const FALLBACK_HEADER: &str = "x-fallback";

pub async fn handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(resource): Path<String>,
) -> AppResult<Response> {
    if resource.trim_matches('/').is_empty() || resource.split('/').any(|segment| segment == "..") {
        return Err(AppError::Validation(format!(
            "invalid resource path '{}'",
            resource
        )));
    }

    let ctx = RequestContext::new(resource).with_request_id(request_id.as_uuid());
    let served = state.sources().fetch(&ctx).await?;

    let mut response = Json(served.payload).into_response();
    let headers = response.headers_mut();
    headers.insert(
        SERVED_BY_HEADER,
        HeaderValue::from_static(served.served_by.as_str()),
    );
    if served.fell_back {
        headers.insert(FALLBACK_HEADER, HeaderValue::from_static("true"));
    }

    Ok(response)
}
