//! Extractors for the admin API
//!
//! - [`Operator`] reads the already-authenticated operator identity.
//! - [`AdminJson`] maps body rejections onto [`AppError::Validation`] so every
//!   admin error shares one response shape.

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Request, rejection::JsonRejection},
    http::request::Parts,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// Header carrying the operator identity set by the authenticating proxy
pub const OPERATOR_HEADER: &str = "x-operator";

/// Identity of the operator issuing an admin command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator(pub String);

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OPERATOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(|name| Operator(name.to_string()))
            .ok_or(AppError::Unauthenticated {
                header: OPERATOR_HEADER,
            })
    }
}

/// JSON body extractor whose rejections become `400 Invalid request`
pub struct AdminJson<T>(pub T);

impl<S, T> FromRequest<S> for AdminJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AdminJson(value)),
            Err(rejection) => Err(AppError::Validation(rejection.body_text())),
        }
    }
}
