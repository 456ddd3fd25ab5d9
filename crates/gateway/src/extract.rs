//! Request extractors

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use cardforge_common::{errors::AppError, validation::parse_payload};
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body decoded and validated in one step
///
/// Unlike `axum::Json`, every failure (missing content, malformed JSON,
/// wrong types, rule violations) is rejected as a 400 validation error with
/// per-field details.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| AppError::validation("Invalid request body", "body", e.body_text()))?;

        parse_payload(&body).map(ValidatedJson)
    }
}
