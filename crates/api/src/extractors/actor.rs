//! Acting-identity extractor.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

pub const ACTOR_HEADER: &str = "x-actor-id";

/// The identity performing a mutation, supplied by the upstream auth
/// layer. Mutating endpoints reject requests without it; anonymous
/// changes to flags or protection settings are not allowed.
#[derive(Debug, Clone)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ApiError::Validation(format!("The {} header is required", ACTOR_HEADER))
            })?;
        Ok(Actor(actor.to_string()))
    }
}
