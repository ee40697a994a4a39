//! Session resolvers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use pipeline::{SessionError, SessionResolver, UserId};

use crate::TRACING_TARGET_SESSION;

/// Resolves bearer tokens through the datastore's GoTrue auth service
/// (`GET /auth/v1/user`).
#[derive(Debug, Clone)]
pub struct GoTrueSessionResolver {
    http: Client,
    user_url: String,
    anon_key: String,
}

impl GoTrueSessionResolver {
    /// Builds a resolver for the project at `base_url`.
    pub fn new(
        base_url: &str,
        anon_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SessionError::Unavailable(err.to_string()))?;
        Ok(Self {
            http,
            user_url: format!("{}/auth/v1/user", base_url.trim_end_matches('/')),
            anon_key: anon_key.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

#[async_trait]
impl SessionResolver for GoTrueSessionResolver {
    async fn resolve(&self, bearer_token: Option<&str>) -> Result<UserId, SessionError> {
        let token = bearer_token
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(SessionError::Missing)?;

        let response = self
            .http
            .get(&self.user_url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| SessionError::Unavailable(err.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user: AuthUser = response
                    .json()
                    .await
                    .map_err(|err| SessionError::Unavailable(err.to_string()))?;
                UserId::new(user.id).ok_or(SessionError::Invalid)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                tracing::debug!(target: TRACING_TARGET_SESSION, "session token rejected");
                Err(SessionError::Invalid)
            }
            status => Err(SessionError::Unavailable(format!(
                "auth service answered {status}"
            ))),
        }
    }
}

/// Development resolver: the bearer token *is* the user id.
///
/// Only wired when no datastore is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct BearerIdentityResolver;

#[async_trait]
impl SessionResolver for BearerIdentityResolver {
    async fn resolve(&self, bearer_token: Option<&str>) -> Result<UserId, SessionError> {
        let token = bearer_token.ok_or(SessionError::Missing)?;
        UserId::new(token.trim()).ok_or(SessionError::Missing)
    }
}
