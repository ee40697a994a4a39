//! Error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use dispatcher::DispatchError;
use pipeline::ModelError;

use crate::TRACING_TARGET_HTTP;

/// An error rendered as `{ "success": false, "error", "message", ... }`.
///
/// Quota denials add `remaining`, `limit`, `tier` and `requiresUpgrade`.
/// Upstream rate limits add `retryAfter` and a `Retry-After` header when the
/// backend supplied a delay.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Map<String, Value>,
    retry_after_secs: Option<u64>,
}

impl HttpError {
    /// Creates an error with no extra body fields.
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Map::new(),
            retry_after_secs: None,
        }
    }

    /// Adds a field to the response body.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_owned(), value.into());
        self
    }

    /// Status the error is sent with.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code placed in the `error` field.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<DispatchError> for HttpError {
    fn from(error: DispatchError) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut http = Self::new(status, error.code(), error.to_string());

        match &error {
            DispatchError::QuotaExceeded { decision } => {
                http = http
                    .with_detail("remaining", decision.remaining_or_sentinel())
                    .with_detail("limit", i64::from(decision.limit))
                    .with_detail("tier", decision.tier.as_str())
                    .with_detail("requiresUpgrade", true);
            }
            DispatchError::Model(ModelError::RateLimited {
                retry_after_secs: Some(secs),
            }) => {
                http.retry_after_secs = Some(*secs);
                http = http.with_detail("retryAfter", *secs);
            }
            _ => {}
        }
        http
    }
}

impl From<JsonRejection> for HttpError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "invalid_request", rejection.body_text())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(target: TRACING_TARGET_HTTP, status = %self.status, code = self.code, message = %self.message, "request failed");
        } else {
            tracing::debug!(target: TRACING_TARGET_HTTP, status = %self.status, code = self.code, "request refused");
        }

        let mut body = json!({
            "success": false,
            "error": self.code,
            "message": self.message,
        });
        if let Some(object) = body.as_object_mut() {
            object.extend(self.details);
        }

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
