//! Errors that end an execution before a model response exists.

use thiserror::Error;

use pipeline::{ModelError, QuotaDecision, SessionError};

/// Why an execution request was refused or could not produce a response.
///
/// Once the model has answered, nothing is reported through this type:
/// parsing never fails and persistence failures are only logged.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The submitted graph has no nodes.
    #[error("workflow has no nodes")]
    EmptyGraph,

    /// No generative backend is configured.
    #[error("generative backend is not configured")]
    BackendNotConfigured,

    /// The request's session could not be resolved.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The user's monthly execution quota is used up.
    #[error("monthly execution limit reached ({} of {} used)", .decision.used, i64::from(.decision.limit))]
    QuotaExceeded {
        /// The denying decision.
        decision: QuotaDecision,
    },

    /// The generative backend failed on every attempted path.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl DispatchError {
    /// HTTP status the error is reported with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::EmptyGraph => 400,
            Self::BackendNotConfigured => 503,
            Self::Session(SessionError::Unavailable(_)) => 503,
            Self::Session(_) => 401,
            Self::QuotaExceeded { .. } => 402,
            Self::Model(error) => match error {
                ModelError::Auth { .. } => 401,
                ModelError::RateLimited { .. } | ModelError::QuotaExhausted { .. } => 429,
                ModelError::Unavailable { .. } => 503,
                ModelError::Rejected { .. }
                | ModelError::EmptyResponse
                | ModelError::Transport { .. } => 500,
            },
        }
    }

    /// Short machine-readable code for error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyGraph => "empty_workflow",
            Self::BackendNotConfigured => "backend_not_configured",
            Self::Session(SessionError::Unavailable(_)) => "session_unavailable",
            Self::Session(_) => "unauthorized",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Model(error) => match error {
                ModelError::Auth { .. } => "backend_auth_failed",
                ModelError::RateLimited { .. } => "backend_rate_limited",
                ModelError::QuotaExhausted { .. } => "backend_quota_exhausted",
                ModelError::Unavailable { .. } => "backend_unavailable",
                ModelError::Rejected { .. } => "backend_rejected",
                ModelError::EmptyResponse => "backend_empty_response",
                ModelError::Transport { .. } => "backend_transport",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{ExecutionLimit, SubscriptionTier};

    use super::*;

    #[test]
    fn statuses_follow_the_error_category() {
        let denied = QuotaDecision::evaluate(SubscriptionTier::Free, ExecutionLimit::Limited(3), 3);
        let cases = [
            (DispatchError::EmptyGraph, 400),
            (DispatchError::BackendNotConfigured, 503),
            (DispatchError::Session(SessionError::Missing), 401),
            (DispatchError::Session(SessionError::Unavailable("down".into())), 503),
            (DispatchError::QuotaExceeded { decision: denied }, 402),
            (ModelError::Auth { message: "bad key".into() }.into(), 401),
            (ModelError::RateLimited { retry_after_secs: None }.into(), 429),
            (ModelError::QuotaExhausted { message: "daily".into() }.into(), 429),
            (ModelError::Unavailable { message: "503".into() }.into(), 503),
            (ModelError::EmptyResponse.into(), 500),
        ];
        for (error, status) in cases {
            assert_eq!(error.status_code(), status, "{error}");
        }
    }
}
