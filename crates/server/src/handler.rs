//! Route handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::{Deserialize, Serialize};

use dispatcher::{BackendHealth, ExecutionOutcome, ExecutionRequest};
use pipeline::{Edge, Node, QuotaDecision, WorkflowGraph, WorkflowId};

use crate::{AppState, HttpError, TRACING_TARGET_HTTP};

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Request body of `POST /api/workflows/execute`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
}

impl From<ExecuteBody> for ExecutionRequest {
    fn from(body: ExecuteBody) -> Self {
        Self {
            graph: WorkflowGraph {
                nodes: body.nodes,
                edges: body.edges,
            },
            workflow_id: body.workflow_id.and_then(WorkflowId::new),
            workflow_name: body
                .workflow_name
                .filter(|name| !name.trim().is_empty()),
        }
    }
}

/// Successful execution body.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

/// Body of `GET /api/workflows/execute`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub backend: BackendHealth,
}

/// Body of `GET /api/quota`.
#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    #[serde(flatten)]
    pub decision: QuotaDecision,
    /// `-1` for unlimited tiers.
    pub remaining: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[tracing::instrument(skip_all, fields(nodes = tracing::field::Empty))]
pub(crate) async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Result<Json<ExecuteResponse>, HttpError> {
    let Json(body) = body?;
    tracing::Span::current().record("nodes", body.nodes.len());

    let outcome = state
        .orchestrator()
        .execute(bearer_token(&headers), body.into())
        .await?;

    tracing::info!(
        target: TRACING_TARGET_HTTP,
        archetype = outcome.metadata.archetype,
        results = outcome.per_node_results.len(),
        "execution completed"
    );
    Ok(Json(ExecuteResponse {
        success: true,
        outcome,
    }))
}

#[tracing::instrument(skip_all)]
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.orchestrator().health(),
    })
}

#[tracing::instrument(skip_all)]
pub(crate) async fn quota(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QuotaResponse>, HttpError> {
    let decision = state
        .orchestrator()
        .quota_status(bearer_token(&headers))
        .await?;
    Ok(Json(QuotaResponse {
        remaining: decision.remaining_or_sentinel(),
        decision,
    }))
}

/// Extracts the token of an `Authorization: Bearer` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn with_auth(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&with_auth("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&with_auth("Bearer  abc ")), Some("abc"));
    }

    #[test]
    fn other_schemes_and_blank_tokens_are_ignored() {
        assert_eq!(bearer_token(&with_auth("Basic dXNlcg==")), None);
        assert_eq!(bearer_token(&with_auth("Bearer ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn blank_workflow_fields_are_dropped() {
        let body = ExecuteBody {
            workflow_id: Some(String::new()),
            workflow_name: Some("  ".into()),
            ..ExecuteBody::default()
        };
        let request = ExecutionRequest::from(body);
        assert!(request.workflow_id.is_none());
        assert!(request.workflow_name.is_none());
    }
}
