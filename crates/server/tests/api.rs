//! Endpoint behaviour through the full router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use dispatcher::{Collaborators, DispatchSettings, ExecutionOrchestrator};
use pipeline::{
    ExecutionId, ExecutionRecord, GenerationRequest, ModelClient, ModelError, SubscriptionTier,
    Timestamp, UserId,
};
use serde_json::{json, Value};
use server::{router, AppState, RouterOptions, EXECUTE_PATH, QUOTA_PATH};
use store::{BearerIdentityResolver, MemoryStore};

struct CannedModel(Result<String, ModelError>);

#[async_trait]
impl ModelClient for CannedModel {
    fn model_name(&self) -> &str {
        "canned-model"
    }

    async fn generate(&self, _: GenerationRequest<'_>) -> Result<String, ModelError> {
        self.0.clone()
    }
}

fn answer() -> String {
    let body = json!({
        "summary": "## Findings\nRevenue is flat.",
        "perNodeResults": [
            {"nodeId": "n1", "nodeName": "Sales data", "result": "loaded"},
            {"nodeId": "n2", "nodeName": "Trend analysis", "result": "flat"}
        ]
    });
    format!("Here you go:\n```json\n{body}\n```")
}

fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

fn app(model: Option<Result<String, ModelError>>, store: MemoryStore) -> anyhow::Result<TestServer> {
    let store = Arc::new(store);
    let orchestrator = ExecutionOrchestrator::new(
        Collaborators {
            model: model.map(|answer| Arc::new(CannedModel(answer)) as Arc<dyn ModelClient>),
            store: store.clone(),
            accounts: store,
            sessions: Arc::new(BearerIdentityResolver),
            fetcher: None,
        },
        DispatchSettings::default(),
    );
    let app = router(AppState::new(Arc::new(orchestrator)), &RouterOptions::default());
    TestServer::new(app)
}

fn graph() -> Value {
    json!({
        "nodes": [
            {"id": "n1", "type": "dataSource", "data": {"label": "Sales data"}},
            {"id": "n2", "type": "analysis", "data": {"label": "Trend analysis"}}
        ],
        "edges": [{"id": "e1", "source": "n1", "target": "n2"}],
        "workflowName": "Quarterly review"
    })
}

fn bearer() -> HeaderValue {
    HeaderValue::from_static("Bearer alice")
}

#[tokio::test]
async fn health_reports_configured_backend() -> anyhow::Result<()> {
    let server = app(Some(Ok(answer())), MemoryStore::new())?;

    let response = server.get(EXECUTE_PATH).await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["backendConfigured"], true);
    assert_eq!(body["model"], "canned-model");
    Ok(())
}

#[tokio::test]
async fn health_without_backend_reports_null_model() -> anyhow::Result<()> {
    let server = app(None, MemoryStore::new())?;

    let body = server.get(EXECUTE_PATH).await.json::<Value>();

    assert_eq!(body["backendConfigured"], false);
    assert_eq!(body["model"], Value::Null);
    Ok(())
}

#[tokio::test]
async fn execute_returns_parsed_results() -> anyhow::Result<()> {
    let server = app(Some(Ok(answer())), MemoryStore::new())?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&graph())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["success"], true);
    assert_eq!(body["result"], "## Findings\nRevenue is flat.");
    assert_eq!(body["perNodeResults"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["metadata"]["nodesProcessed"], 2);
    assert_eq!(body["metadata"]["edgesProcessed"], 1);
    assert!(body["metadata"]["executionId"].is_string());
    assert_eq!(body["metadata"]["unmatchedNodeIds"], json!([]));
    Ok(())
}

#[tokio::test]
async fn empty_graph_is_bad_request() -> anyhow::Result<()> {
    let server = app(Some(Ok(answer())), MemoryStore::new())?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&json!({"nodes": [], "edges": []}))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "empty_workflow");
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_rejected_with_error_shape() -> anyhow::Result<()> {
    let server = app(Some(Ok(answer())), MemoryStore::new())?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&json!({"nodes": "not a list"}))
        .await;

    assert!(response.status_code().is_client_error());
    let body = response.json::<Value>();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "invalid_request");
    Ok(())
}

#[tokio::test]
async fn missing_session_is_unauthorized() -> anyhow::Result<()> {
    let server = app(Some(Ok(answer())), MemoryStore::new())?;

    let response = server.post(EXECUTE_PATH).json(&graph()).await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn unconfigured_backend_is_service_unavailable() -> anyhow::Result<()> {
    let server = app(None, MemoryStore::new())?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&graph())
        .await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["error"], "backend_not_configured");
    Ok(())
}

#[tokio::test]
async fn exhausted_quota_asks_for_upgrade() -> anyhow::Result<()> {
    let store = (0..3).fold(MemoryStore::new(), |store, _| {
        store.with_execution(ExecutionRecord::completed(
            ExecutionId::new_random(),
            alice(),
            None,
            Timestamp::now(),
            "earlier",
            1,
        ))
    });
    let server = app(Some(Ok(answer())), store)?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&graph())
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body = response.json::<Value>();
    assert_eq!(body["error"], "quota_exceeded");
    assert_eq!(body["remaining"], 0);
    assert_eq!(body["requiresUpgrade"], true);
    Ok(())
}

#[tokio::test]
async fn upstream_rate_limit_sets_retry_after() -> anyhow::Result<()> {
    let server = app(
        Some(Err(ModelError::RateLimited {
            retry_after_secs: Some(30),
        })),
        MemoryStore::new(),
    )?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&graph())
        .await;

    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.header(header::RETRY_AFTER), "30");
    assert_eq!(response.json::<Value>()["retryAfter"], 30);
    Ok(())
}

#[tokio::test]
async fn upstream_auth_failure_is_unauthorized() -> anyhow::Result<()> {
    let server = app(
        Some(Err(ModelError::Auth {
            message: "API key not valid".into(),
        })),
        MemoryStore::new(),
    )?;

    let response = server
        .post(EXECUTE_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .json(&graph())
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["error"], "backend_auth_failed");
    Ok(())
}

#[tokio::test]
async fn quota_endpoint_reports_standing() -> anyhow::Result<()> {
    let store = MemoryStore::new().with_subscription(alice(), SubscriptionTier::Enterprise);
    let server = app(Some(Ok(answer())), store)?;

    let response = server
        .get(QUOTA_PATH)
        .add_header(header::AUTHORIZATION, bearer())
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["tier"], "enterprise");
    assert_eq!(body["allowed"], true);
    assert_eq!(body["remaining"], -1);
    Ok(())
}
