//! RestStore and GoTrueSessionResolver against a mocked PostgREST / GoTrue.

use std::time::Duration;

use pipeline::{
    AccountDirectory, Credits, ExecutionId, ExecutionRecord, ExecutionStore, NodeResult,
    QuotaWindow, ReservationId, SessionError, SessionResolver, SlotReservation, StoreError,
    SubscriptionTier, Timestamp, UserId,
};
use serde_json::json;
use store::{GoTrueSessionResolver, RestConfig, RestStore};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn store(server: &MockServer) -> RestStore {
    RestStore::new(RestConfig::new(server.uri(), "service-key")).unwrap()
}

fn alice() -> UserId {
    UserId::new("alice").unwrap()
}

#[tokio::test]
async fn counts_executions_from_content_range() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/rest/v1/executions"))
        .and(query_param("user_id", "eq.alice"))
        .and(header("apikey", "service-key"))
        .and(header("Prefer", "count=exact"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-range", "*/3"))
        .expect(1)
        .mount(&server)
        .await;

    let window = QuotaWindow::month_of(Timestamp::now());
    assert_eq!(store(&server).count_executions(&alice(), window).await.unwrap(), 3);
}

#[tokio::test]
async fn reserve_slot_maps_rpc_reply() {
    let server = MockServer::start().await;
    let reservation = ReservationId::new_random();
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/reserve_execution_slot"))
        .and(body_partial_json(json!({"p_user_id": "alice", "p_limit": 3})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"reservation_id": reservation, "used": 2})),
        )
        .mount(&server)
        .await;

    let window = QuotaWindow::month_of(Timestamp::now());
    let slot = store(&server).reserve_slot(&alice(), window, 3).await.unwrap();
    assert_eq!(
        slot,
        SlotReservation::Granted {
            id: reservation,
            used: 2
        }
    );
}

#[tokio::test]
async fn reserve_slot_denial_has_null_reservation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/reserve_execution_slot"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"reservation_id": null, "used": 3}])),
        )
        .mount(&server)
        .await;

    let window = QuotaWindow::month_of(Timestamp::now());
    let slot = store(&server).reserve_slot(&alice(), window, 3).await.unwrap();
    assert_eq!(slot, SlotReservation::Denied { used: 3 });
}

#[tokio::test]
async fn create_execution_inserts_then_releases_reservation() {
    let server = MockServer::start().await;
    let reservation = ReservationId::new_random();
    let record = ExecutionRecord::completed(
        ExecutionId::new_random(),
        alice(),
        None,
        Timestamp::now(),
        "## Summary",
        4,
    );

    Mock::given(method("POST"))
        .and(path("/rest/v1/executions"))
        .and(body_partial_json(json!({"user_id": "alice", "status": "completed", "nodes_executed": 4})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/release_execution_slot"))
        .and(body_partial_json(json!({"p_reservation_id": reservation})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    store(&server)
        .create_execution(&record, Some(reservation))
        .await
        .unwrap();
}

#[tokio::test]
async fn create_execution_succeeds_when_release_fails_after_insert() {
    let server = MockServer::start().await;
    let record = ExecutionRecord::completed(
        ExecutionId::new_random(),
        alice(),
        None,
        Timestamp::now(),
        "## Summary",
        2,
    );

    Mock::given(method("POST"))
        .and(path("/rest/v1/executions"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/release_execution_slot"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    // The row exists, so the caller must not treat the write as failed.
    store(&server)
        .create_execution(&record, Some(ReservationId::new_random()))
        .await
        .unwrap();
}

#[tokio::test]
async fn empty_node_results_skip_the_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let results: Vec<NodeResult> = Vec::new();
    store(&server).insert_node_results(&results).await.unwrap();
}

#[tokio::test]
async fn postgrest_errors_carry_status_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/deduct_credits"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "P0001", "message": "insufficient credits", "details": null, "hint": null
        })))
        .mount(&server)
        .await;

    let err = store(&server)
        .deduct_credits(&alice(), Credits::for_nodes(5))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Rejected {
            status: 400,
            message: "insufficient credits".into()
        }
    );
}

#[tokio::test]
async fn tier_lookups_read_first_row() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/subscriptions"))
        .and(query_param("status", "eq.active"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"tier": "Pro"}])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let store = store(&server);
    assert_eq!(
        store.active_subscription_tier(&alice()).await.unwrap(),
        Some(SubscriptionTier::Pro)
    );
    assert_eq!(store.profile_tier(&alice()).await.unwrap(), None);
}

#[tokio::test]
async fn unreachable_datastore_is_reported() {
    let config = RestConfig {
        timeout: Duration::from_millis(200),
        ..RestConfig::new("http://127.0.0.1:9", "k")
    };
    let err = RestStore::new(config)
        .unwrap()
        .profile_tier(&alice())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unreachable(_)), "{err:?}");
}

#[tokio::test]
async fn gotrue_resolves_user_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer good-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "user-123", "email": "a@example.com"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/v1/user"))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let resolver =
        GoTrueSessionResolver::new(&server.uri(), "anon", Duration::from_secs(2)).unwrap();
    assert_eq!(
        resolver.resolve(Some("good-token")).await.unwrap().as_str(),
        "user-123"
    );
    assert_eq!(resolver.resolve(Some("expired")).await, Err(SessionError::Invalid));
    assert_eq!(resolver.resolve(None).await, Err(SessionError::Missing));
}
