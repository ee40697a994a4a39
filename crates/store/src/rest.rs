//! PostgREST-backed store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use pipeline::{
    AccountDirectory, Credits, ExecutionRecord, ExecutionStore, NodeResult, QuotaWindow,
    ReservationId, SlotReservation, StoreError, SubscriptionTier, UserId,
};

use crate::TRACING_TARGET_STORE;

/// Connection settings for [`RestStore`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project root, e.g. `https://abc.supabase.co`. `/rest/v1` is appended.
    pub base_url: String,
    /// Service key sent as `apikey` and bearer token.
    pub service_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl RestConfig {
    /// Settings with a ten second timeout.
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// [`ExecutionStore`] and [`AccountDirectory`] over a PostgREST API.
///
/// Slot admission and credit deduction are delegated to RPC functions so the
/// database performs them in one transaction.
#[derive(Debug, Clone)]
pub struct RestStore {
    http: Client,
    rest_url: String,
    service_key: String,
}

impl RestStore {
    /// Builds the store client. Does not contact the datastore.
    pub fn new(config: RestConfig) -> Result<Self, StoreError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| StoreError::Unreachable(err.to_string()))?;
        Ok(Self {
            http,
            rest_url: format!("{}/rest/v1", config.base_url),
            service_key: config.service_key,
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}/{name}", self.rest_url)
    }

    fn rpc(&self, function: &str) -> RequestBuilder {
        self.authorised(self.http.post(format!("{}/rpc/{function}", self.rest_url)))
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.send().await.map_err(|err| {
            tracing::debug!(target: TRACING_TARGET_STORE, operation, error = %err, "datastore unreachable");
            StoreError::Unreachable(err.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<PostgrestError>(&body)
            .map(|error| error.message)
            .unwrap_or(body);
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    async fn rows<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Vec<T>, StoreError> {
        self.send(operation, request)
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))
    }

    async fn first_tier(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Option<SubscriptionTier>, StoreError> {
        let rows: Vec<TierRow> = self.rows(operation, request).await?;
        let Some(name) = rows.into_iter().find_map(|row| row.tier) else {
            return Ok(None);
        };
        let tier = SubscriptionTier::parse(&name);
        if tier.is_none() {
            tracing::warn!(
                target: TRACING_TARGET_STORE,
                operation,
                tier = %name,
                "unrecognised subscription tier"
            );
        }
        Ok(tier)
    }
}

#[async_trait]
impl ExecutionStore for RestStore {
    async fn count_executions(&self, user: &UserId, window: QuotaWindow) -> Result<u32, StoreError> {
        let request = self
            .authorised(self.http.head(self.table("executions")))
            .header("Prefer", "count=exact")
            .query(&[
                ("select", "id".to_owned()),
                ("user_id", format!("eq.{user}")),
                ("started_at", format!("gte.{}", window.start)),
                ("started_at", format!("lt.{}", window.end)),
            ]);
        let response = self.send("count_executions", request).await?;
        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| StoreError::Decode("missing Content-Range header".to_owned()))?;
        parse_total(content_range)
    }

    async fn reserve_slot(
        &self,
        user: &UserId,
        window: QuotaWindow,
        limit: u32,
    ) -> Result<SlotReservation, StoreError> {
        let request = self.rpc("reserve_execution_slot").json(&json!({
            "p_user_id": user,
            "p_window_start": window.start,
            "p_window_end": window.end,
            "p_limit": limit,
        }));
        let reply: OneOrMany<ReserveReply> = self
            .send("reserve_execution_slot", request)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Decode(err.to_string()))?;
        let reply = reply
            .into_first()
            .ok_or_else(|| StoreError::Decode("reserve_execution_slot returned no row".to_owned()))?;

        Ok(match reply.reservation_id {
            Some(id) => SlotReservation::Granted {
                id: ReservationId::from_uuid(id),
                used: reply.used,
            },
            None => SlotReservation::Denied { used: reply.used },
        })
    }

    async fn release_slot(&self, reservation: ReservationId) -> Result<(), StoreError> {
        let request = self
            .rpc("release_execution_slot")
            .json(&json!({ "p_reservation_id": reservation }));
        self.send("release_execution_slot", request).await.map(drop)
    }

    async fn create_execution(
        &self,
        record: &ExecutionRecord,
        reservation: Option<ReservationId>,
    ) -> Result<(), StoreError> {
        let request = self
            .authorised(self.http.post(self.table("executions")))
            .header("Prefer", "return=minimal")
            .json(record);
        self.send("create_execution", request).await?;

        // The record now counts towards the month; the placeholder goes. Once
        // the row exists a failed release is logged, never reported.
        if let Some(reservation) = reservation {
            if let Err(error) = self.release_slot(reservation).await {
                tracing::warn!(
                    target: TRACING_TARGET_STORE,
                    reservation = %reservation,
                    error = %error,
                    "execution stored but its reservation was not released"
                );
            }
        }
        Ok(())
    }

    async fn insert_node_results(&self, results: &[NodeResult]) -> Result<(), StoreError> {
        if results.is_empty() {
            return Ok(());
        }
        let request = self
            .authorised(self.http.post(self.table("node_results")))
            .header("Prefer", "return=minimal")
            .json(results);
        self.send("insert_node_results", request).await.map(drop)
    }
}

#[async_trait]
impl AccountDirectory for RestStore {
    async fn active_subscription_tier(
        &self,
        user: &UserId,
    ) -> Result<Option<SubscriptionTier>, StoreError> {
        let request = self
            .authorised(self.http.get(self.table("subscriptions")))
            .query(&[
                ("select", "tier".to_owned()),
                ("user_id", format!("eq.{user}")),
                ("status", "eq.active".to_owned()),
                ("order", "created_at.desc".to_owned()),
                ("limit", "1".to_owned()),
            ]);
        self.first_tier("active_subscription_tier", request).await
    }

    async fn profile_tier(&self, user: &UserId) -> Result<Option<SubscriptionTier>, StoreError> {
        let request = self
            .authorised(self.http.get(self.table("profiles")))
            .query(&[
                ("select", "tier:subscription_tier".to_owned()),
                ("id", format!("eq.{user}")),
                ("limit", "1".to_owned()),
            ]);
        self.first_tier("profile_tier", request).await
    }

    async fn deduct_credits(&self, user: &UserId, credits: Credits) -> Result<(), StoreError> {
        let request = self.rpc("deduct_credits").json(&json!({
            "p_user_id": user,
            "p_amount": credits.as_u32(),
        }));
        self.send("deduct_credits", request).await.map(drop)
    }
}

// ---------------------------------------------------------------------------
// Wire shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PostgrestError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TierRow {
    #[serde(default)]
    tier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReserveReply {
    reservation_id: Option<Uuid>,
    used: u32,
}

/// RPC functions returning a row type come back as an object or as a
/// one-element array depending on how they are declared.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_first(self) -> Option<T> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.into_iter().next(),
        }
    }
}

/// Reads the total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_total(content_range: &str) -> Result<u32, StoreError> {
    content_range
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse::<u32>().ok())
        .ok_or_else(|| StoreError::Decode(format!("unusable Content-Range: {content_range}")))
}
