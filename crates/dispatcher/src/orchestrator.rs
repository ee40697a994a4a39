//! The execution state machine.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;

use pipeline::{
    classify, compose, parse_response, AccountDirectory, Archetype, ComposeInput, ContentFetcher,
    ExecutionId, ExecutionRecord, ExecutionStore, ExternalContent, MediaReference, ModelClient,
    NodeKind, NodeManifest, NodeResult, QuotaDecision, QuotaPolicy,
    SessionResolver, Timestamp, UserId, WorkflowGraph, WorkflowId, DEFAULT_CONTENT_BUDGET,
};

use crate::{DispatchError, ModelInvoker, QuotaGuard, SlotHold, TRACING_TARGET_ORCHESTRATOR};

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One submitted graph.
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Nodes and edges as sent by the editor.
    pub graph: WorkflowGraph,
    /// Saved workflow id, if any.
    pub workflow_id: Option<WorkflowId>,
    /// Saved workflow name, if any. Used as a classification cue.
    pub workflow_name: Option<String>,
}

/// Metadata returned alongside every successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Nodes in the submitted graph.
    pub nodes_processed: usize,
    /// Edges in the submitted graph.
    pub edges_processed: usize,
    /// When the response was assembled.
    pub timestamp: Timestamp,
    /// Selected archetype, e.g. `content-impact`.
    pub archetype: &'static str,
    /// Id of the persisted record; absent when persistence failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// `nodeId`s in the model's results that match no submitted node.
    pub unmatched_node_ids: Vec<String>,
}

/// A successful execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    /// Markdown summary, or the raw model text when no JSON was recovered.
    pub result: String,
    /// Per-node result objects as the model produced them.
    pub per_node_results: Vec<Value>,
    /// Run metadata.
    pub metadata: ExecutionMetadata,
}

/// What the health endpoint reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    /// `true` if a generative backend is configured.
    pub backend_configured: bool,
    /// Model identifier, when configured.
    pub model: Option<String>,
}

/// The stages an execution passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ExecutionStage {
    /// Request accepted for processing.
    Received,
    /// Session resolved and quota admitted.
    QuotaChecked,
    /// Archetype selected.
    Classified,
    /// Prompt composed.
    Prompted,
    /// Model answered.
    Invoked,
    /// Answer parsed into summary and per-node results.
    Parsed,
    /// Record and node results written (or the attempt logged).
    Persisted,
    /// Outcome assembled.
    Responded,
}

impl ExecutionStage {
    /// Lower-case stage name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::QuotaChecked => "quota-checked",
            Self::Classified => "classified",
            Self::Prompted => "prompted",
            Self::Invoked => "invoked",
            Self::Parsed => "parsed",
            Self::Persisted => "persisted",
            Self::Responded => "responded",
        }
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Injected adapters.
#[derive(Clone)]
pub struct Collaborators {
    /// Generative backend; `None` when no API key is configured.
    pub model: Option<Arc<dyn ModelClient>>,
    /// Execution records, node results and slot reservations.
    pub store: Arc<dyn ExecutionStore>,
    /// Tiers and credit balances.
    pub accounts: Arc<dyn AccountDirectory>,
    /// Bearer token → user.
    pub sessions: Arc<dyn SessionResolver>,
    /// Article fetcher; `None` disables content embedding.
    pub fetcher: Option<Arc<dyn ContentFetcher>>,
}

/// Tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Tier → monthly limit table.
    pub quota: QuotaPolicy,
    /// Character budget for fetched content embedded in prompts.
    pub content_budget: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            quota: QuotaPolicy::default(),
            content_budget: DEFAULT_CONTENT_BUDGET,
        }
    }
}

/// Drives submitted graphs through classification, prompting, invocation,
/// parsing and persistence.
///
/// Shared across requests behind an `Arc`; holds no per-request state.
pub struct ExecutionOrchestrator {
    invoker: Option<ModelInvoker>,
    store: Arc<dyn ExecutionStore>,
    sessions: Arc<dyn SessionResolver>,
    fetcher: Option<Arc<dyn ContentFetcher>>,
    quota: QuotaGuard,
    content_budget: usize,
}

impl ExecutionOrchestrator {
    /// Wires the orchestrator.
    pub fn new(collaborators: Collaborators, settings: DispatchSettings) -> Self {
        let Collaborators {
            model,
            store,
            accounts,
            sessions,
            fetcher,
        } = collaborators;
        Self {
            invoker: model.map(ModelInvoker::new),
            quota: QuotaGuard::new(store.clone(), accounts, settings.quota),
            store,
            sessions,
            fetcher,
            content_budget: settings.content_budget,
        }
    }

    /// Backend configuration as reported by the health endpoint.
    pub fn health(&self) -> BackendHealth {
        BackendHealth {
            backend_configured: self.invoker.is_some(),
            model: self
                .invoker
                .as_ref()
                .map(|invoker| invoker.model_name().to_owned()),
        }
    }

    /// The caller's quota standing, without reserving a slot.
    pub async fn quota_status(
        &self,
        bearer_token: Option<&str>,
    ) -> Result<QuotaDecision, DispatchError> {
        let user = self.sessions.resolve(bearer_token).await?;
        Ok(self.quota.check(&user, Timestamp::now()).await)
    }

    /// Runs one execution.
    ///
    /// Errors are only returned before the model has produced an answer. From
    /// then on every failure is logged and the outcome is returned regardless.
    /// Dropping the returned future frees any quota slot the run still holds.
    pub async fn execute(
        &self,
        bearer_token: Option<&str>,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let span = tracing::info_span!(
            target: TRACING_TARGET_ORCHESTRATOR,
            "execute",
            user_id = tracing::field::Empty,
            workflow_id = request.workflow_id.as_ref().map(WorkflowId::as_str),
            node_count = request.graph.nodes.len(),
            archetype = tracing::field::Empty,
        );
        self.run(bearer_token, request).instrument(span).await
    }

    async fn run(
        &self,
        bearer_token: Option<&str>,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome, DispatchError> {
        let started_at = Timestamp::now();
        enter(ExecutionStage::Received);

        if request.graph.is_empty() {
            return Err(DispatchError::EmptyGraph);
        }
        let invoker = self.invoker.as_ref().ok_or(DispatchError::BackendNotConfigured)?;

        let user = self.sessions.resolve(bearer_token).await?;
        tracing::Span::current().record("user_id", user.as_str());

        let admission = self.quota.admit(&user, started_at).await;
        if !admission.decision.allowed {
            tracing::info!(
                target: TRACING_TARGET_ORCHESTRATOR,
                tier = %admission.decision.tier,
                used = admission.decision.used,
                "execution refused: quota exhausted"
            );
            return Err(DispatchError::QuotaExceeded {
                decision: admission.decision,
            });
        }
        let slot = self.quota.hold(admission.reservation);
        enter(ExecutionStage::QuotaChecked);

        let graph = &request.graph;
        let archetype = classify(graph, request.workflow_name.as_deref());
        tracing::Span::current().record("archetype", archetype.as_str());
        enter(ExecutionStage::Classified);

        let content = self.fetch_content(archetype, graph).await;
        let input = ComposeInput::new(graph)
            .with_workflow_name(request.workflow_name.as_deref())
            .with_content(content.as_ref(), self.content_budget);
        let prompt = compose(archetype, &input);
        enter(ExecutionStage::Prompted);

        let invocation = match invoker.invoke(&prompt).await {
            Ok(invocation) => invocation,
            Err(error) => {
                tracing::error!(
                    target: TRACING_TARGET_ORCHESTRATOR,
                    %error,
                    "generative backend failed"
                );
                slot.release().await;
                return Err(DispatchError::Model(error));
            }
        };
        enter(ExecutionStage::Invoked);

        let parsed = parse_response(&invocation.text);
        let audit = prompt.manifest.audit(&parsed.per_node_results);
        if !audit.is_clean() {
            tracing::warn!(
                target: TRACING_TARGET_ORCHESTRATOR,
                unmatched = ?audit.unmatched_node_ids,
                without_node_id = audit.results_without_node_id,
                exceeds_node_count = audit.exceeds_node_count,
                results = parsed.per_node_results.len(),
                nodes = graph.nodes.len(),
                "model results do not match the node manifest"
            );
        }
        enter(ExecutionStage::Parsed);

        let execution_id = self
            .persist(
                &user,
                &request,
                started_at,
                &parsed.summary,
                &parsed.per_node_results,
                &prompt.manifest,
                slot,
            )
            .await;
        self.quota.charge(&user, graph.nodes.len()).await;
        enter(ExecutionStage::Persisted);

        let outcome = ExecutionOutcome {
            metadata: ExecutionMetadata {
                nodes_processed: graph.nodes.len(),
                edges_processed: graph.edges.len(),
                timestamp: Timestamp::now(),
                archetype: archetype.as_str(),
                execution_id,
                unmatched_node_ids: audit.unmatched_node_ids,
            },
            result: parsed.summary,
            per_node_results: parsed.per_node_results,
        };
        enter(ExecutionStage::Responded);
        tracing::info!(
            target: TRACING_TARGET_ORCHESTRATOR,
            multimodal = invocation.multimodal,
            results = outcome.per_node_results.len(),
            persisted = execution_id.is_some(),
            "execution completed"
        );
        Ok(outcome)
    }

    /// Fetches article text for archetypes that analyse it. Video URLs are
    /// attached by the invoker instead and are skipped here.
    async fn fetch_content(
        &self,
        archetype: Archetype,
        graph: &WorkflowGraph,
    ) -> Option<ExternalContent> {
        if !matches!(archetype, Archetype::ContentImpact | Archetype::MediaBias) {
            return None;
        }
        let fetcher = self.fetcher.as_ref()?;
        let url = graph
            .nodes
            .iter()
            .filter(|node| matches!(node.kind(), NodeKind::ArticleInput | NodeKind::ContentInput))
            .filter_map(|node| node.url())
            .find(|url| MediaReference::parse(url).is_none())?;

        match fetcher.fetch(url).await {
            Ok(content) => Some(content),
            Err(error) => {
                tracing::warn!(
                    target: TRACING_TARGET_ORCHESTRATOR,
                    url,
                    %error,
                    "content fetch failed; continuing without it"
                );
                None
            }
        }
    }

    /// Writes the record and node results. Returns the record id when the
    /// record was stored; failures are logged only.
    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        user: &UserId,
        request: &ExecutionRequest,
        started_at: Timestamp,
        summary: &str,
        per_node_results: &[Value],
        manifest: &NodeManifest,
        slot: SlotHold,
    ) -> Option<ExecutionId> {
        let execution_id = ExecutionId::new_random();
        let record = ExecutionRecord::completed(
            execution_id,
            user.clone(),
            request.workflow_id.clone(),
            started_at,
            summary,
            request.graph.nodes.len(),
        );

        if let Err(error) = self.store.create_execution(&record, slot.reservation()).await {
            tracing::error!(
                target: TRACING_TARGET_ORCHESTRATOR,
                %execution_id,
                %error,
                "failed to store execution record"
            );
            slot.release().await;
            return None;
        }
        slot.recorded();

        let rows: Vec<NodeResult> = per_node_results
            .iter()
            .filter_map(|entry| {
                NodeResult::from_model_entry(execution_id, entry, |id| {
                    manifest.name_of(id).map(str::to_owned)
                })
            })
            .collect();
        if let Err(error) = self.store.insert_node_results(&rows).await {
            tracing::error!(
                target: TRACING_TARGET_ORCHESTRATOR,
                %execution_id,
                rows = rows.len(),
                %error,
                "failed to store node results"
            );
        }
        Some(execution_id)
    }
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator")
            .field("invoker", &self.invoker)
            .field("quota", &self.quota)
            .field("fetcher", &self.fetcher.is_some())
            .field("content_budget", &self.content_budget)
            .finish_non_exhaustive()
    }
}

fn enter(stage: ExecutionStage) {
    tracing::debug!(target: TRACING_TARGET_ORCHESTRATOR, stage = stage.as_str(), "stage entered");
}
