//! Persisted execution artefacts: one record per run and one row per node result.
//!
//! Both are append-only. The orchestrator builds them once the model answer
//! has been parsed and never updates them afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ExecutionId, NodeId, Timestamp, UserId, WorkflowId};

/// Longest `result_summary` stored on an [`ExecutionRecord`], in characters.
pub const RESULT_SUMMARY_MAX_CHARS: usize = 500;

/// Lifecycle state of an execution record.
///
/// Records are only written after a run finishes, so the only state ever
/// persisted is [`ExecutionStatus::Completed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The run produced a model answer.
    #[default]
    Completed,
}

/// One execution of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Record id.
    pub id: ExecutionId,
    /// Owner of the run.
    pub user_id: UserId,
    /// Saved workflow the graph came from, if any.
    pub workflow_id: Option<WorkflowId>,
    /// Always [`ExecutionStatus::Completed`].
    pub status: ExecutionStatus,
    /// When the request was received.
    pub started_at: Timestamp,
    /// When the model answer was parsed.
    pub completed_at: Timestamp,
    /// Leading part of the summary.
    pub result_summary: String,
    /// Number of nodes in the submitted graph.
    pub nodes_executed: u32,
}

impl ExecutionRecord {
    /// Builds a completed record, truncating `summary` to [`RESULT_SUMMARY_MAX_CHARS`].
    pub fn completed(
        id: ExecutionId,
        user_id: UserId,
        workflow_id: Option<WorkflowId>,
        started_at: Timestamp,
        summary: &str,
        nodes_executed: usize,
    ) -> Self {
        Self {
            id,
            user_id,
            workflow_id,
            status: ExecutionStatus::Completed,
            started_at,
            completed_at: Timestamp::now(),
            result_summary: summary.chars().take(RESULT_SUMMARY_MAX_CHARS).collect(),
            nodes_executed: u32::try_from(nodes_executed).unwrap_or(u32::MAX),
        }
    }
}

/// The model's answer for one node of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResult {
    /// Execution the result belongs to.
    pub execution_id: ExecutionId,
    /// Node the model attributed the result to.
    pub node_id: NodeId,
    /// Display name of that node.
    pub node_name: String,
    /// The per-node object exactly as the model returned it.
    pub result: Value,
    /// When the row was built.
    pub created_at: Timestamp,
}

impl NodeResult {
    /// Builds a row from one `perNodeResults` entry.
    ///
    /// Returns `None` for entries without a non-empty string `nodeId`. The name
    /// comes from `known_name` when the id is in the manifest, then from the
    /// entry's own `nodeName`, then from the id itself.
    pub fn from_model_entry(
        execution_id: ExecutionId,
        entry: &Value,
        known_name: impl FnOnce(&str) -> Option<String>,
    ) -> Option<Self> {
        let node_id = entry.get("nodeId").and_then(Value::as_str)?;
        let node_id = NodeId::new(node_id)?;
        let node_name = known_name(node_id.as_str())
            .or_else(|| {
                entry
                    .get("nodeName")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
            })
            .unwrap_or_else(|| node_id.to_string());

        Some(Self {
            execution_id,
            node_id,
            node_name,
            result: entry.clone(),
            created_at: Timestamp::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn summary_is_truncated() {
        let summary = "x".repeat(RESULT_SUMMARY_MAX_CHARS + 50);
        let record = ExecutionRecord::completed(
            ExecutionId::new_random(),
            UserId::new("u1").unwrap(),
            None,
            Timestamp::now(),
            &summary,
            4,
        );
        assert_eq!(record.result_summary.chars().count(), RESULT_SUMMARY_MAX_CHARS);
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.nodes_executed, 4);
    }

    #[test]
    fn node_result_prefers_manifest_name() {
        let id = ExecutionId::new_random();
        let entry = json!({"nodeId": "n1", "nodeName": "model name", "score": 3});

        let row = NodeResult::from_model_entry(id, &entry, |_| Some("Graph Name".into())).unwrap();
        assert_eq!(row.node_name, "Graph Name");
        assert_eq!(row.result["score"], 3);

        let row = NodeResult::from_model_entry(id, &entry, |_| None).unwrap();
        assert_eq!(row.node_name, "model name");
    }

    #[test]
    fn entries_without_node_id_are_skipped() {
        let id = ExecutionId::new_random();
        assert!(NodeResult::from_model_entry(id, &json!({"nodeName": "x"}), |_| None).is_none());
        assert!(NodeResult::from_model_entry(id, &json!({"nodeId": ""}), |_| None).is_none());
    }
}
