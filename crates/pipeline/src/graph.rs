//! The submitted workflow graph and the node vocabulary the classifier reads.
//!
//! Graphs arrive as JSON from the editor: an array of nodes with a free-form
//! `type` tag and an open `data` bag, plus an array of edges. Nodes are never
//! mutated; everything here is a read-only view over the request body.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::NodeId;

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A single graph node as authored in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within the graph.
    pub id: NodeId,

    /// Role tag set by the editor (e.g. `"persona"`, `"articleInput"`).
    #[serde(rename = "type", default)]
    pub node_type: String,

    /// Open attribute bag: label, description, url, capability, flags.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Node {
    /// Returns the first non-empty string among the given `data` keys.
    fn data_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.data.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .find(|value| !value.is_empty())
    }

    /// Returns the user-visible label, if the node has one.
    pub fn label(&self) -> Option<&str> {
        self.data_str(&["label", "name", "title"])
    }

    /// Returns the label, falling back to the node id.
    pub fn display_name(&self) -> &str {
        self.label().unwrap_or_else(|| self.id.as_str())
    }

    /// Returns the free-text description, if present.
    pub fn description(&self) -> Option<&str> {
        self.data_str(&["description", "prompt", "instructions"])
    }

    /// Returns the content URL attached to the node, if present.
    pub fn url(&self) -> Option<&str> {
        self.data_str(&["url", "videoUrl", "articleUrl", "sourceUrl"])
    }

    /// Returns the explicit capability tag, if the editor set a recognised one.
    pub fn capability(&self) -> Option<NodeCapability> {
        self.data_str(&["capability"]).and_then(NodeCapability::parse)
    }

    /// Returns the role of this node.
    ///
    /// An explicit capability wins; otherwise the `type` tag decides, and the
    /// label is consulted only for tags outside the known vocabulary.
    pub fn kind(&self) -> NodeKind {
        if let Some(capability) = self.capability() {
            return capability.kind();
        }
        NodeKind::from_type_tag(&self.node_type)
            .unwrap_or_else(|| NodeKind::from_label(self.label().unwrap_or_default()))
    }
}

/// A directed connection between two nodes.
///
/// Edges describe the author's intent and are quoted in prompts; they never
/// determine execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Upstream node id.
    pub source: NodeId,
    /// Downstream node id.
    pub target: NodeId,
}

/// The nodes and edges submitted for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    /// All nodes, in editor order.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// All edges, in editor order.
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Returns `true` if the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks a node up by id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| &node.id == id)
    }

    /// Returns the nodes of the given kind, in editor order.
    pub fn nodes_of(&self, kind: NodeKind) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |node| node.kind() == kind)
    }
}

// ---------------------------------------------------------------------------
// Node vocabulary
// ---------------------------------------------------------------------------

/// The role a node plays in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A video or other media URL to analyse.
    ContentInput,
    /// A news or blog article to analyse.
    ArticleInput,
    /// A simulated audience member, student, or agent.
    Persona,
    /// An analysis or detection step.
    Analysis,
    /// A cleaning or extraction step ahead of analysis.
    Preprocessing,
    /// A dataset, upload, or document feed.
    DataSource,
    /// An individual's uploaded measurements.
    PatientUpload,
    /// A normative dataset to compare against.
    ReferenceDataset,
    /// An explicit comparison step.
    Comparison,
    /// A coordinator over several agents.
    Orchestrator,
    /// A report, chart, or export.
    Output,
    /// Anything not covered above.
    Other,
}

impl NodeKind {
    /// Maps an editor `type` tag to a kind.
    ///
    /// Matching ignores case and any `-`, `_` or whitespace. Returns `None` for
    /// tags outside the known vocabulary.
    pub fn from_type_tag(tag: &str) -> Option<Self> {
        let normalised: String = tag
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let kind = match normalised.as_str() {
            "contentinput" | "videoinput" | "youtubeinput" | "urlinput" | "contentsource"
            | "videosource" | "mediainput" => Self::ContentInput,
            "articleinput" | "newsinput" | "articlesource" | "newsarticle" => Self::ArticleInput,
            "persona" | "personanode" | "audiencepersona" | "viewerpersona" | "studentpersona"
            | "agentpersona" | "agent" => Self::Persona,
            "analysis" | "analyzer" | "analysisnode" | "detector" | "factcheck"
            | "biasdetector" => Self::Analysis,
            "preprocessing" | "preprocess" | "preprocessor" | "extractor" | "cleaner" => {
                Self::Preprocessing
            }
            "datasource" | "dataset" | "datainput" | "upload" | "fileupload"
            | "documentinput" => Self::DataSource,
            "patientupload" | "patientdata" | "patientinput" => Self::PatientUpload,
            "referencedataset" | "referencedata" | "normativedata" | "reference" => {
                Self::ReferenceDataset
            }
            "comparison" | "compare" | "deviation" | "deviationanalysis" => Self::Comparison,
            "orchestrator" | "agentorchestrator" | "coordinator" => Self::Orchestrator,
            "output" | "report" | "visualization" | "dashboard" | "export" => Self::Output,
            _ => return None,
        };
        Some(kind)
    }

    /// Infers a kind from a label for nodes with generic type tags.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| label.contains(needle));

        if has(&["patient", "upload"]) {
            Self::PatientUpload
        } else if has(&["reference", "normative", "baseline dataset"]) {
            Self::ReferenceDataset
        } else if has(&["compar", "deviation"]) {
            Self::Comparison
        } else if has(&["orchestrat", "coordinator"]) {
            Self::Orchestrator
        } else if has(&["persona"]) {
            Self::Persona
        } else if has(&["article", "news"]) {
            Self::ArticleInput
        } else if has(&["video", "youtube"]) {
            Self::ContentInput
        } else if has(&["dataset", "data source", "database"]) {
            Self::DataSource
        } else if has(&["output", "report", "summary"]) {
            Self::Output
        } else {
            Self::Other
        }
    }

    /// Returns `true` for kinds that feed content or data into the graph.
    pub fn is_input(self) -> bool {
        matches!(
            self,
            Self::ContentInput
                | Self::ArticleInput
                | Self::DataSource
                | Self::PatientUpload
                | Self::ReferenceDataset
        )
    }
}

/// An explicit capability tag an editor may attach as `data.capability`.
///
/// When present it replaces type-tag and label heuristics for the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeCapability {
    /// Simulated persona.
    Persona,
    /// Video or media source.
    ContentSource,
    /// Article source.
    ArticleSource,
    /// Detects slant or bias in text.
    BiasDetection,
    /// Checks factual claims.
    FactCheck,
    /// Detects manipulation or propaganda techniques.
    ManipulationDetection,
    /// Individual patient measurements.
    PatientData,
    /// Normative reference measurements.
    ReferenceData,
    /// Compares two datasets.
    Comparison,
    /// Injury-specific assessment.
    InjuryAssessment,
    /// Coordinates several agents.
    Orchestrator,
    /// Generic data feed.
    DataSource,
    /// Report or export.
    Output,
}

impl NodeCapability {
    /// Parses a capability tag, ignoring case. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase().replace('_', "-");
        let capability = match tag.as_str() {
            "persona" => Self::Persona,
            "content-source" => Self::ContentSource,
            "article-source" => Self::ArticleSource,
            "bias-detection" => Self::BiasDetection,
            "fact-check" => Self::FactCheck,
            "manipulation-detection" => Self::ManipulationDetection,
            "patient-data" => Self::PatientData,
            "reference-data" => Self::ReferenceData,
            "comparison" => Self::Comparison,
            "injury-assessment" => Self::InjuryAssessment,
            "orchestrator" => Self::Orchestrator,
            "data-source" => Self::DataSource,
            "output" => Self::Output,
            _ => return None,
        };
        Some(capability)
    }

    /// Returns the node kind implied by this capability.
    pub fn kind(self) -> NodeKind {
        match self {
            Self::Persona => NodeKind::Persona,
            Self::ContentSource => NodeKind::ContentInput,
            Self::ArticleSource => NodeKind::ArticleInput,
            Self::BiasDetection | Self::FactCheck | Self::ManipulationDetection => {
                NodeKind::Analysis
            }
            Self::InjuryAssessment => NodeKind::Analysis,
            Self::PatientData => NodeKind::PatientUpload,
            Self::ReferenceData => NodeKind::ReferenceDataset,
            Self::Comparison => NodeKind::Comparison,
            Self::Orchestrator => NodeKind::Orchestrator,
            Self::DataSource => NodeKind::DataSource,
            Self::Output => NodeKind::Output,
        }
    }

    /// Returns `true` for the media-analysis capabilities.
    pub fn is_media_analysis(self) -> bool {
        matches!(
            self,
            Self::BiasDetection | Self::FactCheck | Self::ManipulationDetection
        )
    }
}

// ---------------------------------------------------------------------------
// Node manifest
// ---------------------------------------------------------------------------

/// One line of the node manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// Literal node id the model must echo back.
    pub node_id: NodeId,
    /// Display name of the node.
    pub node_name: String,
}

/// The literal list of node ids and names embedded in every prompt.
///
/// The model has no other reliable way to refer to graph nodes, so the same
/// manifest is used afterwards to audit what came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeManifest {
    entries: Vec<ManifestEntry>,
}

impl NodeManifest {
    /// Builds a manifest over all nodes of `graph`.
    pub fn of(graph: &WorkflowGraph) -> Self {
        Self::of_nodes(graph.nodes.iter())
    }

    /// Builds a manifest over a subset of nodes.
    pub fn of_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Self {
        let entries = nodes
            .into_iter()
            .map(|node| ManifestEntry {
                node_id: node.id.clone(),
                node_name: node.display_name().to_owned(),
            })
            .collect();
        Self { entries }
    }

    /// Returns the manifest entries.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the display name recorded for `id`.
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.node_id.as_str() == id)
            .map(|entry| entry.node_name.as_str())
    }

    /// Renders the manifest as the bullet list quoted in prompts.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "- nodeId: {} | nodeName: {}",
                    json_string(entry.node_id.as_str()),
                    json_string(&entry.node_name)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Checks a model's `perNodeResults` against this manifest.
    pub fn audit(&self, results: &[Value]) -> ManifestAudit {
        let known: HashSet<&str> = self
            .entries
            .iter()
            .map(|entry| entry.node_id.as_str())
            .collect();

        let mut unmatched = BTreeSet::new();
        let mut missing_id = 0;
        for result in results {
            match result.get("nodeId").and_then(Value::as_str) {
                Some(id) if known.contains(id) => {}
                Some(id) => {
                    unmatched.insert(id.to_owned());
                }
                None => missing_id += 1,
            }
        }

        ManifestAudit {
            unmatched_node_ids: unmatched.into_iter().collect(),
            results_without_node_id: missing_id,
            exceeds_node_count: results.len() > self.entries.len(),
        }
    }
}

/// Outcome of checking model results against the node manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestAudit {
    /// Ids the model returned that are not in the submitted graph.
    pub unmatched_node_ids: Vec<String>,
    /// Entries with no string `nodeId` at all.
    pub results_without_node_id: usize,
    /// `true` if there are more results than nodes.
    pub exceeds_node_count: bool,
}

impl ManifestAudit {
    /// Returns `true` if every result maps to a submitted node.
    pub fn is_clean(&self) -> bool {
        self.unmatched_node_ids.is_empty()
            && self.results_without_node_id == 0
            && !self.exceeds_node_count
    }
}

/// `text` as a quoted, escaped JSON string literal.
pub(crate) fn json_string(text: &str) -> String {
    Value::from(text).to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn node(value: Value) -> Node {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn deserialises_editor_nodes_and_ignores_layout_fields() {
        let graph: WorkflowGraph = serde_json::from_value(json!({
            "nodes": [
                {"id": "a", "type": "persona", "position": {"x": 1, "y": 2},
                 "data": {"label": "Skeptical Viewer"}},
                {"id": "b", "type": "output", "data": {}}
            ],
            "edges": [{"id": "e1", "source": "a", "target": "b"}]
        }))
        .unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].display_name(), "Skeptical Viewer");
        assert_eq!(graph.nodes[1].display_name(), "b");
        assert_eq!(graph.edges[0].target.as_str(), "b");
    }

    #[test]
    fn type_tags_are_normalised() {
        assert_eq!(
            NodeKind::from_type_tag("article-input"),
            Some(NodeKind::ArticleInput)
        );
        assert_eq!(
            NodeKind::from_type_tag("Patient_Upload"),
            Some(NodeKind::PatientUpload)
        );
        assert_eq!(NodeKind::from_type_tag("custom"), None);
    }

    #[test]
    fn capability_overrides_type_and_label() {
        let n = node(json!({
            "id": "x", "type": "output",
            "data": {"label": "Report", "capability": "reference-data"}
        }));
        assert_eq!(n.kind(), NodeKind::ReferenceDataset);
    }

    #[test]
    fn label_is_consulted_only_for_unknown_tags() {
        let generic = node(json!({"id": "x", "type": "custom", "data": {"label": "Patient Scan Upload"}}));
        assert_eq!(generic.kind(), NodeKind::PatientUpload);

        let typed = node(json!({"id": "y", "type": "output", "data": {"label": "Patient Report"}}));
        assert_eq!(typed.kind(), NodeKind::Output);
    }

    #[test]
    fn manifest_renders_every_id_and_name() {
        let graph = WorkflowGraph {
            nodes: vec![
                node(json!({"id": "n1", "type": "persona", "data": {"label": "Gen Z Viewer"}})),
                node(json!({"id": "n2", "type": "output"})),
            ],
            edges: vec![],
        };
        let rendered = NodeManifest::of(&graph).render();
        assert!(rendered.contains("nodeId: \"n1\" | nodeName: \"Gen Z Viewer\""));
        assert!(rendered.contains("nodeId: \"n2\" | nodeName: \"n2\""));
    }

    #[test]
    fn manifest_escapes_quotes_in_names() {
        let graph = WorkflowGraph {
            nodes: vec![node(
                json!({"id": "n1", "type": "persona", "data": {"label": "The \"Skeptic\""}}),
            )],
            edges: vec![],
        };
        let rendered = NodeManifest::of(&graph).render();
        assert_eq!(rendered, r#"- nodeId: "n1" | nodeName: "The \"Skeptic\"""#);
    }

    #[test]
    fn audit_flags_unknown_ids_and_overflow() {
        let graph = WorkflowGraph {
            nodes: vec![node(json!({"id": "n1", "type": "persona"}))],
            edges: vec![],
        };
        let manifest = NodeManifest::of(&graph);

        let clean = manifest.audit(&[json!({"nodeId": "n1"})]);
        assert!(clean.is_clean());

        let dirty = manifest.audit(&[
            json!({"nodeId": "n1"}),
            json!({"nodeId": "ghost"}),
            json!({"nodeName": "no id"}),
        ]);
        assert_eq!(dirty.unmatched_node_ids, vec!["ghost".to_owned()]);
        assert_eq!(dirty.results_without_node_id, 1);
        assert!(dirty.exceeds_node_count);
        assert!(!dirty.is_clean());
    }
}
