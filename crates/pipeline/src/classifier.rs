//! Graph classification: picks the task archetype that drives prompt composition.
//!
//! Classification is a pure function of node kinds, capabilities, labels and
//! the workflow name. Predicates can overlap, so they are evaluated in a fixed
//! precedence order and the first match wins; there is no scoring.

use serde::{Deserialize, Serialize};

use crate::graph::{Node, NodeCapability, NodeKind, WorkflowGraph};
use crate::media::MediaReference;

/// Persona count at which a content graph becomes an audience simulation.
pub const CONTENT_IMPACT_MIN_PERSONAS: usize = 10;

/// Media-analysis nodes required for the media-bias archetype.
pub const MEDIA_BIAS_MIN_ANALYSERS: usize = 2;

/// Agent nodes (orchestrators plus personas) required for a simulation.
pub const SIMULATION_MIN_AGENTS: usize = 2;

const MEDIA_ANALYSIS_KEYWORDS: &[&str] = &[
    "bias",
    "fact",
    "manipulat",
    "propaganda",
    "framing",
    "misinformation",
    "disinformation",
    "credib",
    "claim",
    "sentiment",
];

const INJURY_KEYWORDS: &[&str] = &[
    "tbi",
    "traumatic brain",
    "brain injury",
    "concussion",
    "injury",
    "glasgow",
];

const TEST_TAKING_KEYWORDS: &[&str] = &["exam", "test", "student", "quiz"];

const AGENT_KEYWORDS: &[&str] = &["agent", "simulat", "parallel"];

// ---------------------------------------------------------------------------
// Archetypes
// ---------------------------------------------------------------------------

/// Flavour of the simulation archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SimulationMode {
    /// Personas sit an exam drawn from the data source.
    TestTaking,
    /// Independent agents work the data source in parallel.
    ParallelAgents,
}

/// The task category selected for a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "archetype", content = "mode")]
pub enum Archetype {
    /// Many personas react to a video or article.
    ContentImpact,
    /// An article is screened for bias, false claims and manipulation.
    MediaBias,
    /// A patient's data is compared against a reference dataset.
    Deviation,
    /// Traumatic-brain-injury assessment.
    TraumaticBrainInjury,
    /// A small group of agents or students works a shared data source.
    Simulation(SimulationMode),
    /// Descriptive research / discovery fallback.
    Generic,
}

impl Archetype {
    /// Short stable name used in logs and response metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentImpact => "content-impact",
            Self::MediaBias => "media-bias",
            Self::Deviation => "deviation",
            Self::TraumaticBrainInjury => "tbi",
            Self::Simulation(SimulationMode::TestTaking) => "simulation-test-taking",
            Self::Simulation(SimulationMode::ParallelAgents) => "simulation-parallel-agents",
            Self::Generic => "generic",
        }
    }

    /// Returns `true` for archetypes tuned for consistency over variety.
    pub fn is_analytical(self) -> bool {
        matches!(
            self,
            Self::MediaBias | Self::Deviation | Self::TraumaticBrainInjury
        )
    }
}

impl std::fmt::Display for Archetype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Counts and flags the precedence rules are evaluated over.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphProfile {
    /// Persona nodes.
    pub personas: usize,
    /// Orchestrator nodes.
    pub orchestrators: usize,
    /// Content (video/URL) input nodes.
    pub content_inputs: usize,
    /// Article input nodes.
    pub article_inputs: usize,
    /// Analysis or preprocessing nodes that look for bias, false claims or manipulation.
    pub media_analysers: usize,
    /// Generic data-source nodes.
    pub data_sources: usize,
    /// Patient upload nodes.
    pub patient_uploads: usize,
    /// Reference dataset nodes.
    pub reference_datasets: usize,
    /// Explicit comparison nodes.
    pub comparisons: usize,
    /// Some node URL is a recognised video.
    pub has_video_url: bool,
    /// Some node is about traumatic brain injury.
    pub mentions_injury: bool,
    /// Exam/test/student cue in the workflow name or labels.
    pub test_taking_cue: bool,
    /// Agent/simulation cue in the workflow name or labels.
    pub agent_cue: bool,
}

impl GraphProfile {
    /// Profiles `graph`, taking cues from `workflow_name` as well as node labels.
    pub fn of(graph: &WorkflowGraph, workflow_name: Option<&str>) -> Self {
        let mut profile = Self::default();
        let workflow_name = workflow_name.unwrap_or_default().to_lowercase();
        profile.test_taking_cue = contains_any(&workflow_name, TEST_TAKING_KEYWORDS);
        profile.agent_cue = contains_any(&workflow_name, AGENT_KEYWORDS);

        for node in &graph.nodes {
            let kind = node.kind();
            let capability = node.capability();
            let label = node.label().unwrap_or_default().to_lowercase();

            match kind {
                NodeKind::Persona => profile.personas += 1,
                NodeKind::Orchestrator => profile.orchestrators += 1,
                NodeKind::ContentInput => profile.content_inputs += 1,
                NodeKind::ArticleInput => profile.article_inputs += 1,
                NodeKind::DataSource => profile.data_sources += 1,
                NodeKind::PatientUpload => profile.patient_uploads += 1,
                NodeKind::ReferenceDataset => profile.reference_datasets += 1,
                NodeKind::Comparison => profile.comparisons += 1,
                NodeKind::Analysis
                | NodeKind::Preprocessing
                | NodeKind::Output
                | NodeKind::Other => {}
            }

            if is_media_analyser(kind, capability, &label) {
                profile.media_analysers += 1;
            }
            if node.url().and_then(MediaReference::parse).is_some() {
                profile.has_video_url = true;
            }
            if capability == Some(NodeCapability::InjuryAssessment)
                || contains_any(&label, INJURY_KEYWORDS)
            {
                profile.mentions_injury = true;
            }
            profile.test_taking_cue |= contains_any(&label, TEST_TAKING_KEYWORDS);
            profile.agent_cue |= contains_any(&label, AGENT_KEYWORDS);
        }

        profile
    }

    /// Persona and orchestrator nodes together.
    pub fn agents(&self) -> usize {
        self.personas + self.orchestrators
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn is_media_analyser(kind: NodeKind, capability: Option<NodeCapability>, label: &str) -> bool {
    match capability {
        Some(capability) => capability.is_media_analysis(),
        None => {
            matches!(kind, NodeKind::Analysis | NodeKind::Preprocessing)
                && contains_any(label, MEDIA_ANALYSIS_KEYWORDS)
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Selects the archetype for `graph`.
///
/// Precedence, first match wins:
///
/// 1. content impact: at least ten personas and a content or article input;
/// 2. media bias: an article, no video, and two or more media analysers;
/// 3. deviation: a patient upload with a reference dataset, or a comparison node;
/// 4. traumatic brain injury: injury keywords anywhere;
/// 5. simulation: two or more agents, a data source, and an exam or agent cue;
/// 6. generic.
pub fn classify(graph: &WorkflowGraph, workflow_name: Option<&str>) -> Archetype {
    classify_profile(&GraphProfile::of(graph, workflow_name))
}

/// Applies the precedence rules to a precomputed profile.
pub fn classify_profile(profile: &GraphProfile) -> Archetype {
    if profile.personas >= CONTENT_IMPACT_MIN_PERSONAS
        && profile.content_inputs + profile.article_inputs > 0
    {
        return Archetype::ContentImpact;
    }

    if profile.article_inputs > 0
        && !profile.has_video_url
        && profile.media_analysers >= MEDIA_BIAS_MIN_ANALYSERS
    {
        return Archetype::MediaBias;
    }

    if (profile.patient_uploads > 0 && profile.reference_datasets > 0) || profile.comparisons > 0 {
        return Archetype::Deviation;
    }

    if profile.mentions_injury {
        return Archetype::TraumaticBrainInjury;
    }

    let has_data = profile.data_sources > 0 || profile.content_inputs + profile.article_inputs > 0;
    if profile.agents() >= SIMULATION_MIN_AGENTS && has_data {
        if profile.test_taking_cue {
            return Archetype::Simulation(SimulationMode::TestTaking);
        }
        if profile.agent_cue || profile.orchestrators > 0 {
            return Archetype::Simulation(SimulationMode::ParallelAgents);
        }
    }

    Archetype::Generic
}

/// Buckets used by the generic prompt to describe a graph.
#[derive(Debug, Default)]
pub struct NodeBuckets<'a> {
    /// Content and upload inputs.
    pub inputs: Vec<&'a Node>,
    /// Datasets and references.
    pub data: Vec<&'a Node>,
    /// Personas, analysis, preprocessing, comparison and orchestration steps.
    pub analysis: Vec<&'a Node>,
    /// Reports and exports.
    pub outputs: Vec<&'a Node>,
}

impl<'a> NodeBuckets<'a> {
    /// Sorts every node of `graph` into one bucket.
    pub fn of(graph: &'a WorkflowGraph) -> Self {
        let mut buckets = Self::default();
        for node in &graph.nodes {
            match node.kind() {
                NodeKind::ContentInput | NodeKind::ArticleInput | NodeKind::PatientUpload => {
                    buckets.inputs.push(node)
                }
                NodeKind::DataSource | NodeKind::ReferenceDataset => buckets.data.push(node),
                NodeKind::Output => buckets.outputs.push(node),
                NodeKind::Persona
                | NodeKind::Analysis
                | NodeKind::Preprocessing
                | NodeKind::Comparison
                | NodeKind::Orchestrator
                | NodeKind::Other => buckets.analysis.push(node),
            }
        }
        buckets
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn graph(nodes: Vec<Value>) -> WorkflowGraph {
        serde_json::from_value(json!({ "nodes": nodes, "edges": [] })).unwrap()
    }

    fn personas(count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| json!({"id": format!("p{i}"), "type": "persona", "data": {"label": format!("Viewer {i}")}}))
            .collect()
    }

    #[test]
    fn many_personas_with_video_is_content_impact() {
        let mut nodes = personas(12);
        nodes.push(json!({"id": "v", "type": "contentInput", "data": {"url": "https://youtu.be/dQw4w9WgXcQ"}}));
        assert_eq!(classify(&graph(nodes), None), Archetype::ContentImpact);
    }

    #[test]
    fn nine_personas_is_not_content_impact() {
        let mut nodes = personas(9);
        nodes.push(json!({"id": "v", "type": "contentInput"}));
        assert_ne!(classify(&graph(nodes), None), Archetype::ContentImpact);
    }

    #[test]
    fn article_with_bias_detectors_is_media_bias() {
        let g = graph(vec![
            json!({"id": "a", "type": "articleInput", "data": {"url": "https://news.example/story"}}),
            json!({"id": "b", "type": "analysis", "data": {"label": "Bias Detector"}}),
            json!({"id": "c", "type": "preprocessing", "data": {"label": "Claim Extraction for Fact Check"}}),
            json!({"id": "d", "type": "output"}),
        ]);
        assert_eq!(classify(&g, None), Archetype::MediaBias);
    }

    #[test]
    fn video_url_blocks_media_bias() {
        let g = graph(vec![
            json!({"id": "a", "type": "articleInput"}),
            json!({"id": "v", "type": "contentInput", "data": {"url": "https://youtu.be/dQw4w9WgXcQ"}}),
            json!({"id": "b", "type": "analysis", "data": {"capability": "bias-detection"}}),
            json!({"id": "c", "type": "analysis", "data": {"capability": "fact-check"}}),
        ]);
        assert_ne!(classify(&g, None), Archetype::MediaBias);
    }

    #[test]
    fn patient_and_reference_is_deviation_even_with_injury_labels() {
        let g = graph(vec![
            json!({"id": "p", "type": "patientUpload", "data": {"label": "TBI patient scan"}}),
            json!({"id": "r", "type": "referenceDataset", "data": {"label": "Healthy controls"}}),
        ]);
        assert_eq!(classify(&g, None), Archetype::Deviation);
    }

    #[test]
    fn injury_keywords_without_reference_is_tbi() {
        let g = graph(vec![
            json!({"id": "p", "type": "patientUpload", "data": {"label": "Scan"}}),
            json!({"id": "a", "type": "analysis", "data": {"label": "Concussion screening"}}),
        ]);
        assert_eq!(classify(&g, None), Archetype::TraumaticBrainInjury);
    }

    #[test]
    fn exam_cue_selects_test_taking_simulation() {
        let mut nodes = personas(3);
        nodes.push(json!({"id": "d", "type": "dataSource", "data": {"label": "Question bank"}}));
        let g = graph(nodes);
        assert_eq!(
            classify(&g, Some("Final Exam Dry Run")),
            Archetype::Simulation(SimulationMode::TestTaking)
        );
        assert_eq!(classify(&g, Some("Customer interviews")), Archetype::Generic);
    }

    #[test]
    fn orchestrator_selects_parallel_agents() {
        let g = graph(vec![
            json!({"id": "o", "type": "orchestrator"}),
            json!({"id": "a", "type": "persona"}),
            json!({"id": "d", "type": "dataset"}),
        ]);
        assert_eq!(
            classify(&g, None),
            Archetype::Simulation(SimulationMode::ParallelAgents)
        );
    }

    #[test]
    fn classification_ignores_node_order() {
        let mut nodes = personas(10);
        nodes.push(json!({"id": "a", "type": "articleInput"}));
        let forward = graph(nodes.clone());
        nodes.reverse();
        let backward = graph(nodes);
        assert_eq!(classify(&forward, None), classify(&backward, None));
    }

    #[test]
    fn empty_graph_is_generic() {
        assert_eq!(classify(&WorkflowGraph::default(), None), Archetype::Generic);
    }

    #[test]
    fn buckets_cover_every_node_once() {
        let g = graph(vec![
            json!({"id": "i", "type": "videoInput"}),
            json!({"id": "d", "type": "dataset"}),
            json!({"id": "a", "type": "analysis"}),
            json!({"id": "o", "type": "report"}),
            json!({"id": "x", "type": "custom"}),
        ]);
        let buckets = NodeBuckets::of(&g);
        assert_eq!(buckets.inputs.len(), 1);
        assert_eq!(buckets.data.len(), 1);
        assert_eq!(buckets.analysis.len(), 2);
        assert_eq!(buckets.outputs.len(), 1);
    }
}
