//! Prompt composition: turns a classified graph into the instruction text and
//! generation parameters sent to the model.
//!
//! Every archetype prompt shares the same skeleton:
//!
//! 1. a role and task statement specific to the archetype;
//! 2. the graph itself (nodes, edges, any fetched content);
//! 3. the node manifest, the literal ids the model must echo back;
//! 4. the output contract, a single JSON object with `summary` and
//!    `perNodeResults`.
//!
//! The archetype submodules only supply the task text and the per-node fields;
//! sections 2–4 are rendered here so they cannot drift apart.

mod clinical;
mod content_impact;
mod generic;
mod media_bias;
mod simulation;

use std::fmt::Write as _;

use crate::classifier::Archetype;
use crate::graph::{json_string, NodeManifest, WorkflowGraph};
use crate::media::{truncate_content, ExternalContent, MediaReference, DEFAULT_CONTENT_BUDGET};
use crate::types::GenerationParameters;
use crate::NodeId;

/// Everything the composer reads besides the archetype.
#[derive(Debug, Clone, Copy)]
pub struct ComposeInput<'a> {
    /// The submitted graph.
    pub graph: &'a WorkflowGraph,
    /// Name of the saved workflow, if the editor sent one.
    pub workflow_name: Option<&'a str>,
    /// Text fetched from the graph's article or content URL.
    pub content: Option<&'a ExternalContent>,
    /// Character budget for `content`.
    pub content_budget: usize,
}

impl<'a> ComposeInput<'a> {
    /// Input with no fetched content and the default budget.
    pub fn new(graph: &'a WorkflowGraph) -> Self {
        Self {
            graph,
            workflow_name: None,
            content: None,
            content_budget: DEFAULT_CONTENT_BUDGET,
        }
    }

    /// Sets the workflow name.
    #[must_use]
    pub fn with_workflow_name(self, workflow_name: Option<&'a str>) -> Self {
        Self {
            workflow_name,
            ..self
        }
    }

    /// Attaches fetched content.
    #[must_use]
    pub fn with_content(self, content: Option<&'a ExternalContent>, budget: usize) -> Self {
        Self {
            content,
            content_budget: budget,
            ..self
        }
    }
}

/// A fully composed model request.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSpec {
    /// Archetype the prompt was built for.
    pub archetype: Archetype,
    /// Complete instruction text.
    pub instructions: String,
    /// Sampling settings tuned for the archetype.
    pub parameters: GenerationParameters,
    /// Video to attach for a multimodal call.
    pub media: Option<MediaReference>,
    /// Node ids and names embedded in `instructions`.
    pub manifest: NodeManifest,
}

/// What an archetype module contributes to the shared skeleton.
struct ArchetypePrompt {
    /// Role, task and method text.
    task: String,
    /// Which nodes need an entry in `perNodeResults`.
    coverage: &'static str,
    /// Archetype-specific fields of each `perNodeResults` entry, as
    /// `(name, description)` pairs.
    fields: &'static [(&'static str, &'static str)],
    /// What the `summary` markdown should cover.
    summary_guidance: &'static str,
    /// Sampling settings.
    parameters: GenerationParameters,
}

/// Builds the prompt for `archetype`.
pub fn compose(archetype: Archetype, input: &ComposeInput<'_>) -> PromptSpec {
    let manifest = NodeManifest::of(input.graph);
    let media = input
        .graph
        .nodes
        .iter()
        .filter_map(|node| node.url())
        .find_map(MediaReference::parse);

    let ArchetypePrompt {
        task,
        coverage,
        fields,
        summary_guidance,
        parameters,
    } = match archetype {
        Archetype::ContentImpact => content_impact::prompt(input, media.as_ref()),
        Archetype::MediaBias => media_bias::prompt(input),
        Archetype::Deviation => clinical::deviation_prompt(input),
        Archetype::TraumaticBrainInjury => clinical::tbi_prompt(input),
        Archetype::Simulation(mode) => simulation::prompt(input, mode),
        Archetype::Generic => generic::prompt(input),
    };

    let mut text = task;
    text.push_str("\n\n");
    text.push_str(&render_graph(input));
    if let Some(content) = input.content {
        text.push_str("\n\n");
        text.push_str(&render_content(content, input.content_budget));
    }
    text.push_str("\n\n## Node manifest\n");
    text.push_str(
        "These are the only valid node ids. Copy them exactly, character for character.\n",
    );
    text.push_str(&manifest.render());
    text.push_str("\n\n");
    text.push_str(&render_contract(&manifest, coverage, fields, summary_guidance));

    tracing::debug!(
        target: crate::TRACING_TARGET_COMPOSER,
        archetype = %archetype,
        chars = text.len(),
        manifest_entries = manifest.len(),
        multimodal = media.is_some(),
        "prompt composed"
    );

    PromptSpec {
        archetype,
        instructions: text,
        parameters,
        media,
        manifest,
    }
}

// ---------------------------------------------------------------------------
// Shared sections
// ---------------------------------------------------------------------------

fn render_graph(input: &ComposeInput<'_>) -> String {
    let graph = input.graph;
    let mut out = String::from("## Workflow\n");
    if let Some(name) = input.workflow_name.filter(|name| !name.trim().is_empty()) {
        let _ = writeln!(out, "Name: {}", name.trim());
    }
    let _ = writeln!(out, "Nodes ({}):", graph.nodes.len());
    for node in &graph.nodes {
        let _ = write!(
            out,
            "- [{}] {} (type: {})",
            node.id,
            node.display_name(),
            if node.node_type.is_empty() { "unspecified" } else { node.node_type.as_str() }
        );
        if let Some(description) = node.description() {
            let _ = write!(out, ": {description}");
        }
        if let Some(url) = node.url() {
            let _ = write!(out, " <{url}>");
        }
        out.push('\n');
    }

    if !graph.edges.is_empty() {
        let _ = writeln!(out, "Connections ({}):", graph.edges.len());
        for edge in &graph.edges {
            let name = |id: &NodeId| {
                graph
                    .node(id)
                    .map_or_else(|| id.to_string(), |node| node.display_name().to_owned())
            };
            let _ = writeln!(out, "- {} -> {}", name(&edge.source), name(&edge.target));
        }
    }
    out.trim_end().to_owned()
}

fn render_content(content: &ExternalContent, budget: usize) -> String {
    let mut out = String::from("## Source content\n");
    let _ = writeln!(out, "URL: {}", content.url);
    if let Some(title) = &content.title {
        let _ = writeln!(out, "Title: {title}");
    }
    out.push_str("Text:\n\"\"\"\n");
    out.push_str(&truncate_content(&content.text, budget));
    out.push_str("\n\"\"\"");
    out
}

fn render_contract(
    manifest: &NodeManifest,
    coverage: &str,
    fields: &[(&str, &str)],
    summary_guidance: &str,
) -> String {
    let mut out = String::from("## Output contract\n");
    out.push_str(
        "Respond with a single JSON object and nothing else. The object must have exactly \
         two top-level keys:\n",
    );
    let _ = writeln!(out, "- \"summary\": a markdown string. {summary_guidance}");
    let _ = writeln!(out, "- \"perNodeResults\": an array of objects. {coverage}");
    out.push_str("Every perNodeResults object must contain:\n");
    out.push_str("  - \"nodeId\": string, copied verbatim from the node manifest\n");
    out.push_str("  - \"nodeName\": string, copied verbatim from the node manifest\n");
    for (name, description) in fields {
        let _ = writeln!(out, "  - \"{name}\": {description}");
    }

    let example_id = manifest
        .entries()
        .first()
        .map_or(("node-id", "Node name"), |entry| {
            (entry.node_id.as_str(), entry.node_name.as_str())
        });
    out.push_str("\nShape (values illustrative):\n```json\n");
    let _ = writeln!(
        out,
        "{{\"summary\": \"## Overview\\n...\", \"perNodeResults\": [{{\"nodeId\": {}, \"nodeName\": {}, ...}}]}}",
        json_string(example_id.0),
        json_string(example_id.1)
    );
    out.push_str("```\n");
    out.push_str(
        "Do not invent node ids, do not rename nodes, and do not add keys outside this \
         contract. Return only the JSON object.",
    );
    out
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::classifier::{classify, SimulationMode};
    use crate::types::Temperature;

    fn graph(nodes: Vec<Value>, edges: Vec<Value>) -> WorkflowGraph {
        serde_json::from_value(json!({ "nodes": nodes, "edges": edges })).unwrap()
    }

    fn content_impact_graph() -> WorkflowGraph {
        let mut nodes: Vec<Value> = (0..12)
            .map(|i| json!({"id": format!("persona-{i}"), "type": "persona", "data": {"label": format!("Persona {i}")}}))
            .collect();
        nodes.push(json!({"id": "video-1", "type": "contentInput",
                          "data": {"label": "Launch video", "url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ"}}));
        graph(nodes, vec![json!({"source": "video-1", "target": "persona-0"})])
    }

    #[test]
    fn content_impact_prompt_lists_every_node_id() {
        let g = content_impact_graph();
        let archetype = classify(&g, None);
        assert_eq!(archetype, Archetype::ContentImpact);

        let spec = compose(archetype, &ComposeInput::new(&g));
        for node in &g.nodes {
            assert!(
                spec.instructions.contains(&format!("nodeId: \"{}\"", node.id)),
                "missing {}",
                node.id
            );
        }
        assert_eq!(spec.manifest.len(), 13);
        assert_eq!(spec.parameters.temperature, Temperature::CREATIVE);
        assert_eq!(spec.media.as_ref().map(MediaReference::video_id), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn every_archetype_ends_with_the_output_contract() {
        let g = content_impact_graph();
        for archetype in [
            Archetype::ContentImpact,
            Archetype::MediaBias,
            Archetype::Deviation,
            Archetype::TraumaticBrainInjury,
            Archetype::Simulation(SimulationMode::TestTaking),
            Archetype::Simulation(SimulationMode::ParallelAgents),
            Archetype::Generic,
        ] {
            let spec = compose(archetype, &ComposeInput::new(&g));
            let contract = spec
                .instructions
                .rfind("## Output contract")
                .unwrap_or_else(|| panic!("{archetype}: no contract"));
            let tail = &spec.instructions[contract..];
            assert!(tail.contains("\"summary\""), "{archetype}");
            assert!(tail.contains("\"perNodeResults\""), "{archetype}");
            assert!(tail.contains("\"nodeId\""), "{archetype}");
            assert!(spec.instructions.trim_end().ends_with("Return only the JSON object."));
        }
    }

    #[test]
    fn analytical_archetypes_run_cold() {
        let g = content_impact_graph();
        for archetype in [
            Archetype::MediaBias,
            Archetype::Deviation,
            Archetype::TraumaticBrainInjury,
        ] {
            let t = compose(archetype, &ComposeInput::new(&g)).parameters.temperature;
            assert!(t.as_f32() <= 0.3, "{archetype}: {t}");
        }
        let t = compose(
            Archetype::Simulation(SimulationMode::ParallelAgents),
            &ComposeInput::new(&g),
        )
        .parameters
        .temperature;
        assert_eq!(t, Temperature::CREATIVE);
    }

    #[test]
    fn fetched_content_is_truncated_with_ellipsis() {
        let g = graph(
            vec![json!({"id": "a", "type": "articleInput", "data": {"url": "https://news.example/a"}})],
            vec![],
        );
        let content = ExternalContent {
            url: "https://news.example/a".into(),
            title: Some("Headline".into()),
            text: "word ".repeat(100),
        };
        let spec = compose(
            Archetype::MediaBias,
            &ComposeInput::new(&g).with_content(Some(&content), 20),
        );
        assert!(spec.instructions.contains("Title: Headline"));
        assert!(spec.instructions.contains("word word word word …"));
        assert!(!spec.instructions.contains(&"word ".repeat(5)));
    }

    #[test]
    fn composition_is_deterministic() {
        let g = content_impact_graph();
        let first = compose(Archetype::ContentImpact, &ComposeInput::new(&g));
        let second = compose(Archetype::ContentImpact, &ComposeInput::new(&g));
        assert_eq!(first, second);
    }

    #[test]
    fn edges_are_described_by_name() {
        let g = content_impact_graph();
        let spec = compose(Archetype::Generic, &ComposeInput::new(&g));
        assert!(spec.instructions.contains("- Launch video -> Persona 0"));
    }
}
