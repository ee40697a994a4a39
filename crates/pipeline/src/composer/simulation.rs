//! Multi-agent simulations: personas sitting a test, or agents working a data source in parallel.

use std::fmt::Write as _;

use super::{ArchetypePrompt, ComposeInput};
use crate::classifier::SimulationMode;
use crate::graph::NodeKind;
use crate::types::GenerationParameters;

const TEST_TAKING_FIELDS: &[(&str, &str)] = &[
    ("answers", "array of objects {\"question\", \"answer\", \"correct\"}; correct is boolean or null if unknown"),
    ("score", "integer 0-100, the agent's overall mark"),
    ("reasoning", "string, how this agent approached the test, in their own voice"),
    ("mistakes", "array of strings, misconceptions the agent showed"),
];

const PARALLEL_FIELDS: &[(&str, &str)] = &[
    ("output", "string, what this agent produced from the data"),
    ("approach", "string, how the agent worked, in their own voice"),
    ("agreesWithMajority", "boolean"),
    ("notableInsight", "string or null, something only this agent noticed"),
];

pub(super) fn prompt(input: &ComposeInput<'_>, mode: SimulationMode) -> ArchetypePrompt {
    let graph = input.graph;
    let agents: Vec<_> = graph
        .nodes
        .iter()
        .filter(|node| matches!(node.kind(), NodeKind::Persona | NodeKind::Orchestrator))
        .collect();

    let mut task = match mode {
        SimulationMode::TestTaking => String::from(
            "You run a classroom simulation. Each agent below is a distinct student who sits \
             the same test built from the data source. Answer as each student would, with \
             their level of preparation, not as an expert.\n\n",
        ),
        SimulationMode::ParallelAgents => String::from(
            "You run a multi-agent simulation. Each agent below works the same data source \
             independently, without seeing the others' work, and then the results are \
             compared.\n\n",
        ),
    };

    let _ = writeln!(task, "## Agents ({})", agents.len());
    for agent in &agents {
        let _ = write!(task, "- {}", agent.display_name());
        if agent.kind() == NodeKind::Orchestrator {
            task.push_str(" (coordinator)");
        }
        if let Some(description) = agent.description() {
            let _ = write!(task, ": {description}");
        }
        task.push('\n');
    }

    task.push_str("\n## Shared material\n");
    for source in graph.nodes.iter().filter(|node| node.kind().is_input()) {
        let _ = write!(task, "- {}", source.display_name());
        if let Some(description) = source.description() {
            let _ = write!(task, ": {description}");
        }
        task.push('\n');
    }

    match mode {
        SimulationMode::TestTaking => task.push_str(
            "\n## Method\n\
             1. Derive five to ten test questions from the shared material.\n\
             2. Have every student answer every question. Weaker students make realistic \
                mistakes; nobody is uniformly perfect.\n\
             3. Mark each answer and give each student an overall score.",
        ),
        SimulationMode::ParallelAgents => task.push_str(
            "\n## Method\n\
             1. Give every agent the same material and let each one produce its own result.\n\
             2. Keep agents independent: differences in background must show in the output.\n\
             3. A coordinator, if present, reconciles the results after the agents finish.",
        ),
    }

    let (fields, summary_guidance) = match mode {
        SimulationMode::TestTaking => (
            TEST_TAKING_FIELDS,
            "Report the score distribution, the questions most students missed, common \
             misconceptions, and what that says about the material.",
        ),
        SimulationMode::ParallelAgents => (
            PARALLEL_FIELDS,
            "Compare the agents' results: points of consensus, disagreements and their \
             causes, and the strongest combined conclusion.",
        ),
    };

    ArchetypePrompt {
        task,
        coverage: "Include exactly one entry for every persona and orchestrator node.",
        fields,
        summary_guidance,
        parameters: GenerationParameters::creative(16_384),
    }
}
