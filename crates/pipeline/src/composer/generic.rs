//! Descriptive fallback for graphs no other archetype claims.

use std::fmt::Write as _;

use super::{ArchetypePrompt, ComposeInput};
use crate::classifier::NodeBuckets;
use crate::graph::Node;
use crate::types::{GenerationParameters, Temperature};

const FIELDS: &[(&str, &str)] = &[
    ("role", "string, what this node contributes to the workflow"),
    ("output", "string, the node's result as if it had run"),
    ("keyFindings", "array of strings"),
    ("confidence", "one of \"low\", \"medium\", \"high\""),
];

pub(super) fn prompt(input: &ComposeInput<'_>) -> ArchetypePrompt {
    let buckets = NodeBuckets::of(input.graph);

    let mut task = String::from(
        "You are a research analyst executing a user-designed workflow. Treat each node as \
         a step, follow the connections between them, and produce the result each step \
         would produce.\n\n## Structure\n",
    );
    section(&mut task, "Inputs", &buckets.inputs);
    section(&mut task, "Data", &buckets.data);
    section(&mut task, "Processing", &buckets.analysis);
    section(&mut task, "Outputs", &buckets.outputs);

    task.push_str(
        "\n## Method\n\
         1. Start from the inputs and data and follow the connections in order.\n\
         2. Where a node's purpose is unclear, infer it from its label and neighbours and \
            state the assumption.\n\
         3. Be specific; generic statements that would fit any workflow are not useful.",
    );

    ArchetypePrompt {
        task,
        coverage: "Include one entry for every node in the manifest.",
        fields: FIELDS,
        summary_guidance: "Describe what the workflow accomplishes end to end, the main \
                           findings, and any gaps in the design.",
        parameters: GenerationParameters::analytical(8_192).with_temperature(Temperature::BALANCED),
    }
}

fn section(out: &mut String, heading: &str, nodes: &[&Node]) {
    if nodes.is_empty() {
        return;
    }
    let names: Vec<&str> = nodes.iter().map(|node| node.display_name()).collect();
    let _ = writeln!(out, "{heading}: {}", names.join(", "));
}
