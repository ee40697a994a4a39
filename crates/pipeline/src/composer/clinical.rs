//! Clinical archetypes: patient-vs-reference deviation and traumatic brain injury.

use std::fmt::Write as _;

use super::{ArchetypePrompt, ComposeInput};
use crate::graph::{Node, NodeKind};
use crate::types::{GenerationParameters, Temperature};

const DEVIATION_FIELDS: &[(&str, &str)] = &[
    ("metrics", "array of objects {\"name\", \"patientValue\", \"referenceRange\", \"zScore\"}; use null where a value is unknown"),
    ("deviationScore", "number, the largest absolute z-score this node is responsible for"),
    ("flagged", "boolean, true if any metric lies outside the reference range"),
    ("interpretation", "string, plain-language meaning of the deviations"),
    ("confidence", "one of \"low\", \"medium\", \"high\""),
];

const TBI_FIELDS: &[(&str, &str)] = &[
    ("findings", "array of strings, observations relevant to brain injury"),
    ("severityIndicators", "array of strings, e.g. GCS range, loss of consciousness, post-traumatic amnesia"),
    ("severity", "one of \"none\", \"mild\", \"moderate\", \"severe\", \"indeterminate\""),
    ("recommendation", "string, next assessment or referral this node would suggest"),
    ("confidence", "one of \"low\", \"medium\", \"high\""),
];

const CLINICAL_GUARDRAILS: &str = "\n## Guardrails\n\
     - This is decision support for a qualified clinician, not a diagnosis. Say so once \
       in the summary.\n\
     - Use only values present in the workflow. Where data is missing, say what is missing \
       instead of estimating it.\n\
     - Prefer standard instruments and units; name them when you use them.\n\
     - Keep uncertainty explicit: every interpretation carries a confidence level.";

pub(super) fn deviation_prompt(input: &ComposeInput<'_>) -> ArchetypePrompt {
    let graph = input.graph;

    let mut task = String::from(
        "You are a clinical data analyst. You compare one patient's measurements against \
         a normative reference dataset and report, metric by metric, where the patient \
         deviates and how far.\n\n",
    );

    task.push_str("## Data\n");
    list(&mut task, "Patient data", graph.nodes_of(NodeKind::PatientUpload));
    list(&mut task, "Reference data", graph.nodes_of(NodeKind::ReferenceDataset));
    list(&mut task, "Comparison steps", graph.nodes_of(NodeKind::Comparison));

    task.push_str(
        "\n## Method\n\
         1. Align patient metrics with reference metrics by name and unit; note any that \
            cannot be aligned.\n\
         2. For each aligned metric compute or estimate the z-score against the reference \
            mean and standard deviation (or percentile where only ranges are given).\n\
         3. Treat |z| >= 2 as a deviation worth flagging and |z| >= 3 as marked.\n\
         4. Group deviations into patterns rather than listing them in isolation.",
    );
    task.push_str(CLINICAL_GUARDRAILS);

    ArchetypePrompt {
        task,
        coverage: "Include one entry for every patient, reference and comparison node, and \
                   for any analysis node that contributes metrics.",
        fields: DEVIATION_FIELDS,
        summary_guidance: "Summarise the deviation profile, the most significant \
                           deviations with values, likely patterns, and data gaps.",
        parameters: GenerationParameters::analytical(8_192).with_temperature(Temperature::CLINICAL),
    }
}

pub(super) fn tbi_prompt(input: &ComposeInput<'_>) -> ArchetypePrompt {
    let graph = input.graph;

    let mut task = String::from(
        "You are a neurotrauma assessment assistant. You review the information in this \
         workflow for signs of traumatic brain injury and structure it the way a \
         neurology consult note would.\n\n",
    );

    task.push_str("## Data\n");
    list(
        &mut task,
        "Inputs",
        graph.nodes.iter().filter(|node| node.kind().is_input()),
    );
    list(
        &mut task,
        "Assessment steps",
        graph
            .nodes
            .iter()
            .filter(|node| !node.kind().is_input() && node.kind() != NodeKind::Output),
    );

    task.push_str(
        "\n## Method\n\
         1. Extract mechanism of injury, time since injury, and acute signs where present.\n\
         2. Map findings to recognised severity criteria (Glasgow Coma Scale, duration of \
            loss of consciousness, post-traumatic amnesia, imaging findings).\n\
         3. Screen for red flags that warrant urgent imaging or referral.\n\
         4. Note post-concussive symptoms and functional impact separately from acute severity.",
    );
    task.push_str(CLINICAL_GUARDRAILS);

    ArchetypePrompt {
        task,
        coverage: "Include one entry for every input and assessment node; output nodes may \
                   be omitted.",
        fields: TBI_FIELDS,
        summary_guidance: "State the overall severity estimate, the red flags found or \
                           ruled out, and recommended next steps.",
        parameters: GenerationParameters::analytical(8_192),
    }
}

fn list<'a>(out: &mut String, heading: &str, nodes: impl Iterator<Item = &'a Node>) {
    let mut nodes = nodes.peekable();
    if nodes.peek().is_none() {
        let _ = writeln!(out, "{heading}: none supplied");
        return;
    }
    let _ = writeln!(out, "{heading}:");
    for node in nodes {
        let _ = write!(out, "- {}", node.display_name());
        if let Some(description) = node.description() {
            let _ = write!(out, ": {description}");
        }
        out.push('\n');
    }
}
