//! Article screening for bias, false claims and manipulation.

use std::fmt::Write as _;

use super::{ArchetypePrompt, ComposeInput};
use crate::graph::NodeKind;
use crate::types::GenerationParameters;

const FIELDS: &[(&str, &str)] = &[
    ("finding", "string, the node's conclusion in one or two sentences"),
    ("score", "integer 0-100, strength of the detected issue (0 = none detected)"),
    ("confidence", "one of \"low\", \"medium\", \"high\""),
    ("evidence", "array of strings, verbatim quotes from the article supporting the finding"),
    ("techniques", "array of strings, named techniques or bias types observed; empty if none"),
];

pub(super) fn prompt(input: &ComposeInput<'_>) -> ArchetypePrompt {
    let graph = input.graph;

    let mut task = String::from(
        "You are a senior media analyst. You examine a single news article the way a \
         standards editor would: claim by claim, with quotations, separating what the \
         text demonstrably does from what a reader might suspect.\n\n",
    );

    task.push_str("## Article\n");
    for article in graph.nodes_of(NodeKind::ArticleInput) {
        let _ = write!(task, "- {}", article.display_name());
        if let Some(url) = article.url() {
            let _ = write!(task, " ({url})");
        }
        task.push('\n');
    }
    if input.content.is_none() {
        task.push_str(
            "The article text could not be retrieved. Analyse what the title and URL allow, \
             mark every finding as low confidence, and say so in the summary.\n",
        );
    }

    task.push_str("\n## Analysis steps\nRun each analysis or preprocessing node as its own step:\n");
    for node in graph
        .nodes
        .iter()
        .filter(|node| matches!(node.kind(), NodeKind::Analysis | NodeKind::Preprocessing))
    {
        let _ = write!(task, "- {}", node.display_name());
        if let Some(description) = node.description() {
            let _ = write!(task, ": {description}");
        }
        task.push('\n');
    }

    task.push_str(
        "\n## Standards\n\
         - Bias: loaded wording, one-sided sourcing, omission of relevant context, \
           headline/body mismatch.\n\
         - Factual accuracy: list checkable claims, state whether each is supported, \
           contradicted or unverifiable from the text and general knowledge, and never \
           fabricate sources.\n\
         - Manipulation: emotional appeals, false dilemmas, appeal to fear, \
           cherry-picked statistics, misleading visual or numeric framing.\n\
         - Quote the article for every finding. A finding without a quote is not a finding.\n\
         - Report absence of problems as plainly as presence.",
    );

    ArchetypePrompt {
        task,
        coverage: "Include one entry for every analysis and preprocessing node; input and \
                   output nodes may be omitted.",
        fields: FIELDS,
        summary_guidance: "Give an overall credibility assessment, the most significant \
                           issues with quotes, and what a careful reader should verify \
                           independently.",
        parameters: GenerationParameters::analytical(8_192),
    }
}
