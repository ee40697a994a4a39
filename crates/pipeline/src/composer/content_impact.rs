//! Audience simulation over a video or article.

use std::fmt::Write as _;

use super::{ArchetypePrompt, ComposeInput};
use crate::graph::NodeKind;
use crate::media::MediaReference;
use crate::types::GenerationParameters;

const FIELDS: &[(&str, &str)] = &[
    ("reaction", "string, two to four sentences in the persona's own voice"),
    ("engagementScore", "integer 0-100, how absorbed the persona stays"),
    ("sentiment", "one of \"positive\", \"neutral\", \"negative\", \"mixed\""),
    ("watchThroughPercent", "integer 0-100, how far the persona gets before leaving"),
    ("likelyToShare", "boolean"),
    ("dropOffMoment", "string or null, the moment the persona loses interest"),
    ("keyTakeaway", "string, what the persona remembers a day later"),
];

pub(super) fn prompt(input: &ComposeInput<'_>, media: Option<&MediaReference>) -> ArchetypePrompt {
    let graph = input.graph;
    let personas: Vec<_> = graph.nodes_of(NodeKind::Persona).collect();
    let sources: Vec<_> = graph
        .nodes
        .iter()
        .filter(|node| matches!(node.kind(), NodeKind::ContentInput | NodeKind::ArticleInput))
        .collect();

    let mut task = String::from(
        "You are an audience research simulator. You role-play a panel of distinct \
         people encountering the same piece of content for the first time, and you \
         report how each of them actually reacts, not how an idealised viewer would.\n\n",
    );

    task.push_str("## Content under test\n");
    for source in &sources {
        let _ = write!(task, "- {}", source.display_name());
        if let Some(url) = source.url() {
            let _ = write!(task, " ({url})");
        }
        task.push('\n');
    }
    if media.is_some() {
        task.push_str(
            "The video itself is attached to this request. Base every reaction on what is \
             actually shown and said, including pacing, visuals, audio and the opening \
             seconds.\n",
        );
    } else {
        task.push_str(
            "No media is attached. Work from the title, URL and any source text below; \
             say so in the summary where that limits the simulation.\n",
        );
    }

    let _ = write!(
        task,
        "\n## Panel\nThe panel has {} personas. Each persona node's label and description \
         define who they are: age, interests, attention span, values, platform habits. \
         Stay inside each persona's perspective; two personas with different backgrounds \
         must not give interchangeable answers.\n",
        personas.len()
    );

    task.push_str(
        "\n## Method\n\
         1. Identify the hook, the core message and the call to action of the content.\n\
         2. For each persona, walk through the content in order and note where attention \
            rises or falls.\n\
         3. Score engagement honestly: most real audiences contain people who leave early \
            or dislike the content.\n\
         4. Aggregate: where the panel agrees, where it splits, and which segments the \
            content serves best and worst.",
    );

    ArchetypePrompt {
        task,
        coverage: "Include exactly one entry for every persona node in the manifest; \
                   content and output nodes need no entry.",
        fields: FIELDS,
        summary_guidance: "Cover overall reception, average engagement, the strongest and \
                           weakest moments, segment differences, and three concrete \
                           recommendations to improve the content.",
        parameters: GenerationParameters::creative(16_384),
    }
}
