//! Recovery of the structured answer from free-form model output.
//!
//! Models are asked for a single JSON object but routinely wrap it in prose or
//! a markdown fence, or ignore the instruction entirely. [`parse_response`]
//! never fails: whatever comes back is turned into a summary string and a
//! (possibly empty) list of per-node results.

use serde::Serialize;
use serde_json::{Map, Value};

/// The normalised answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedResponse {
    /// Markdown summary, or the raw text when no JSON could be recovered.
    pub summary: String,
    /// Per-node result objects as the model produced them.
    pub per_node_results: Vec<Value>,
    /// How the payload was found.
    #[serde(skip)]
    pub source: PayloadSource,
}

/// Which extraction strategy produced a [`ParsedResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// A ```` ```json ```` fenced block.
    FencedBlock,
    /// The span between the first `{` and the last `}`.
    BraceSpan,
    /// No JSON object could be recovered.
    RawText,
}

/// Extracts `summary` and `perNodeResults` from model output.
///
/// Strategies, first success wins:
///
/// 1. the contents of the first ```` ```json ```` fenced block;
/// 2. the substring from the first `{` to the last `}`;
/// 3. the whole text as the summary with no per-node results.
///
/// A candidate only counts as a success if it parses as a JSON object.
pub fn parse_response(raw: &str) -> ParsedResponse {
    if let Some(object) = fenced_json_block(raw).and_then(parse_object) {
        return from_object(object, raw, PayloadSource::FencedBlock);
    }

    if let Some(object) = brace_span(raw).and_then(parse_object) {
        return from_object(object, raw, PayloadSource::BraceSpan);
    }

    tracing::debug!(
        target: crate::TRACING_TARGET_PARSER,
        length = raw.len(),
        "no JSON payload recovered; using raw text as summary"
    );

    ParsedResponse {
        summary: raw.to_owned(),
        per_node_results: Vec::new(),
        source: PayloadSource::RawText,
    }
}

fn fenced_json_block(raw: &str) -> Option<&str> {
    const FENCE: &str = "```json";
    let start = raw.find(FENCE)? + FENCE.len();
    let body = &raw[start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

fn brace_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        Ok(_) => None,
        Err(error) => {
            tracing::debug!(
                target: crate::TRACING_TARGET_PARSER,
                %error,
                "candidate JSON payload did not parse"
            );
            None
        }
    }
}

fn from_object(mut object: Map<String, Value>, raw: &str, source: PayloadSource) -> ParsedResponse {
    let summary = match object.remove("summary") {
        Some(Value::String(summary)) => summary,
        Some(Value::Null) | None => raw.to_owned(),
        Some(other) => other.to_string(),
    };

    let per_node_results = match object.remove("perNodeResults") {
        Some(Value::Array(results)) => results,
        _ => Vec::new(),
    };

    ParsedResponse {
        summary,
        per_node_results,
        source,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_fenced_block_wrapped_in_prose() {
        let raw = "Here is the analysis you asked for:\n```json\n{\"summary\":\"ok\",\"perNodeResults\":[{\"nodeId\":\"n1\"}]}\n```\nLet me know if you need more.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.summary, "ok");
        assert_eq!(parsed.per_node_results, vec![json!({"nodeId": "n1"})]);
        assert_eq!(parsed.source, PayloadSource::FencedBlock);
    }

    #[test]
    fn plain_prose_becomes_the_summary() {
        let raw = "The viewers mostly enjoyed the video.";
        let parsed = parse_response(raw);
        assert_eq!(parsed.summary, raw);
        assert!(parsed.per_node_results.is_empty());
        assert_eq!(parsed.source, PayloadSource::RawText);
    }

    #[test]
    fn falls_back_to_brace_span() {
        let raw = "Result: {\"summary\": \"# Findings\", \"perNodeResults\": []} -- end";
        let parsed = parse_response(raw);
        assert_eq!(parsed.summary, "# Findings");
        assert_eq!(parsed.source, PayloadSource::BraceSpan);
    }

    #[test]
    fn broken_fence_falls_through_to_brace_span() {
        let raw = "```json\n{not json}\n```\n{\"summary\": \"second try\"}";
        let parsed = parse_response(raw);
        // The brace span covers both objects and does not parse either.
        assert_eq!(parsed.source, PayloadSource::RawText);
        assert_eq!(parsed.summary, raw);
    }

    #[test]
    fn missing_summary_keeps_raw_text() {
        let raw = "{\"perNodeResults\": [{\"nodeId\": \"a\"}]}";
        let parsed = parse_response(raw);
        assert_eq!(parsed.summary, raw);
        assert_eq!(parsed.per_node_results.len(), 1);
    }

    #[test]
    fn non_array_results_default_to_empty() {
        let parsed = parse_response("{\"summary\": \"s\", \"perNodeResults\": {\"nodeId\": \"a\"}}");
        assert_eq!(parsed.summary, "s");
        assert!(parsed.per_node_results.is_empty());
    }

    #[test]
    fn non_object_json_is_treated_as_prose() {
        let parsed = parse_response("[1, 2, 3]");
        assert_eq!(parsed.summary, "[1, 2, 3]");
        assert_eq!(parsed.source, PayloadSource::RawText);
    }

    #[test]
    fn never_fails_on_degenerate_input() {
        for raw in ["", "{", "}", "}{", "```json", "```json\n```", "{\"summary\": ", "\u{feff}{}"] {
            let parsed = parse_response(raw);
            assert!(parsed.per_node_results.is_empty(), "input: {raw:?}");
        }
    }
}
