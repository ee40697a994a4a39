//! External content referenced by a graph: media attachments and fetched text.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Character budget for fetched content embedded in a prompt.
pub const DEFAULT_CONTENT_BUDGET: usize = 30_000;

/// Marker appended to content cut at the budget.
pub const TRUNCATION_MARKER: &str = "…";

/// A media item the generative backend can attach alongside the prompt.
///
/// Only YouTube videos are recognised; any other URL is embedded in the
/// prompt text instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaReference {
    video_id: String,
}

impl MediaReference {
    /// Recognises `watch?v=`, `youtu.be/`, `shorts/`, `embed/` and `live/` URLs.
    pub fn parse(url: &str) -> Option<Self> {
        let url = url.trim();
        let rest = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let rest = rest
            .strip_prefix("www.")
            .or_else(|| rest.strip_prefix("m."))
            .unwrap_or(rest);

        let candidate = if let Some(path) = rest.strip_prefix("youtu.be/") {
            path
        } else if let Some(path) = rest.strip_prefix("youtube.com/") {
            if let Some(query) = path.strip_prefix("watch") {
                query
                    .trim_start_matches('?')
                    .split('&')
                    .find_map(|pair| pair.strip_prefix("v="))?
            } else {
                ["shorts/", "embed/", "live/"]
                    .iter()
                    .find_map(|prefix| path.strip_prefix(prefix))?
            }
        } else {
            return None;
        };

        let video_id: String = candidate
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        (video_id.len() == 11).then_some(Self { video_id })
    }

    /// Returns the 11-character video id.
    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    /// Returns the canonical watch URL used for multimodal attachment.
    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.video_id)
    }
}

/// Text fetched from a content node's URL ahead of prompt composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalContent {
    /// URL the content was fetched from.
    pub url: String,
    /// Document title, when one was found.
    pub title: Option<String>,
    /// Plain text body.
    pub text: String,
}

/// Cuts `text` to at most `budget` characters, appending [`TRUNCATION_MARKER`]
/// when anything was removed.
pub fn truncate_content(text: &str, budget: usize) -> Cow<'_, str> {
    match text.char_indices().nth(budget) {
        None => Cow::Borrowed(text),
        Some((cut, _)) => Cow::Owned(format!("{}{TRUNCATION_MARKER}", &text[..cut])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_common_youtube_url_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=42",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "http://m.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
        ] {
            let media = MediaReference::parse(url).unwrap_or_else(|| panic!("{url}"));
            assert_eq!(media.video_id(), "dQw4w9WgXcQ");
        }
    }

    #[test]
    fn rejects_non_video_urls() {
        assert!(MediaReference::parse("https://example.com/article").is_none());
        assert!(MediaReference::parse("https://www.youtube.com/channel/abc").is_none());
        assert!(MediaReference::parse("https://youtu.be/short").is_none());
    }

    #[test]
    fn truncation_is_silent_and_marked() {
        assert_eq!(truncate_content("short", 10), "short");
        assert_eq!(truncate_content("abcdef", 3), "abc…");
        // Multi-byte characters are never split.
        assert_eq!(truncate_content("ééééé", 2), "éé…");
    }
}
