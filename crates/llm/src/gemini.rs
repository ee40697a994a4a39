//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::{Deserialize, Serialize};

use pipeline::{GenerationParameters, GenerationRequest, MediaReference, ModelClient, ModelError};

use crate::TRACING_TARGET_GEMINI;

/// Production API root.
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when none is configured.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Connection settings for [`GeminiClient`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Model name, e.g. `gemini-2.0-flash`.
    pub model: String,
    /// API root without a trailing slash.
    pub base_url: String,
    /// Whole-request timeout. Bounds each call; there is no retry.
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Configuration for the production endpoint and default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_owned(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_owned(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Overrides the model name.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Overrides the API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// [`ModelClient`] backed by the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
    endpoint: String,
}

impl GeminiClient {
    /// Builds a client. Fails only if the TLS backend cannot be initialised.
    pub fn new(config: GeminiConfig) -> Result<Self, ModelError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| ModelError::Transport {
                message: format!("failed to build HTTP client: {err}"),
            })?;
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            config.base_url.trim_end_matches('/'),
            config.model
        );
        Ok(Self {
            http,
            config,
            endpoint,
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, ModelError> {
        let body = GenerateContentRequest::new(request);

        tracing::debug!(
            target: TRACING_TARGET_GEMINI,
            model = %self.config.model,
            multimodal = request.media.is_some(),
            prompt_chars = request.instructions.len(),
            "calling generateContent"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            let error = classify_failure(status, &text, retry_after);
            tracing::warn!(
                target: TRACING_TARGET_GEMINI,
                status = status.as_u16(),
                error = %error,
                "generateContent failed"
            );
            return Err(error);
        }

        let payload: GenerateContentResponse =
            response.json().await.map_err(|err| ModelError::Transport {
                message: format!("undecodable generateContent response: {err}"),
            })?;
        payload.into_text()
    }
}

fn transport_error(err: reqwest::Error) -> ModelError {
    if err.is_timeout() || err.is_connect() {
        ModelError::Unavailable {
            message: err.to_string(),
        }
    } else {
        ModelError::Transport {
            message: err.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Maps a non-success answer to a [`ModelError`] from the status code and the
/// structured `error` body. Messages are carried along, never matched on.
fn classify_failure(status: StatusCode, body: &str, retry_after: Option<u64>) -> ModelError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_default();
    let message = if envelope.message.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        envelope.message.clone()
    };

    if envelope.has_reason("API_KEY_INVALID") {
        return ModelError::Auth { message };
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Auth { message },
        StatusCode::TOO_MANY_REQUESTS => {
            if envelope.has_detail("google.rpc.QuotaFailure") && envelope.retry_delay_secs().is_none() {
                ModelError::QuotaExhausted { message }
            } else {
                ModelError::RateLimited {
                    retry_after_secs: envelope.retry_delay_secs().or(retry_after),
                }
            }
        }
        StatusCode::REQUEST_TIMEOUT => ModelError::Unavailable { message },
        status if status.is_server_error() => ModelError::Unavailable { message },
        status if status.is_client_error() => ModelError::Rejected { message },
        _ => ModelError::Transport { message },
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "@type", default)]
    type_url: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(rename = "retryDelay", default)]
    retry_delay: Option<String>,
}

impl ApiError {
    fn has_reason(&self, reason: &str) -> bool {
        self.details
            .iter()
            .any(|detail| detail.reason.as_deref() == Some(reason))
    }

    fn has_detail(&self, type_suffix: &str) -> bool {
        self.details
            .iter()
            .any(|detail| detail.type_url.ends_with(type_suffix))
    }

    /// Seconds from a `google.rpc.RetryInfo` detail, e.g. `"27s"` or `"1.5s"`.
    fn retry_delay_secs(&self) -> Option<u64> {
        self.details
            .iter()
            .filter(|detail| detail.type_url.ends_with("google.rpc.RetryInfo"))
            .find_map(|detail| detail.retry_delay.as_deref())
            .and_then(|delay| delay.trim_end_matches('s').parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(|secs| secs.ceil() as u64)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(request: GenerationRequest<'a>) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(media) = request.media {
            parts.push(Part::File {
                file_data: FileData::for_video(media),
            });
        }
        parts.push(Part::Text {
            text: request.instructions,
        });
        Self {
            contents: [Content {
                role: "user",
                parts,
            }],
            generation_config: GenerationConfig::from(request.parameters),
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: &'static str,
    file_uri: String,
}

impl FileData {
    fn for_video(media: &MediaReference) -> Self {
        Self {
            mime_type: "video/*",
            file_uri: media.watch_url(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

impl From<GenerationParameters> for GenerationConfig {
    fn from(parameters: GenerationParameters) -> Self {
        Self {
            temperature: parameters.temperature.as_f32(),
            top_p: parameters.top_p,
            max_output_tokens: parameters.max_output_tokens,
            response_mime_type: parameters.json_output.then_some("application/json"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, ModelError> {
        if let Some(reason) = self
            .prompt_feedback
            .and_then(|feedback| feedback.block_reason)
        {
            return Err(ModelError::Rejected {
                message: format!("prompt blocked: {reason}"),
            });
        }

        let text: String = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            Err(ModelError::EmptyResponse)
        } else {
            Ok(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn invalid_key_reason_is_auth_even_on_400() {
        let body = json!({"error": {"code": 400, "message": "API key not valid.", "status": "INVALID_ARGUMENT",
            "details": [{"@type": "type.googleapis.com/google.rpc.ErrorInfo", "reason": "API_KEY_INVALID"}]}});
        let err = classify_failure(StatusCode::BAD_REQUEST, &body.to_string(), None);
        assert_eq!(
            err,
            ModelError::Auth {
                message: "API key not valid.".into()
            }
        );
    }

    #[test]
    fn quota_failure_without_retry_info_is_quota_exhausted() {
        let body = json!({"error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED",
            "details": [{"@type": "type.googleapis.com/google.rpc.QuotaFailure", "violations": []}]}});
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, &body.to_string(), None);
        assert!(matches!(err, ModelError::QuotaExhausted { .. }));
    }

    #[test]
    fn retry_info_delay_is_rounded_up() {
        let body = json!({"error": {"code": 429, "message": "slow down", "details": [
            {"@type": "type.googleapis.com/google.rpc.QuotaFailure"},
            {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "26.2s"}]}});
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, &body.to_string(), None);
        assert_eq!(
            err,
            ModelError::RateLimited {
                retry_after_secs: Some(27)
            }
        );
    }

    #[test]
    fn unparseable_bodies_fall_back_to_status() {
        assert!(matches!(
            classify_failure(StatusCode::BAD_GATEWAY, "<html>", None),
            ModelError::Unavailable { .. }
        ));
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, "", None),
            ModelError::Rejected { .. }
        ));
        assert_eq!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, "", Some(5)),
            ModelError::RateLimited {
                retry_after_secs: Some(5)
            }
        );
    }

    #[test]
    fn request_body_puts_media_before_text() {
        let media = MediaReference::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        let request = GenerationRequest {
            instructions: "analyse",
            parameters: GenerationParameters::creative(1024),
            media: Some(&media),
        };
        let body = serde_json::to_value(GenerateContentRequest::new(request)).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0]["fileData"]["fileUri"],
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert_eq!(body["contents"][0]["parts"][1]["text"], "analyse");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }

    #[test]
    fn candidate_parts_are_concatenated() {
        let response: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"summary\":"}, {"text": " \"ok\"}"}]}}]
        }))
        .unwrap();
        assert_eq!(response.into_text().unwrap(), "{\"summary\": \"ok\"}");
    }

    #[test]
    fn blocked_prompt_is_rejected_and_no_candidates_is_empty() {
        let blocked: GenerateContentResponse =
            serde_json::from_value(json!({"promptFeedback": {"blockReason": "SAFETY"}})).unwrap();
        assert!(matches!(blocked.into_text(), Err(ModelError::Rejected { .. })));

        let empty: GenerateContentResponse =
            serde_json::from_value(json!({"candidates": []})).unwrap();
        assert_eq!(empty.into_text(), Err(ModelError::EmptyResponse));
    }
}
