//! Calls the generative backend for a composed prompt.

use std::sync::Arc;

use pipeline::{GenerationRequest, ModelClient, ModelError, PromptSpec};

use crate::TRACING_TARGET_INVOKER;

/// Raw model output plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Text exactly as the backend returned it.
    pub text: String,
    /// `true` if the media attachment was part of the successful call.
    pub multimodal: bool,
}

/// Runs a [`PromptSpec`] against a [`ModelClient`].
///
/// With media attached, one multimodal attempt is made first. Any failure of
/// that attempt falls back to a single text-only call with the same
/// instructions; only the text-only failure reaches the caller.
#[derive(Clone)]
pub struct ModelInvoker {
    client: Arc<dyn ModelClient>,
}

impl ModelInvoker {
    /// Wraps `client`.
    pub fn new(client: Arc<dyn ModelClient>) -> Self {
        Self { client }
    }

    /// Model identifier of the wrapped client.
    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Generates text for `prompt`.
    pub async fn invoke(&self, prompt: &PromptSpec) -> Result<Invocation, ModelError> {
        let text_only = GenerationRequest {
            instructions: &prompt.instructions,
            parameters: prompt.parameters,
            media: None,
        };

        if let Some(media) = prompt.media.as_ref() {
            let multimodal = GenerationRequest {
                media: Some(media),
                ..text_only
            };
            match self.client.generate(multimodal).await {
                Ok(text) => {
                    return Ok(Invocation {
                        text,
                        multimodal: true,
                    })
                }
                Err(error) => {
                    tracing::warn!(
                        target: TRACING_TARGET_INVOKER,
                        video_id = media.video_id(),
                        %error,
                        "multimodal call failed; retrying text-only"
                    );
                }
            }
        }

        let text = self.client.generate(text_only).await?;
        Ok(Invocation {
            text,
            multimodal: false,
        })
    }
}

impl std::fmt::Debug for ModelInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInvoker")
            .field("model", &self.client.model_name())
            .finish()
    }
}
