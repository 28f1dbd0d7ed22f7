// The text-generation seam and provider selection.

use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::ollama::OllamaGenerator;
use crate::openrouter::OpenRouterGenerator;
use crate::prompt::PromptMessage;

/// Lazy sequence of text deltas. Dropping it cancels the request.
pub type TextStream = BoxStream<'static, Result<String, GenerationError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
}

/// Anything that turns a conversation into a stream of text chunks.
pub trait TextGenerator: Send + Sync {
    /// Short provider name for logs.
    fn provider(&self) -> &'static str;

    /// Start generating. Errors before the first byte come back here; errors
    /// mid-stream come back as stream items.
    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextStream, GenerationError>>;
}

pub type SharedGenerator = Arc<dyn TextGenerator>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    OpenRouter,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    #[default]
    High,
}

impl ReasoningEffort {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// What is needed to build a generator for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorSettings {
    Ollama { base_url: String },
    OpenRouter { api_key: Option<String>, reasoning_effort: ReasoningEffort },
}

pub fn build_generator(settings: &GeneratorSettings) -> Result<SharedGenerator, GenerationError> {
    let http = reqwest::Client::new();
    let generator: SharedGenerator = match settings {
        GeneratorSettings::Ollama { base_url } => Arc::new(OllamaGenerator::new(http, base_url)?),
        GeneratorSettings::OpenRouter { api_key, reasoning_effort } => {
            let api_key = api_key.clone().ok_or_else(|| {
                GenerationError::MissingApiKey(format!(
                    "OpenRouter API key not found (set {}).",
                    crate::openrouter::API_KEY_ENV
                ))
            })?;
            Arc::new(OpenRouterGenerator::new(http, api_key, *reasoning_effort))
        }
    };
    tracing::debug!(provider = generator.provider(), "text generator ready");
    Ok(generator)
}
