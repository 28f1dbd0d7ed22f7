// Remote API-key adapter: OpenRouter chat completions over server-sent events.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::generator::{GenerationRequest, ReasoningEffort, TextGenerator, TextStream};
use crate::lines::{decode_text_stream, LineEvent};
use crate::prompt::PromptMessage;

pub const OPENROUTER_CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
/// The API key is only ever read from the environment.
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE: &str = "[DONE]";

pub struct OpenRouterGenerator {
    http: reqwest::Client,
    api_key: String,
    reasoning_effort: ReasoningEffort,
    endpoint: String,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    reasoning: ReasoningOptions,
    usage: UsageOptions,
}

/// Reasoning tokens are spent but never streamed back.
#[derive(Serialize)]
struct ReasoningOptions {
    exclude: bool,
    effort: &'static str,
}

#[derive(Serialize)]
struct UsageOptions {
    include: bool,
}

#[derive(Deserialize)]
struct CompletionEvent {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    error: Option<CompletionError>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    #[serde(default)]
    delta: Option<CompletionDelta>,
}

#[derive(Deserialize)]
struct CompletionDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionError {
    message: String,
}

impl OpenRouterGenerator {
    pub fn new(http: reqwest::Client, api_key: String, reasoning_effort: ReasoningEffort) -> Self {
        Self { http, api_key, reasoning_effort, endpoint: OPENROUTER_CHAT_URL.to_owned() }
    }

    /// Point at another OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

pub(crate) fn parse_sse_line(line: &str) -> LineEvent {
    // Comment lines (": OPENROUTER PROCESSING") and other fields carry no text.
    let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
        return LineEvent::Skip;
    };
    let data = data.trim();
    if data == SSE_DONE {
        return LineEvent::Done;
    }

    let event: CompletionEvent = match serde_json::from_str(data) {
        Ok(event) => event,
        Err(err) => return LineEvent::Error(GenerationError::Decode(format!("{err}: {data}"))),
    };
    if let Some(error) = event.error {
        return LineEvent::Error(GenerationError::Provider(error.message));
    }
    let text: String = event
        .choices
        .into_iter()
        .filter_map(|choice| choice.delta.and_then(|delta| delta.content))
        .collect();
    LineEvent::Text(text)
}

impl TextGenerator for OpenRouterGenerator {
    fn provider(&self) -> &'static str {
        "openrouter"
    }

    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextStream, GenerationError>> {
        Box::pin(async move {
            let body = CompletionBody {
                model: &request.model,
                messages: &request.messages,
                stream: true,
                reasoning: ReasoningOptions { exclude: true, effort: self.reasoning_effort.as_str() },
                usage: UsageOptions { include: true },
            };
            let response = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GenerationError::Status { status: status.as_u16(), body });
            }

            tracing::debug!(model = %request.model, effort = self.reasoning_effort.as_str(), "openrouter stream opened");
            Ok(decode_text_stream(response.bytes_stream(), parse_sse_line))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deltas_are_extracted() {
        let line = r#"data: {"id":"gen-1","choices":[{"index":0,"delta":{"role":"assistant","content":"Hel"}}]}"#;
        assert!(matches!(parse_sse_line(line), LineEvent::Text(text) if text == "Hel"));
    }

    #[test]
    fn usage_only_events_carry_no_text() {
        let line = r#"data: {"id":"gen-1","choices":[],"usage":{"prompt_tokens":10}}"#;
        assert!(matches!(parse_sse_line(line), LineEvent::Text(text) if text.is_empty()));
    }

    #[test]
    fn comments_are_skipped_and_done_ends() {
        assert!(matches!(parse_sse_line(": OPENROUTER PROCESSING"), LineEvent::Skip));
        assert!(matches!(parse_sse_line("data: [DONE]"), LineEvent::Done));
    }

    #[test]
    fn mid_stream_errors_surface() {
        let line = r#"data: {"error":{"code":502,"message":"upstream overloaded"}}"#;
        assert!(matches!(
            parse_sse_line(line),
            LineEvent::Error(GenerationError::Provider(message)) if message == "upstream overloaded"
        ));
    }

    #[test]
    fn request_body_excludes_reasoning() {
        let messages = vec![PromptMessage::new(crate::prompt::PromptRole::User, "hi")];
        let body = CompletionBody {
            model: "openai/gpt-4o",
            messages: &messages,
            stream: true,
            reasoning: ReasoningOptions { exclude: true, effort: ReasoningEffort::High.as_str() },
            usage: UsageOptions { include: true },
        };
        let json = serde_json::to_value(&body).expect("serializes");
        assert_eq!(json["reasoning"]["exclude"], true);
        assert_eq!(json["reasoning"]["effort"], "high");
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
