// Local inference adapter: Ollama `/api/chat` with newline-delimited JSON.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::GenerationError;
use crate::generator::{GenerationRequest, TextGenerator, TextStream};
use crate::lines::{decode_text_stream, LineEvent};
use crate::prompt::PromptMessage;

pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

pub struct OllamaGenerator {
    http: reqwest::Client,
    chat_url: Url,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

impl OllamaGenerator {
    pub fn new(http: reqwest::Client, base_url: &str) -> Result<Self, GenerationError> {
        let chat_url = Url::parse(base_url)?.join("/api/chat")?;
        Ok(Self { http, chat_url })
    }
}

pub(crate) fn parse_line(line: &str) -> LineEvent {
    let parsed: ChatLine = match serde_json::from_str(line) {
        Ok(parsed) => parsed,
        Err(err) => return LineEvent::Error(GenerationError::Decode(format!("{err}: {line}"))),
    };
    if let Some(error) = parsed.error {
        return LineEvent::Error(GenerationError::Provider(error));
    }
    let text = parsed.message.map(|message| message.content).unwrap_or_default();
    if parsed.done && text.is_empty() {
        return LineEvent::Done;
    }
    LineEvent::Text(text)
}

impl TextGenerator for OllamaGenerator {
    fn provider(&self) -> &'static str {
        "ollama"
    }

    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextStream, GenerationError>> {
        Box::pin(async move {
            let body = ChatBody { model: &request.model, messages: &request.messages, stream: true };
            let response = self.http.post(self.chat_url.clone()).json(&body).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GenerationError::Status { status: status.as_u16(), body });
            }

            tracing::debug!(model = %request.model, "ollama stream opened");
            Ok(decode_text_stream(response.bytes_stream(), parse_line))
        })
    }
}
