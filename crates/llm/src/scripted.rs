// Deterministic generator for tests and offline runs.

use std::sync::Mutex;

use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt};

use crate::error::GenerationError;
use crate::generator::{GenerationRequest, TextGenerator, TextStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    Token(String),
    Fail(String),
    /// Never yields again; only an abort ends the stream.
    Stall,
}

/// Replays the same script for every request and records what it was asked.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    steps: Vec<ScriptStep>,
    refuse: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self { steps, ..Self::default() }
    }

    /// Yields each token in order, then ends.
    pub fn tokens<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(tokens.into_iter().map(|token| ScriptStep::Token(token.into())).collect())
    }

    /// Fails before streaming anything.
    pub fn refusing(message: impl Into<String>) -> Self {
        Self { refuse: Some(message.into()), ..Self::default() }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().map(|requests| requests.clone()).unwrap_or_default()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn provider(&self) -> &'static str {
        "scripted"
    }

    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<TextStream, GenerationError>> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let refuse = self.refuse.clone();
        let steps = self.steps.clone();

        Box::pin(async move {
            if let Some(message) = refuse {
                return Err(GenerationError::Provider(message));
            }
            let stream = stream::iter(steps).flat_map(|step| match step {
                ScriptStep::Token(text) => stream::once(async move { Ok(text) }).boxed(),
                ScriptStep::Fail(message) => {
                    stream::once(async move { Err(GenerationError::Provider(message)) }).boxed()
                }
                ScriptStep::Stall => stream::pending().boxed(),
            });
            Ok(stream.boxed())
        })
    }
}
