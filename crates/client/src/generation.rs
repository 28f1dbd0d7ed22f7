// Client-side response generation: streams a reply from the configured
// provider into `pushAssistantMessageChunk` mutations. A reply that is
// aborted or replaced by a newer one for the same chat ends `aborted`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use uuid::Uuid;

use liqua_common::mutators::{AbortChatArgs, Mutation, PushAssistantMessageChunkArgs, SendUserMessageArgs};
use liqua_common::stream::ChunkType;
use liqua_common::types::now_millis;
use liqua_llm::prompt::build_prompt;
use liqua_llm::{abort_pair, generate_into, AbortHandle, GenerationError, GenerationRequest, PumpOutcome, SharedGenerator};

use crate::sync::SyncEngine;
use crate::transport::SyncTransport;

/// Result of one generated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_id: Uuid,
    pub outcome: PumpOutcome,
}

pub struct Responder<T> {
    engine: Arc<SyncEngine<T>>,
    generator: SharedGenerator,
    default_instructions: Option<String>,
    running: Mutex<HashMap<Uuid, (Uuid, AbortHandle)>>,
}

impl<T: SyncTransport> Responder<T> {
    pub fn new(engine: Arc<SyncEngine<T>>, generator: SharedGenerator) -> Self {
        Self { engine, generator, default_instructions: None, running: Mutex::new(HashMap::new()) }
    }

    /// Instructions for chats that have none of their own.
    pub fn with_default_instructions(mut self, instructions: Option<String>) -> Self {
        self.default_instructions = instructions;
        self
    }

    /// Send a user message and stream the assistant's reply to it.
    pub async fn send_and_respond(&self, chat_id: Uuid, content: &str, model: &str) -> Result<Reply> {
        self.engine.mutate(Mutation::SendUserMessage(SendUserMessageArgs {
            id: Uuid::new_v4(),
            chat_id,
            content: content.to_owned(),
            timestamp: now_millis(),
        }))?;
        self.respond(chat_id, model).await
    }

    /// Generate a reply to the chat as it currently stands.
    pub async fn respond(&self, chat_id: Uuid, model: &str) -> Result<Reply> {
        let (history, chat_instructions) = self.engine.with_replica(|replica| {
            replica.chat(chat_id).map(|chat| (replica.messages(chat_id), chat.custom_instructions))
        })?
        .ok_or_else(|| anyhow!("chat {chat_id} is not in the local replica"))?;

        let instructions = chat_instructions.or_else(|| self.default_instructions.clone());
        let request =
            GenerationRequest { model: model.to_owned(), messages: build_prompt(&history, instructions.as_deref()) };

        let message_id = Uuid::new_v4();
        let (handle, signal) = abort_pair();
        if let Some((_, previous)) = self.running()?.insert(chat_id, (message_id, handle)) {
            previous.abort();
        }

        let engine = &self.engine;
        let mut sink = |chunk: &str, chunk_type: ChunkType| -> Result<(), GenerationError> {
            engine
                .mutate(Mutation::PushAssistantMessageChunk(PushAssistantMessageChunkArgs {
                    message_id,
                    chat_id,
                    chunk: chunk.to_owned(),
                    chunk_type,
                    model: model.to_owned(),
                    timestamp: now_millis(),
                }))
                .map(|_| ())
                .map_err(GenerationError::sink)
        };
        let outcome = generate_into(self.generator.as_ref(), request, &mut sink, signal).await;
        {
            let mut running = self.running()?;
            if running.get(&chat_id).is_some_and(|(current, _)| *current == message_id) {
                running.remove(&chat_id);
            }
        }

        if !matches!(outcome, Ok(PumpOutcome::Completed { .. } | PumpOutcome::Failed { .. })) {
            self.engine.mutate(Mutation::AbortChat(AbortChatArgs::message(chat_id, message_id)))?;
        }
        let outcome = outcome?;
        tracing::info!(%chat_id, %message_id, ?outcome, "reply finished");
        Ok(Reply { message_id, outcome })
    }

    /// Stop a running reply and finalize its message as aborted.
    pub fn abort(&self, chat_id: Uuid) -> Result<()> {
        if let Some((_, handle)) = self.running()?.remove(&chat_id) {
            handle.abort();
        }
        self.engine.mutate(Mutation::AbortChat(AbortChatArgs::chat(chat_id)))?;
        Ok(())
    }

    pub fn is_running(&self, chat_id: Uuid) -> Result<bool> {
        Ok(self.running()?.contains_key(&chat_id))
    }

    fn running(&self) -> Result<std::sync::MutexGuard<'_, HashMap<Uuid, (Uuid, AbortHandle)>>> {
        self.running.lock().map_err(|_| anyhow!("generation registry lock poisoned"))
    }
}
