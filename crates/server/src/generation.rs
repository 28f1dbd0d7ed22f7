// Server-side response generation, started and cancelled by push side effects.
//
// Each running reply is keyed by chat; starting a new one for the same chat
// aborts the previous stream. Chunks are written as authoritative
// `pushAssistantMessageChunk` runs, so they follow the same lifecycle rules
// as client-streamed replies. A reply whose stream is aborted finalizes its
// own message as `aborted` once the pump has stopped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use liqua_common::mutators::{AbortChatArgs, Mutation, MutationContext, PushAssistantMessageChunkArgs, Transaction};
use liqua_common::stream::ChunkType;
use liqua_common::types::now_millis;
use liqua_llm::prompt::build_prompt;
use liqua_llm::{
    abort_pair, generate_into, AbortHandle, GenerationError, GenerationRequest, PumpOutcome, SharedGenerator,
};

use crate::db::store::SqliteTransaction;
use crate::db::Database;
use crate::gateway::apply_mutation;

struct Running {
    message_id: Uuid,
    handle: AbortHandle,
}

pub struct Generations {
    db: Database,
    generator: Option<SharedGenerator>,
    skew_ms: i64,
    running: Mutex<HashMap<Uuid, Running>>,
}

impl Generations {
    pub fn new(db: Database, generator: Option<SharedGenerator>, skew_ms: i64) -> Self {
        Self { db, generator, skew_ms, running: Mutex::new(HashMap::new()) }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    /// Spawn a reply for `chat_id` streamed into `message_id`. Returns once
    /// the stream task is running; failures after that are only logged.
    pub async fn start(self: &Arc<Self>, user_id: Uuid, chat_id: Uuid, message_id: Uuid, model: String) -> Result<()> {
        let Some(generator) = self.generator.clone() else {
            bail!("server-side generation is not configured");
        };

        let (history, instructions) = self
            .db
            .call(move |conn| -> Result<_> {
                let tx = SqliteTransaction::new(conn);
                let chat = tx.chat(chat_id)?.ok_or_else(|| anyhow!("chat {chat_id} does not exist"))?;
                Ok((tx.messages(chat_id)?, chat.custom_instructions))
            })
            .await?
            .context("failed to load chat history for generation")?;
        let request = GenerationRequest { model: model.clone(), messages: build_prompt(&history, instructions.as_deref()) };

        let (handle, signal) = abort_pair();
        if let Some(previous) = self.running()?.insert(chat_id, Running { message_id, handle }) {
            previous.handle.abort();
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let ctx = MutationContext::server(user_id, this.skew_ms);
            let db = &this.db;
            let mut sink = |chunk: &str, chunk_type: ChunkType| -> Result<(), GenerationError> {
                let mutation = Mutation::PushAssistantMessageChunk(PushAssistantMessageChunkArgs {
                    message_id,
                    chat_id,
                    chunk: chunk.to_owned(),
                    chunk_type,
                    model: model.clone(),
                    timestamp: now_millis(),
                });
                db.with_conn(|conn| apply_mutation(conn, &ctx.at(now_millis()), &mutation))
                    .map_err(GenerationError::sink)?
                    .map(|_| ())
                    .map_err(GenerationError::sink)
            };

            let outcome = generate_into(generator.as_ref(), request, &mut sink, signal).await;
            this.finish(chat_id, message_id);
            match outcome {
                Ok(PumpOutcome::Aborted) => {
                    info!(%chat_id, %message_id, "server reply aborted");
                    this.finalize_aborted(&ctx, chat_id, message_id);
                }
                Ok(outcome) => info!(%chat_id, %message_id, ?outcome, "server reply finished"),
                Err(error) => {
                    warn!(%chat_id, %message_id, %error, "server reply failed");
                    this.finalize_aborted(&ctx, chat_id, message_id);
                }
            }
        });
        Ok(())
    }

    /// Abort whatever is streaming for `chat_id`. Returns whether anything was.
    pub fn cancel(&self, chat_id: Uuid) -> Result<bool> {
        match self.running()?.remove(&chat_id) {
            Some(running) => {
                running.handle.abort();
                info!(%chat_id, message_id = %running.message_id, "server reply cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn is_running(&self, chat_id: Uuid) -> Result<bool> {
        Ok(self.running()?.contains_key(&chat_id))
    }

    /// Move `message_id` out of `streaming` if its stream stopped early.
    fn finalize_aborted(&self, ctx: &MutationContext, chat_id: Uuid, message_id: Uuid) {
        let abort = Mutation::AbortChat(AbortChatArgs::message(chat_id, message_id));
        match self.db.with_conn(|conn| apply_mutation(conn, &ctx.at(now_millis()), &abort)) {
            Ok(Ok(_)) => {}
            Ok(Err(error)) => warn!(%chat_id, %message_id, %error, "failed to finalize aborted reply"),
            Err(error) => warn!(%chat_id, %message_id, ?error, "failed to finalize aborted reply"),
        }
    }

    fn finish(&self, chat_id: Uuid, message_id: Uuid) {
        if let Ok(mut running) = self.running() {
            if running.get(&chat_id).is_some_and(|entry| entry.message_id == message_id) {
                running.remove(&chat_id);
            }
        }
    }

    fn running(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Running>>> {
        self.running.lock().map_err(|_| anyhow!("generation registry lock poisoned"))
    }
}
