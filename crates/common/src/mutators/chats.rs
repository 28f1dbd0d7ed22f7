// `chats.*` mutations: chat lifecycle, messages and streaming replies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MutationContext, Transaction};
use crate::chat_tree::{ChatTreeNode, ChatTreeSnapshot};
use crate::error::{MutatorError, MutatorResult};
use crate::stream::{abort_transition, plan_chunk, ChunkAction, ChunkType};
use crate::types::{Chat, ChatPatch, ChatTree, Message, MessagePatch, MessageStatus, Millis, Role};

pub const NEW_CHAT_TITLE: &str = "New Chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitArgs {
    pub id: Uuid,
    pub timestamp: Millis,
    /// `None` creates a brand-new tree holding only this chat.
    #[serde(default)]
    pub chat_tree_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendUserMessageArgs {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub content: String,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAssistantMessageChunkArgs {
    pub message_id: Uuid,
    pub chat_id: Uuid,
    pub chunk: String,
    pub chunk_type: ChunkType,
    pub model: String,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortChatArgs {
    pub chat_id: Uuid,
    /// Limits the abort to this one reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
}

impl AbortChatArgs {
    pub fn chat(chat_id: Uuid) -> Self {
        Self { chat_id, message_id: None }
    }

    pub fn message(chat_id: Uuid, message_id: Uuid) -> Self {
        Self { chat_id, message_id: Some(message_id) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageArgs {
    pub id: Uuid,
    pub content: String,
    pub timestamp: Millis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteLaterMessagesArgs {
    pub message_id: Uuid,
    #[serde(default)]
    pub include_message: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameChatArgs {
    pub chat_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChatArgs {
    pub chat_id: Uuid,
    /// An empty string clears the instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChatArgs {
    pub chat_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResponseArgs {
    pub chat_id: Uuid,
    /// Id the generated assistant message will be streamed into.
    pub message_id: Uuid,
    pub model: String,
}

/// Load a chat the caller owns.
pub fn owned_chat<T>(tx: &T, ctx: &MutationContext, chat_id: Uuid) -> MutatorResult<Chat>
where
    T: Transaction + ?Sized,
{
    let chat = tx.chat(chat_id)?.ok_or_else(|| MutatorError::not_found(format!("chat {chat_id}")))?;
    if chat.owner_id != ctx.user_id {
        return Err(MutatorError::unauthorized(format!("chat {chat_id}")));
    }
    Ok(chat)
}

/// Load a message whose chat the caller owns.
fn owned_message<T>(tx: &T, ctx: &MutationContext, message_id: Uuid) -> MutatorResult<Message>
where
    T: Transaction + ?Sized,
{
    let message = tx
        .message(message_id)?
        .ok_or_else(|| MutatorError::not_found(format!("message {message_id}")))?;
    owned_chat(tx, ctx, message.chat_id)?;
    Ok(message)
}

pub fn init<T>(tx: &mut T, ctx: &MutationContext, args: &InitArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    let tree = match args.chat_tree_id {
        Some(tree_id) => {
            let tree = tx
                .chat_tree(tree_id)?
                .ok_or_else(|| MutatorError::not_found(format!("chat tree {tree_id}")))?;
            if tree.owner_id != ctx.user_id {
                return Err(MutatorError::unauthorized(format!("chat tree {tree_id}")));
            }
            tree
        }
        None => ChatTree { id: Uuid::new_v4(), owner_id: ctx.user_id, data: Vec::new() },
    };

    let data = ChatTreeSnapshot::new(tree.data).prepend(ChatTreeNode::chat(args.id)).into_vec();
    tx.upsert_chat_tree(&ChatTree { data, ..tree })?;

    let created_at = ctx.safe_timestamp(args.timestamp);
    tx.insert_chat(&Chat {
        id: args.id,
        title: NEW_CHAT_TITLE.to_owned(),
        is_public: false,
        owner_id: ctx.user_id,
        created_at,
        updated_at: created_at,
        custom_instructions: None,
    })?;
    Ok(())
}

pub fn send_user_message<T>(
    tx: &mut T,
    ctx: &MutationContext,
    args: &SendUserMessageArgs,
) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    owned_chat(tx, ctx, args.chat_id)?;
    tx.insert_message(&Message {
        id: args.id,
        chat_id: args.chat_id,
        author_id: Some(ctx.user_id),
        role: Role::User,
        content: args.content.clone(),
        status: MessageStatus::Complete,
        created_at: ctx.safe_timestamp(args.timestamp),
    })?;
    Ok(())
}

pub fn push_assistant_message_chunk<T>(
    tx: &mut T,
    ctx: &MutationContext,
    args: &PushAssistantMessageChunkArgs,
) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    owned_chat(tx, ctx, args.chat_id)?;
    let existing = tx.message(args.message_id)?;
    if existing.as_ref().is_some_and(|message| message.chat_id != args.chat_id) {
        return Err(MutatorError::not_found(format!("message {} in chat {}", args.message_id, args.chat_id)));
    }

    match plan_chunk(existing.as_ref(), &args.chunk, args.chunk_type) {
        ChunkAction::Create { content, status } => {
            tx.insert_message(&Message {
                id: args.message_id,
                chat_id: args.chat_id,
                author_id: Some(ctx.user_id),
                role: Role::assistant(args.model.as_str()),
                content,
                status,
                created_at: ctx.safe_timestamp(args.timestamp),
            })?;
        }
        ChunkAction::Append { chunk, status } => {
            tx.append_message_content(args.message_id, &chunk, status)?;
        }
        ChunkAction::Drop(reason) => {
            tracing::debug!(
                message_id = %args.message_id,
                chunk_type = ?args.chunk_type,
                ?reason,
                "dropping assistant chunk"
            );
        }
    }
    Ok(())
}

/// Finalize every streaming message of the chat, or only `message_id` when
/// given. Nothing streaming, or no chat at all, is fine.
pub fn abort_chat<T>(tx: &mut T, ctx: &MutationContext, args: &AbortChatArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    match owned_chat(tx, ctx, args.chat_id) {
        Ok(_) => {}
        Err(MutatorError::NotFound(_)) => return Ok(()),
        Err(err) => return Err(err),
    }

    for message in tx.messages(args.chat_id)? {
        if args.message_id.is_some_and(|id| id != message.id) {
            continue;
        }
        if let Some(status) = abort_transition(&message) {
            tx.update_message(message.id, &MessagePatch { status: Some(status), ..Default::default() })?;
        }
    }
    Ok(())
}

/// Edit a message and truncate the branch after it.
pub fn update_message<T>(tx: &mut T, ctx: &MutationContext, args: &UpdateMessageArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    let message = owned_message(tx, ctx, args.id)?;

    for later in tx.messages(message.chat_id)? {
        if later.id != message.id && later.created_at >= message.created_at {
            tx.delete_message(later.id)?;
        }
    }

    tx.update_message(
        message.id,
        &MessagePatch {
            content: Some(args.content.clone()),
            created_at: Some(ctx.safe_timestamp(args.timestamp)),
            ..Default::default()
        },
    )?;
    Ok(())
}

pub fn delete_later_messages<T>(
    tx: &mut T,
    ctx: &MutationContext,
    args: &DeleteLaterMessagesArgs,
) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    let reference = owned_message(tx, ctx, args.message_id)?;

    for message in tx.messages(reference.chat_id)? {
        let later = if args.include_message {
            message.created_at >= reference.created_at
        } else {
            message.created_at > reference.created_at
        };
        if later {
            tx.delete_message(message.id)?;
        }
    }
    Ok(())
}

/// Retitle a chat. Observers learn about it through the replica change feed;
/// tree node ids stay stable.
pub fn rename<T>(tx: &mut T, ctx: &MutationContext, args: &RenameChatArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    owned_chat(tx, ctx, args.chat_id)?;
    tx.update_chat(
        args.chat_id,
        &ChatPatch { title: Some(args.title.clone()), updated_at: Some(ctx.now), ..Default::default() },
    )?;
    Ok(())
}

pub fn update<T>(tx: &mut T, ctx: &MutationContext, args: &UpdateChatArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    owned_chat(tx, ctx, args.chat_id)?;
    let custom_instructions = args.custom_instructions.as_ref().map(|text| {
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_owned())
    });
    tx.update_chat(
        args.chat_id,
        &ChatPatch {
            is_public: args.is_public,
            custom_instructions,
            updated_at: Some(ctx.now),
            ..Default::default()
        },
    )?;
    Ok(())
}

/// Delete a chat, its messages, and any leaf pointing at it in the caller's trees.
pub fn delete<T>(tx: &mut T, ctx: &MutationContext, args: &DeleteChatArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    owned_chat(tx, ctx, args.chat_id)?;
    tx.delete_chat(args.chat_id)?;
    detach_chats(tx, ctx, &[args.chat_id])
}

/// Remove leaves referencing any of `chat_ids` from every tree the caller owns.
pub(crate) fn detach_chats<T>(tx: &mut T, ctx: &MutationContext, chat_ids: &[Uuid]) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    for tree in tx.chat_trees_for_owner(ctx.user_id)? {
        let snapshot = ChatTreeSnapshot::new(tree.data.clone());
        if !chat_ids.iter().any(|chat_id| snapshot.references_chat(*chat_id)) {
            continue;
        }
        let pruned = chat_ids.iter().fold(snapshot, |snapshot, chat_id| snapshot.without_chat(*chat_id));
        tx.upsert_chat_tree(&ChatTree { data: pruned.into_vec(), ..tree })?;
    }
    Ok(())
}
