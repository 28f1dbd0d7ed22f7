// Forking: branch a chat at a message into a sibling chat.
//
// The prefix of the history up to the reference message is copied into a new
// chat, and the original leaf in the owner's tree is wrapped in a group so the
// two versions sit side by side exactly where the original used to be.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chats::owned_chat;
use super::{MutationContext, Transaction};
use crate::chat_tree::{new_node_id, ChatNodeKind, ChatTreeNode, ChatTreeSnapshot};
use crate::error::{MutatorError, MutatorResult};
use crate::types::{Chat, ChatPatch, ChatTree, Message, MessageStatus};

pub const ORIGINAL_VERSION_TITLE: &str = "v1";
pub const FORKED_VERSION_TITLE: &str = "v2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkArgs {
    pub chat_id: Uuid,
    pub forked_chat_id: Uuid,
    /// Last message (inclusive, by `created_at`) carried into the fork.
    pub message_id: Uuid,
}

pub fn fork<T>(tx: &mut T, ctx: &MutationContext, args: &ForkArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    let chat = owned_chat(tx, ctx, args.chat_id)?;

    let tree = tx
        .chat_trees_for_owner(ctx.user_id)?
        .into_iter()
        .find(|tree| ChatTreeSnapshot::new(tree.data.clone()).references_chat(args.chat_id))
        .ok_or_else(|| MutatorError::not_found(format!("chat tree holding chat {}", args.chat_id)))?;

    let reference = tx
        .message(args.message_id)?
        .filter(|message| message.chat_id == args.chat_id)
        .ok_or_else(|| MutatorError::not_found(format!("message {}", args.message_id)))?;

    let prefix: Vec<Message> = tx
        .messages(args.chat_id)?
        .into_iter()
        .filter(|message| message.created_at <= reference.created_at)
        .collect();

    let now = ctx.safe_timestamp(ctx.now);
    tx.update_chat(
        args.chat_id,
        &ChatPatch { title: Some(ORIGINAL_VERSION_TITLE.to_owned()), ..Default::default() },
    )?;
    tx.insert_chat(&Chat {
        id: args.forked_chat_id,
        title: FORKED_VERSION_TITLE.to_owned(),
        is_public: chat.is_public,
        owner_id: ctx.user_id,
        created_at: now,
        updated_at: now,
        custom_instructions: chat.custom_instructions.clone(),
    })?;

    for message in &prefix {
        tx.insert_message(&copy_into(message, args.forked_chat_id))?;
    }

    let snapshot = ChatTreeSnapshot::new(tree.data.clone());
    let wrapped = wrap_leaf(&snapshot, args.chat_id, &chat.title, args.forked_chat_id);
    tx.upsert_chat_tree(&ChatTree { data: wrapped.into_vec(), ..tree })?;

    tracing::debug!(
        chat_id = %args.chat_id,
        forked_chat_id = %args.forked_chat_id,
        copied = prefix.len(),
        "forked chat"
    );
    Ok(())
}

/// Fresh copy of `message` inside `chat_id`. A reply still streaming at fork
/// time will never finish in the copy, so it lands as aborted.
fn copy_into(message: &Message, chat_id: Uuid) -> Message {
    let status = match message.status {
        MessageStatus::Streaming => MessageStatus::Aborted,
        other => other,
    };
    Message { id: Uuid::new_v4(), chat_id, status, ..message.clone() }
}

/// Replace the leaf for `chat_id` with a group named `group_name` holding the
/// original leaf (under a fresh node id) followed by a leaf for `forked_chat_id`.
pub fn wrap_leaf(
    snapshot: &ChatTreeSnapshot,
    chat_id: Uuid,
    group_name: &str,
    forked_chat_id: Uuid,
) -> ChatTreeSnapshot {
    let Some(leaf) = snapshot.find_chat_leaf(chat_id) else {
        return snapshot.clone();
    };
    let leaf_id = leaf.id.clone();

    snapshot.update_node(&leaf_id, |node| {
        let original = ChatTreeNode { id: new_node_id(), ..node.clone() };
        *node = ChatTreeNode::new(new_node_id(), ChatNodeKind::Group { name: group_name.to_owned() })
            .with_children(vec![original, ChatTreeNode::chat(forked_chat_id)]);
    })
}
