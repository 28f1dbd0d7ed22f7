// `trees.*` mutations: structural edits of an owner's chat tree.
//
// Each edit is a read-modify-write of the whole document. Unknown node ids
// leave the tree as it was.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{chats, MutationContext, Transaction};
use crate::chat_tree::{ChatNodeKind, ChatTreeNode, ChatTreeSnapshot};
use crate::error::{MutatorError, MutatorResult};
use crate::types::ChatTree;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropPosition {
    Before,
    After,
    /// Nest inside the target as its last child.
    On,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteGroupArgs {
    pub chat_tree_id: Uuid,
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupArgs {
    pub chat_tree_id: Uuid,
    pub group_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameGroupArgs {
    pub chat_tree_id: Uuid,
    pub group_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveNodesArgs {
    pub chat_tree_id: Uuid,
    /// Selection in drag order.
    pub node_ids: Vec<String>,
    pub target_id: String,
    pub position: DropPosition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceTreeArgs {
    pub chat_tree_id: Uuid,
    pub data: Vec<ChatTreeNode>,
}

fn owned_tree<T>(tx: &T, ctx: &MutationContext, tree_id: Uuid) -> MutatorResult<ChatTree>
where
    T: Transaction + ?Sized,
{
    let tree = tx
        .chat_tree(tree_id)?
        .ok_or_else(|| MutatorError::not_found(format!("chat tree {tree_id}")))?;
    if tree.owner_id != ctx.user_id {
        return Err(MutatorError::unauthorized(format!("chat tree {tree_id}")));
    }
    Ok(tree)
}

/// Load, edit and write back one tree. Unchanged trees are not rewritten.
fn edit_tree<T, F>(tx: &mut T, ctx: &MutationContext, tree_id: Uuid, edit: F) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
    F: FnOnce(&ChatTreeSnapshot) -> ChatTreeSnapshot,
{
    let tree = owned_tree(tx, ctx, tree_id)?;
    let before = ChatTreeSnapshot::new(tree.data.clone());
    let after = edit(&before);
    if after == before {
        return Ok(());
    }
    tx.upsert_chat_tree(&ChatTree { data: after.into_vec(), ..tree })?;
    Ok(())
}

/// Delete every chat under the group, then the group itself.
pub fn delete_group<T>(tx: &mut T, ctx: &MutationContext, args: &DeleteGroupArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    let tree = owned_tree(tx, ctx, args.chat_tree_id)?;
    let snapshot = ChatTreeSnapshot::new(tree.data.clone());
    let Some(group) = snapshot.find_node_by_id(&args.group_id) else {
        return Ok(());
    };

    let chat_ids = group.referenced_chats();
    for chat_id in &chat_ids {
        match tx.chat(*chat_id)? {
            Some(chat) if chat.owner_id == ctx.user_id => tx.delete_chat(chat.id)?,
            Some(_) => tracing::warn!(%chat_id, "skipping chat owned by another user"),
            None => {}
        }
    }

    tx.upsert_chat_tree(&ChatTree { data: snapshot.remove_node(&args.group_id).into_vec(), ..tree })?;
    // Leaves for the same chats may live in other trees too.
    chats::detach_chats(tx, ctx, &chat_ids)
}

pub fn create_group<T>(tx: &mut T, ctx: &MutationContext, args: &CreateGroupArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    edit_tree(tx, ctx, args.chat_tree_id, |snapshot| {
        if snapshot.contains(&args.group_id) {
            return snapshot.clone();
        }
        let group = ChatTreeNode::new(args.group_id.clone(), ChatNodeKind::Group { name: args.name.clone() })
            .with_children(Vec::new());
        match args.before_id.as_deref() {
            Some(before_id) if snapshot.contains(before_id) => snapshot.insert_before(before_id, group),
            _ => snapshot.prepend(group),
        }
    })
}

pub fn rename_group<T>(tx: &mut T, ctx: &MutationContext, args: &RenameGroupArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    edit_tree(tx, ctx, args.chat_tree_id, |snapshot| {
        snapshot.update_node(&args.group_id, |node| {
            if let ChatNodeKind::Group { name } = &mut node.data {
                name.clone_from(&args.name);
            }
        })
    })
}

/// Drag-and-drop. Drops `on` anything but a group are ignored.
pub fn move_nodes<T>(tx: &mut T, ctx: &MutationContext, args: &MoveNodesArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    edit_tree(tx, ctx, args.chat_tree_id, |snapshot| match args.position {
        DropPosition::Before => snapshot.move_before(&args.target_id, &args.node_ids),
        DropPosition::After => snapshot.move_after(&args.target_id, &args.node_ids),
        DropPosition::On if snapshot.accepts_drop(&args.target_id) => args
            .node_ids
            .iter()
            .fold(snapshot.clone(), |tree, id| tree.move_on(id, &args.target_id)),
        DropPosition::On => snapshot.clone(),
    })
}

/// Overwrite the whole document. Creates the tree on first write.
pub fn replace<T>(tx: &mut T, ctx: &MutationContext, args: &ReplaceTreeArgs) -> MutatorResult<()>
where
    T: Transaction + ?Sized,
{
    match tx.chat_tree(args.chat_tree_id)? {
        Some(existing) if existing.owner_id != ctx.user_id => {
            Err(MutatorError::unauthorized(format!("chat tree {}", args.chat_tree_id)))
        }
        _ => {
            tx.upsert_chat_tree(&ChatTree {
                id: args.chat_tree_id,
                owner_id: ctx.user_id,
                data: args.data.clone(),
            })?;
            Ok(())
        }
    }
}
