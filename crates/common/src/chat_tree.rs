// Chat sidebar tree: folders ("groups") holding chat leaves.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::{OrderedTree, TreeNode};

/// Payload of a chat-tree node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChatNodeKind {
    Group {
        name: String,
    },
    #[serde(rename_all = "camelCase")]
    Chat {
        chat_id: Uuid,
    },
}

pub type ChatTreeNode = TreeNode<ChatNodeKind>;
pub type ChatTreeSnapshot = OrderedTree<ChatNodeKind>;

/// Fresh random node id.
pub fn new_node_id() -> String {
    Uuid::new_v4().to_string()
}

impl ChatTreeNode {
    /// A leaf pointing at `chat_id`, with a fresh node id.
    pub fn chat(chat_id: Uuid) -> Self {
        TreeNode::new(new_node_id(), ChatNodeKind::Chat { chat_id })
    }

    /// An empty group with a fresh node id.
    pub fn group(name: impl Into<String>) -> Self {
        TreeNode::new(new_node_id(), ChatNodeKind::Group { name: name.into() })
            .with_children(Vec::new())
    }

    pub fn is_group(&self) -> bool {
        matches!(self.data, ChatNodeKind::Group { .. })
    }

    pub fn chat_id(&self) -> Option<Uuid> {
        match self.data {
            ChatNodeKind::Chat { chat_id } => Some(chat_id),
            ChatNodeKind::Group { .. } => None,
        }
    }

    /// Every chat referenced by this node or its descendants, pre-order.
    pub fn referenced_chats(&self) -> Vec<Uuid> {
        let mut out = Vec::new();
        collect_chat_ids(std::slice::from_ref(self), &mut out);
        out
    }
}

fn collect_chat_ids(nodes: &[ChatTreeNode], out: &mut Vec<Uuid>) {
    for node in nodes {
        if let Some(chat_id) = node.chat_id() {
            out.push(chat_id);
        }
        collect_chat_ids(node.children(), out);
    }
}

impl ChatTreeSnapshot {
    /// The leaf referencing `chat_id`, if any.
    pub fn find_chat_leaf(&self, chat_id: Uuid) -> Option<&ChatTreeNode> {
        self.find_node(|node| node.chat_id() == Some(chat_id))
    }

    pub fn references_chat(&self, chat_id: Uuid) -> bool {
        self.find_chat_leaf(chat_id).is_some()
    }

    /// Chat ids in display order.
    pub fn chat_ids(&self) -> Vec<Uuid> {
        let mut out = Vec::new();
        collect_chat_ids(self.nodes(), &mut out);
        out
    }

    /// Only groups accept drops "on" them; chats never nest.
    pub fn accepts_drop(&self, target_id: &str) -> bool {
        self.find_node_by_id(target_id).is_some_and(ChatTreeNode::is_group)
    }

    /// Drop every leaf that references `chat_id`.
    pub fn without_chat(&self, chat_id: Uuid) -> Self {
        let leaf_ids: Vec<String> = self
            .filter_nodes(|node| node.chat_id() == Some(chat_id))
            .into_iter()
            .map(|node| node.id.clone())
            .collect();
        leaf_ids.iter().fold(self.clone(), |tree, id| tree.remove_node(id))
    }
}
