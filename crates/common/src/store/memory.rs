// In-memory `Transaction` backend used by the client replica and by tests.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::error::StoreError;
use crate::mutators::Transaction;
use crate::types::{Chat, ChatPatch, ChatTree, Message, MessagePatch, MessageStatus};

/// Plain maps of rows. Cloning is cheap enough for replica-sized data, which
/// is what [`MemoryStore::transact`] relies on for all-or-nothing writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    chats: BTreeMap<Uuid, Chat>,
    messages: BTreeMap<Uuid, Message>,
    trees: BTreeMap<Uuid, ChatTree>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(chats: Vec<Chat>, messages: Vec<Message>, trees: Vec<ChatTree>) -> Self {
        Self {
            chats: chats.into_iter().map(|chat| (chat.id, chat)).collect(),
            messages: messages.into_iter().map(|message| (message.id, message)).collect(),
            trees: trees.into_iter().map(|tree| (tree.id, tree)).collect(),
        }
    }

    /// Run `f` against a scratch copy and keep its writes only if it succeeds.
    pub fn transact<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut MemoryStore) -> Result<R, E>,
    {
        let mut draft = self.clone();
        let result = f(&mut draft)?;
        *self = draft;
        Ok(result)
    }

    pub fn chats(&self) -> impl Iterator<Item = &Chat> {
        self.chats.values()
    }

    pub fn all_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn trees(&self) -> impl Iterator<Item = &ChatTree> {
        self.trees.values()
    }

    pub fn get_chat(&self, id: Uuid) -> Option<&Chat> {
        self.chats.get(&id)
    }

    pub fn get_message(&self, id: Uuid) -> Option<&Message> {
        self.messages.get(&id)
    }

    pub fn get_tree(&self, id: Uuid) -> Option<&ChatTree> {
        self.trees.get(&id)
    }

    /// Messages of a chat in conversation order.
    pub fn chat_messages(&self, chat_id: Uuid) -> Vec<&Message> {
        let mut out: Vec<&Message> =
            self.messages.values().filter(|message| message.chat_id == chat_id).collect();
        out.sort_by_key(|message| message.created_at);
        out
    }
}

fn missing(kind: &str, id: Uuid) -> StoreError {
    StoreError::new(format!("{kind} {id} does not exist"))
}

impl Transaction for MemoryStore {
    fn chat(&self, id: Uuid) -> Result<Option<Chat>, StoreError> {
        Ok(self.chats.get(&id).cloned())
    }

    fn insert_chat(&mut self, chat: &Chat) -> Result<(), StoreError> {
        if self.chats.contains_key(&chat.id) {
            return Err(StoreError::new(format!("chat {} already exists", chat.id)));
        }
        self.chats.insert(chat.id, chat.clone());
        Ok(())
    }

    fn update_chat(&mut self, id: Uuid, patch: &ChatPatch) -> Result<(), StoreError> {
        let chat = self.chats.get_mut(&id).ok_or_else(|| missing("chat", id))?;
        if let Some(title) = &patch.title {
            chat.title.clone_from(title);
        }
        if let Some(is_public) = patch.is_public {
            chat.is_public = is_public;
        }
        if let Some(custom_instructions) = &patch.custom_instructions {
            chat.custom_instructions.clone_from(custom_instructions);
        }
        if let Some(updated_at) = patch.updated_at {
            chat.updated_at = updated_at;
        }
        Ok(())
    }

    fn delete_chat(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.chats.remove(&id);
        self.messages.retain(|_, message| message.chat_id != id);
        Ok(())
    }

    fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        Ok(self.messages.get(&id).cloned())
    }

    fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError> {
        Ok(self.chat_messages(chat_id).into_iter().cloned().collect())
    }

    fn insert_message(&mut self, message: &Message) -> Result<(), StoreError> {
        if !self.chats.contains_key(&message.chat_id) {
            return Err(missing("chat", message.chat_id));
        }
        if self.messages.contains_key(&message.id) {
            return Err(StoreError::new(format!("message {} already exists", message.id)));
        }
        self.messages.insert(message.id, message.clone());
        Ok(())
    }

    fn update_message(&mut self, id: Uuid, patch: &MessagePatch) -> Result<(), StoreError> {
        let message = self.messages.get_mut(&id).ok_or_else(|| missing("message", id))?;
        if let Some(content) = &patch.content {
            message.content.clone_from(content);
        }
        if let Some(status) = patch.status {
            message.status = status;
        }
        if let Some(created_at) = patch.created_at {
            message.created_at = created_at;
        }
        Ok(())
    }

    fn append_message_content(
        &mut self,
        id: Uuid,
        chunk: &str,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError> {
        let message = self.messages.get_mut(&id).ok_or_else(|| missing("message", id))?;
        message.content.push_str(chunk);
        if let Some(status) = status {
            message.status = status;
        }
        Ok(())
    }

    fn delete_message(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.messages.remove(&id);
        Ok(())
    }

    fn chat_tree(&self, id: Uuid) -> Result<Option<ChatTree>, StoreError> {
        Ok(self.trees.get(&id).cloned())
    }

    fn chat_trees_for_owner(&self, owner_id: Uuid) -> Result<Vec<ChatTree>, StoreError> {
        Ok(self.trees.values().filter(|tree| tree.owner_id == owner_id).cloned().collect())
    }

    fn upsert_chat_tree(&mut self, tree: &ChatTree) -> Result<(), StoreError> {
        self.trees.insert(tree.id, tree.clone());
        Ok(())
    }
}
