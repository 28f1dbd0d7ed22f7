// Core domain types shared across all Liqua crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat_tree::ChatTreeNode;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Millis {
    chrono::Utc::now().timestamp_millis()
}

/// A registered (or guest) user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub created_at: Millis,
}

/// A conversation. Its messages and its tree leaf go away with it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: Uuid,
    pub title: String,
    pub is_public: bool,
    pub owner_id: Uuid,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_instructions: Option<String>,
}

/// Partial update of a chat row. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatPatch {
    pub title: Option<String>,
    pub is_public: Option<bool>,
    /// `Some(None)` clears the instructions.
    pub custom_instructions: Option<Option<String>>,
    pub updated_at: Option<Millis>,
}

/// A single message inside a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Uuid>,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    /// Strict ordering key within a chat.
    pub created_at: Millis,
}

/// Partial update of a message row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub status: Option<MessageStatus>,
    pub created_at: Option<Millis>,
}

/// Who wrote a message. Serialized as `user` or `assistant/<model-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant { model: String },
}

const ASSISTANT_ROLE_PREFIX: &str = "assistant/";

impl Role {
    pub fn assistant(model: impl Into<String>) -> Self {
        Self::Assistant { model: model.into() }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    /// The model id for assistant roles.
    pub fn model(&self) -> Option<&str> {
        match self {
            Self::User => None,
            Self::Assistant { model } => Some(model),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => f.write_str("user"),
            Self::Assistant { model } => write!(f, "{ASSISTANT_ROLE_PREFIX}{model}"),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.to_string()
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == "user" {
            return Ok(Self::User);
        }
        match value.strip_prefix(ASSISTANT_ROLE_PREFIX) {
            Some(model) if !model.is_empty() => Ok(Self::assistant(model)),
            _ => Err(format!("invalid message role `{value}`")),
        }
    }
}

/// Message lifecycle. Everything but `Streaming` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Streaming,
    Complete,
    Aborted,
    Error,
}

impl MessageStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Complete => "complete",
            Self::Aborted => "aborted",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "streaming" => Some(Self::Streaming),
            "complete" => Some(Self::Complete),
            "aborted" => Some(Self::Aborted),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Streaming)
    }
}

/// A persisted folder/chat tree. Conflicts resolve on the whole document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatTree {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(default)]
    pub data: Vec<ChatTreeNode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_its_wire_form() {
        let role: Role = serde_json::from_str("\"assistant/llama3.2:3b\"").expect("role parses");
        assert_eq!(role, Role::assistant("llama3.2:3b"));
        assert_eq!(role.model(), Some("llama3.2:3b"));
        assert_eq!(serde_json::to_string(&Role::User).expect("serializes"), "\"user\"");
    }

    #[test]
    fn role_rejects_unknown_and_empty_models() {
        assert!(serde_json::from_str::<Role>("\"system\"").is_err());
        assert!(serde_json::from_str::<Role>("\"assistant/\"").is_err());
    }

    #[test]
    fn only_streaming_is_non_terminal() {
        assert!(!MessageStatus::Streaming.is_terminal());
        for status in [MessageStatus::Complete, MessageStatus::Aborted, MessageStatus::Error] {
            assert!(status.is_terminal());
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn message_serializes_with_camel_case_fields() {
        let message = Message {
            id: Uuid::nil(),
            chat_id: Uuid::nil(),
            author_id: None,
            role: Role::User,
            content: "hi".into(),
            status: MessageStatus::Complete,
            created_at: 42,
        };
        let value = serde_json::to_value(&message).expect("serializes");
        assert_eq!(value["chatId"], Uuid::nil().to_string());
        assert_eq!(value["createdAt"], 42);
        assert_eq!(value["status"], "complete");
        assert!(value.get("authorId").is_none());
    }
}
