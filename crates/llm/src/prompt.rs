// Prompt assembly: system directives plus the visible conversation.

use serde::{Deserialize, Serialize};

use liqua_common::types::{Message, MessageStatus, Role};

const CORE_DIRECTIVES: &[&str] = &[
    "You are a helpful, neutral, and concise AI assistant called LiquaChat (Liqua, for short).",
    "<core-directives>",
    "- CRITICAL: you MUST format all responses using Markdown",
    "- CRITICAL: for all code blocks, you MUST specify the programming language immediately after the backticks to enable syntax highlighting. Example: ```javascript ... ```",
    "- Do not use LaTeX for mathematical expressions.",
    "- Prioritize accuracy, clarity, and safety in all your answers.",
    "- Do not use emojis unless they are explicitly requested.",
    "- Be concise and to the point by default. Provide more details only when explicitly requested.",
    "</core-directives>",
];

const CUSTOM_INSTRUCTIONS_LEAD: &str =
    "You MUST also follow the following instructions, that take priority over the core directives above";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<&Role> for PromptRole {
    fn from(role: &Role) -> Self {
        if role.is_assistant() {
            Self::Assistant
        } else {
            Self::User
        }
    }
}

/// One entry of the provider-facing conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// The system prompt, with custom instructions appended when present.
pub fn system_prompt(custom_instructions: Option<&str>) -> String {
    let mut lines: Vec<&str> = CORE_DIRECTIVES.to_vec();
    if let Some(custom) = custom_instructions.map(str::trim).filter(|text| !text.is_empty()) {
        lines.extend([CUSTOM_INSTRUCTIONS_LEAD, "<instructions>", custom, "</instructions>"]);
    }
    lines.join("\n")
}

/// Provider conversation for `history`. Replies still streaming are left out.
pub fn build_prompt(history: &[Message], custom_instructions: Option<&str>) -> Vec<PromptMessage> {
    std::iter::once(PromptMessage::new(PromptRole::System, system_prompt(custom_instructions)))
        .chain(
            history
                .iter()
                .filter(|message| message.status != MessageStatus::Streaming)
                .map(|message| PromptMessage::new(PromptRole::from(&message.role), message.content.clone())),
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn message(role: Role, content: &str, status: MessageStatus) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::nil(),
            author_id: None,
            role,
            content: content.into(),
            status,
            created_at: 0,
        }
    }

    #[test]
    fn custom_instructions_are_wrapped_after_the_directives() {
        let prompt = system_prompt(Some("  Answer in French. "));
        assert!(prompt.starts_with("You are a helpful"));
        assert!(prompt.ends_with("<instructions>\nAnswer in French.\n</instructions>"));
        assert!(prompt.contains("</core-directives>\nYou MUST also follow"));
    }

    #[test]
    fn blank_instructions_are_ignored() {
        assert_eq!(system_prompt(Some("   ")), system_prompt(None));
        assert!(!system_prompt(None).contains("<instructions>"));
    }

    #[test]
    fn roles_map_to_user_or_assistant() {
        let history = vec![
            message(Role::User, "hi", MessageStatus::Complete),
            message(Role::assistant("llama3.2"), "hello", MessageStatus::Complete),
            message(Role::assistant("llama3.2"), "cut", MessageStatus::Aborted),
            message(Role::assistant("llama3.2"), "", MessageStatus::Streaming),
        ];
        let roles: Vec<PromptRole> = build_prompt(&history, None).iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            [PromptRole::System, PromptRole::User, PromptRole::Assistant, PromptRole::Assistant]
        );
    }

    #[test]
    fn prompt_roles_serialize_lowercase() {
        let json = serde_json::to_value(PromptMessage::new(PromptRole::Assistant, "x")).expect("serializes");
        assert_eq!(json["role"], "assistant");
    }
}
