// Push/pull wire types shared by the client transport and the server gateway.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DecodeError, MutationErrorCode, MutatorError};
use crate::mutators::Mutation;
use crate::types::{Chat, ChatTree, Message, Millis, User};

/// One queued mutation, as the client sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MutationCall {
    /// Per-client, strictly increasing.
    pub id: i64,
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
    pub timestamp: Millis,
}

impl MutationCall {
    pub fn new(id: i64, mutation: &Mutation, timestamp: Millis) -> Result<Self, serde_json::Error> {
        let (namespace, name) = mutation.key();
        Ok(Self {
            id,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
            args: mutation.args()?,
            timestamp,
        })
    }

    pub fn decode(&self) -> Result<Mutation, DecodeError> {
        Mutation::decode(&self.namespace, &self.name, self.args.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub client_id: String,
    pub mutations: Vec<MutationCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Highest mutation id the server has processed for this client.
    pub last_mutation_id: i64,
    pub mutations: Vec<MutationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationResult {
    pub id: i64,
    pub result: MutationOutcome,
}

impl MutationResult {
    pub fn ok(id: i64) -> Self {
        Self { id, result: MutationOutcome::Ok(Applied {}) }
    }

    pub fn error(id: i64, err: &MutatorError) -> Self {
        Self {
            id,
            result: MutationOutcome::Error {
                error: MutationErrorBody { code: err.code(), message: err.to_string() },
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, MutationOutcome::Ok(_))
    }
}

/// `{}` on success, `{ "error": { code, message } }` on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MutationOutcome {
    Error { error: MutationErrorBody },
    Ok(Applied),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Applied {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationErrorBody {
    pub code: MutationErrorCode,
    pub message: String,
}

/// Authoritative view of everything a user can see, plus the client's
/// processed-mutation watermark.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    pub last_mutation_id: i64,
    pub chats: Vec<Chat>,
    pub messages: Vec<Message>,
    pub chat_trees: Vec<ChatTree>,
}

/// Response of the guest sign-in endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuestSession {
    pub user: User,
    pub token: String,
}

/// Query string of the replica pull endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaQuery {
    pub client_id: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::mutators::AbortChatArgs;

    #[test]
    fn outcomes_serialize_as_empty_object_or_error() {
        let ok = serde_json::to_value(MutationResult::ok(3)).expect("serializes");
        assert_eq!(ok, json!({ "id": 3, "result": {} }));

        let err = MutationResult::error(4, &MutatorError::not_found("chat x"));
        let value = serde_json::to_value(&err).expect("serializes");
        assert_eq!(value["result"]["error"]["code"], "NOT_FOUND");
        assert_eq!(value["result"]["error"]["message"], "not found: chat x");

        let back: MutationResult = serde_json::from_value(value).expect("parses");
        assert!(!back.is_ok());
        let ok_back: MutationResult = serde_json::from_value(ok).expect("parses");
        assert!(ok_back.is_ok());
    }

    #[test]
    fn mutation_call_carries_the_typed_mutation() {
        let chat_id = Uuid::new_v4();
        let mutation = Mutation::AbortChat(AbortChatArgs::chat(chat_id));
        let call = MutationCall::new(9, &mutation, 1_000).expect("encodes");

        let wire = serde_json::to_value(&call).expect("serializes");
        assert_eq!(wire["namespace"], "chats");
        assert_eq!(wire["name"], "abortChat");
        assert_eq!(wire["args"]["chatId"], chat_id.to_string());

        let parsed: MutationCall = serde_json::from_value(wire).expect("parses");
        assert_eq!(parsed.decode().expect("decodes"), mutation);
    }

    #[test]
    fn push_request_uses_camel_case() {
        let request: PushRequest = serde_json::from_value(json!({
            "clientId": "c-1",
            "mutations": []
        }))
        .expect("parses");
        assert_eq!(request.client_id, "c-1");
    }
}
