// Mutation name constants, as they appear in `{ namespace, name }` on the wire.

pub const NS_CHATS: &str = "chats";
pub const NS_TREES: &str = "trees";

// ── Chats ──────────────────────────────────────────────────────────
pub const CHATS_INIT: &str = "init";
pub const CHATS_SEND_USER_MESSAGE: &str = "sendUserMessage";
pub const CHATS_PUSH_ASSISTANT_MESSAGE_CHUNK: &str = "pushAssistantMessageChunk";
pub const CHATS_ABORT_CHAT: &str = "abortChat";
pub const CHATS_UPDATE_MESSAGE: &str = "updateMessage";
pub const CHATS_DELETE_LATER_MESSAGES: &str = "deleteLaterMessages";
pub const CHATS_FORK: &str = "fork";
pub const CHATS_RENAME: &str = "rename";
pub const CHATS_UPDATE: &str = "update";
pub const CHATS_DELETE: &str = "delete";
pub const CHATS_REQUEST_RESPONSE: &str = "requestResponse";

// ── Trees ──────────────────────────────────────────────────────────
pub const TREES_DELETE_GROUP: &str = "deleteGroup";
pub const TREES_CREATE_GROUP: &str = "createGroup";
pub const TREES_RENAME_GROUP: &str = "renameGroup";
pub const TREES_MOVE: &str = "move";
pub const TREES_REPLACE: &str = "replace";

/// Every `(namespace, name)` pair the runtime dispatches.
pub const IMPLEMENTED_MUTATIONS: &[(&str, &str)] = &[
    (NS_CHATS, CHATS_INIT),
    (NS_CHATS, CHATS_SEND_USER_MESSAGE),
    (NS_CHATS, CHATS_PUSH_ASSISTANT_MESSAGE_CHUNK),
    (NS_CHATS, CHATS_ABORT_CHAT),
    (NS_CHATS, CHATS_UPDATE_MESSAGE),
    (NS_CHATS, CHATS_DELETE_LATER_MESSAGES),
    (NS_CHATS, CHATS_FORK),
    (NS_CHATS, CHATS_RENAME),
    (NS_CHATS, CHATS_UPDATE),
    (NS_CHATS, CHATS_DELETE),
    (NS_CHATS, CHATS_REQUEST_RESPONSE),
    (NS_TREES, TREES_DELETE_GROUP),
    (NS_TREES, TREES_CREATE_GROUP),
    (NS_TREES, TREES_RENAME_GROUP),
    (NS_TREES, TREES_MOVE),
    (NS_TREES, TREES_REPLACE),
];
