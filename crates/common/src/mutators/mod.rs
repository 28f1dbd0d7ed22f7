// Mutation runtime: every business operation is written once against the
// `Transaction` capability and executed twice, optimistically on the client
// replica and authoritatively on the server.

pub mod chats;
pub mod fork;
pub mod names;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DecodeError, MutatorError, MutatorResult, StoreError};
use crate::types::{Chat, ChatPatch, ChatTree, Message, MessagePatch, MessageStatus, Millis};

pub use chats::{
    AbortChatArgs, DeleteChatArgs, DeleteLaterMessagesArgs, InitArgs, PushAssistantMessageChunkArgs,
    RenameChatArgs, RequestResponseArgs, SendUserMessageArgs, UpdateChatArgs, UpdateMessageArgs,
};
pub use fork::ForkArgs;
pub use trees::{
    CreateGroupArgs, DeleteGroupArgs, DropPosition, MoveNodesArgs, RenameGroupArgs,
    ReplaceTreeArgs,
};

/// Default tolerated distance between a client timestamp and server time.
pub const DEFAULT_TIMESTAMP_SKEW_MS: i64 = 10_000;

/// Where a mutation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Optimistic run against the local replica; the result is provisional.
    Client,
    /// Authoritative run against the store of record.
    Server,
}

/// Ambient facts a mutation may consult besides its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationContext {
    pub location: Location,
    pub user_id: Uuid,
    pub now: Millis,
    pub skew_ms: i64,
}

impl MutationContext {
    pub fn client(user_id: Uuid) -> Self {
        Self {
            location: Location::Client,
            user_id,
            now: crate::types::now_millis(),
            skew_ms: DEFAULT_TIMESTAMP_SKEW_MS,
        }
    }

    pub fn server(user_id: Uuid, skew_ms: i64) -> Self {
        Self {
            location: Location::Server,
            user_id,
            now: crate::types::now_millis(),
            skew_ms,
        }
    }

    /// Pin the clock; used by tests and by replays.
    pub fn at(mut self, now: Millis) -> Self {
        self.now = now;
        self
    }

    /// Resolve a client-proposed timestamp.
    ///
    /// Clients keep their own value. The server keeps it only within the skew
    /// window, so small drift never reorders a chat while fabricated history
    /// is replaced by server time.
    pub fn safe_timestamp(&self, proposed: Millis) -> Millis {
        match self.location {
            Location::Client => proposed,
            Location::Server if (proposed - self.now).abs() <= self.skew_ms => proposed,
            Location::Server => self.now,
        }
    }

    pub fn is_server(&self) -> bool {
        self.location == Location::Server
    }
}

/// Transaction-scoped data access. Every mutation touches state only through
/// this trait; the in-memory replica and the SQLite store both implement it.
///
/// Reads return snapshots. Missing rows are `Ok(None)`, never errors.
pub trait Transaction {
    fn chat(&self, id: Uuid) -> Result<Option<Chat>, StoreError>;
    fn insert_chat(&mut self, chat: &Chat) -> Result<(), StoreError>;
    fn update_chat(&mut self, id: Uuid, patch: &ChatPatch) -> Result<(), StoreError>;
    /// Removes the chat and every message in it.
    fn delete_chat(&mut self, id: Uuid) -> Result<(), StoreError>;

    fn message(&self, id: Uuid) -> Result<Option<Message>, StoreError>;
    /// Messages of one chat ordered by `created_at`.
    fn messages(&self, chat_id: Uuid) -> Result<Vec<Message>, StoreError>;
    fn insert_message(&mut self, message: &Message) -> Result<(), StoreError>;
    fn update_message(&mut self, id: Uuid, patch: &MessagePatch) -> Result<(), StoreError>;
    /// Append `chunk` to the stored content without rewriting it.
    fn append_message_content(
        &mut self,
        id: Uuid,
        chunk: &str,
        status: Option<MessageStatus>,
    ) -> Result<(), StoreError>;
    fn delete_message(&mut self, id: Uuid) -> Result<(), StoreError>;

    fn chat_tree(&self, id: Uuid) -> Result<Option<ChatTree>, StoreError>;
    fn chat_trees_for_owner(&self, owner_id: Uuid) -> Result<Vec<ChatTree>, StoreError>;
    /// Whole-document write; the last writer wins.
    fn upsert_chat_tree(&mut self, tree: &ChatTree) -> Result<(), StoreError>;
}

/// Work a mutation asks for once its transaction has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Start server-side generation of an assistant reply.
    GenerateResponse { chat_id: Uuid, message_id: Uuid, model: String },
    /// Stop any server-side generation running for the chat.
    CancelGeneration { chat_id: Uuid },
}

impl SideEffect {
    /// Fatal effects fail the whole push request when they fail.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GenerateResponse { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateResponse { .. } => "generate-response",
            Self::CancelGeneration { .. } => "cancel-generation",
        }
    }
}

/// A decoded mutation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Init(InitArgs),
    SendUserMessage(SendUserMessageArgs),
    PushAssistantMessageChunk(PushAssistantMessageChunkArgs),
    AbortChat(AbortChatArgs),
    UpdateMessage(UpdateMessageArgs),
    DeleteLaterMessages(DeleteLaterMessagesArgs),
    Fork(ForkArgs),
    Rename(RenameChatArgs),
    UpdateChat(UpdateChatArgs),
    DeleteChat(DeleteChatArgs),
    RequestResponse(RequestResponseArgs),
    DeleteGroup(DeleteGroupArgs),
    CreateGroup(CreateGroupArgs),
    RenameGroup(RenameGroupArgs),
    MoveNodes(MoveNodesArgs),
    ReplaceTree(ReplaceTreeArgs),
}

fn parse<T: DeserializeOwned>(namespace: &str, name: &str, args: Value) -> Result<T, DecodeError> {
    serde_json::from_value(args)
        .map_err(|source| DecodeError::InvalidArgs { mutation: format!("{namespace}.{name}"), source })
}

impl Mutation {
    /// Decode `{ namespace, name, args }` into a typed mutation.
    pub fn decode(namespace: &str, name: &str, args: Value) -> Result<Self, DecodeError> {
        use names::*;

        let mutation = match (namespace, name) {
            (NS_CHATS, CHATS_INIT) => Self::Init(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_SEND_USER_MESSAGE) => Self::SendUserMessage(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_PUSH_ASSISTANT_MESSAGE_CHUNK) => {
                Self::PushAssistantMessageChunk(parse(namespace, name, args)?)
            }
            (NS_CHATS, CHATS_ABORT_CHAT) => Self::AbortChat(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_UPDATE_MESSAGE) => Self::UpdateMessage(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_DELETE_LATER_MESSAGES) => {
                Self::DeleteLaterMessages(parse(namespace, name, args)?)
            }
            (NS_CHATS, CHATS_FORK) => Self::Fork(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_RENAME) => Self::Rename(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_UPDATE) => Self::UpdateChat(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_DELETE) => Self::DeleteChat(parse(namespace, name, args)?),
            (NS_CHATS, CHATS_REQUEST_RESPONSE) => Self::RequestResponse(parse(namespace, name, args)?),
            (NS_TREES, TREES_DELETE_GROUP) => Self::DeleteGroup(parse(namespace, name, args)?),
            (NS_TREES, TREES_CREATE_GROUP) => Self::CreateGroup(parse(namespace, name, args)?),
            (NS_TREES, TREES_RENAME_GROUP) => Self::RenameGroup(parse(namespace, name, args)?),
            (NS_TREES, TREES_MOVE) => Self::MoveNodes(parse(namespace, name, args)?),
            (NS_TREES, TREES_REPLACE) => Self::ReplaceTree(parse(namespace, name, args)?),
            _ => {
                return Err(DecodeError::UnknownMutation {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                })
            }
        };
        Ok(mutation)
    }

    /// `(namespace, name)` for the wire.
    pub fn key(&self) -> (&'static str, &'static str) {
        use names::*;

        match self {
            Self::Init(_) => (NS_CHATS, CHATS_INIT),
            Self::SendUserMessage(_) => (NS_CHATS, CHATS_SEND_USER_MESSAGE),
            Self::PushAssistantMessageChunk(_) => (NS_CHATS, CHATS_PUSH_ASSISTANT_MESSAGE_CHUNK),
            Self::AbortChat(_) => (NS_CHATS, CHATS_ABORT_CHAT),
            Self::UpdateMessage(_) => (NS_CHATS, CHATS_UPDATE_MESSAGE),
            Self::DeleteLaterMessages(_) => (NS_CHATS, CHATS_DELETE_LATER_MESSAGES),
            Self::Fork(_) => (NS_CHATS, CHATS_FORK),
            Self::Rename(_) => (NS_CHATS, CHATS_RENAME),
            Self::UpdateChat(_) => (NS_CHATS, CHATS_UPDATE),
            Self::DeleteChat(_) => (NS_CHATS, CHATS_DELETE),
            Self::RequestResponse(_) => (NS_CHATS, CHATS_REQUEST_RESPONSE),
            Self::DeleteGroup(_) => (NS_TREES, TREES_DELETE_GROUP),
            Self::CreateGroup(_) => (NS_TREES, TREES_CREATE_GROUP),
            Self::RenameGroup(_) => (NS_TREES, TREES_RENAME_GROUP),
            Self::MoveNodes(_) => (NS_TREES, TREES_MOVE),
            Self::ReplaceTree(_) => (NS_TREES, TREES_REPLACE),
        }
    }

    /// The argument object for the wire.
    pub fn args(&self) -> Result<Value, serde_json::Error> {
        fn encode<T: Serialize>(args: &T) -> Result<Value, serde_json::Error> {
            serde_json::to_value(args)
        }

        match self {
            Self::Init(args) => encode(args),
            Self::SendUserMessage(args) => encode(args),
            Self::PushAssistantMessageChunk(args) => encode(args),
            Self::AbortChat(args) => encode(args),
            Self::UpdateMessage(args) => encode(args),
            Self::DeleteLaterMessages(args) => encode(args),
            Self::Fork(args) => encode(args),
            Self::Rename(args) => encode(args),
            Self::UpdateChat(args) => encode(args),
            Self::DeleteChat(args) => encode(args),
            Self::RequestResponse(args) => encode(args),
            Self::DeleteGroup(args) => encode(args),
            Self::CreateGroup(args) => encode(args),
            Self::RenameGroup(args) => encode(args),
            Self::MoveNodes(args) => encode(args),
            Self::ReplaceTree(args) => encode(args),
        }
    }

    /// Chat the mutation is about, when it is about exactly one.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::Init(args) => Some(args.id),
            Self::SendUserMessage(args) => Some(args.chat_id),
            Self::PushAssistantMessageChunk(args) => Some(args.chat_id),
            Self::AbortChat(args) => Some(args.chat_id),
            Self::Fork(args) => Some(args.chat_id),
            Self::Rename(args) => Some(args.chat_id),
            Self::UpdateChat(args) => Some(args.chat_id),
            Self::DeleteChat(args) => Some(args.chat_id),
            Self::RequestResponse(args) => Some(args.chat_id),
            _ => None,
        }
    }
}

/// Run `mutation` against `tx`, returning the side effects it declared.
///
/// Side effects are only declared by authoritative runs; the client never
/// starts server work on its own.
pub fn execute<T>(tx: &mut T, ctx: &MutationContext, mutation: &Mutation) -> MutatorResult<Vec<SideEffect>>
where
    T: Transaction + ?Sized,
{
    let mut effects = Vec::new();
    match mutation {
        Mutation::Init(args) => chats::init(tx, ctx, args)?,
        Mutation::SendUserMessage(args) => chats::send_user_message(tx, ctx, args)?,
        Mutation::PushAssistantMessageChunk(args) => chats::push_assistant_message_chunk(tx, ctx, args)?,
        Mutation::AbortChat(args) => {
            chats::abort_chat(tx, ctx, args)?;
            if ctx.is_server() && args.message_id.is_none() {
                effects.push(SideEffect::CancelGeneration { chat_id: args.chat_id });
            }
        }
        Mutation::UpdateMessage(args) => chats::update_message(tx, ctx, args)?,
        Mutation::DeleteLaterMessages(args) => chats::delete_later_messages(tx, ctx, args)?,
        Mutation::Fork(args) => fork::fork(tx, ctx, args)?,
        Mutation::Rename(args) => chats::rename(tx, ctx, args)?,
        Mutation::UpdateChat(args) => chats::update(tx, ctx, args)?,
        Mutation::DeleteChat(args) => chats::delete(tx, ctx, args)?,
        Mutation::RequestResponse(args) => {
            chats::owned_chat(tx, ctx, args.chat_id)?;
            if ctx.is_server() {
                effects.push(SideEffect::GenerateResponse {
                    chat_id: args.chat_id,
                    message_id: args.message_id,
                    model: args.model.clone(),
                });
            }
        }
        Mutation::DeleteGroup(args) => trees::delete_group(tx, ctx, args)?,
        Mutation::CreateGroup(args) => trees::create_group(tx, ctx, args)?,
        Mutation::RenameGroup(args) => trees::rename_group(tx, ctx, args)?,
        Mutation::MoveNodes(args) => trees::move_nodes(tx, ctx, args)?,
        Mutation::ReplaceTree(args) => trees::replace(tx, ctx, args)?,
    }
    Ok(effects)
}
