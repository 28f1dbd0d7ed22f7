// Streaming accumulator: folds lifecycle-tagged chunks into one assistant message.
//
//   idle ──first──▶ streaming ──middle──▶ streaming
//                      │
//                      ├──last───────▶ complete
//                      ├──last-error─▶ error
//                      └──abort──────▶ aborted
//
// Terminal states win: anything arriving after finalization is dropped, which
// makes redelivered chunks and abort/last races harmless.

use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageStatus};

/// Lifecycle marker attached to every generated chunk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkType {
    First,
    Middle,
    Last,
    LastError,
}

impl ChunkType {
    /// Status of the message once this chunk is applied.
    pub const fn resulting_status(self) -> MessageStatus {
        match self {
            Self::First | Self::Middle => MessageStatus::Streaming,
            Self::Last => MessageStatus::Complete,
            Self::LastError => MessageStatus::Error,
        }
    }

    pub const fn is_final(self) -> bool {
        matches!(self, Self::Last | Self::LastError)
    }
}

/// What the store should do with an incoming chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkAction {
    /// No row yet: create one with this content and status.
    Create { content: String, status: MessageStatus },
    /// Append to the existing row; `status` is set only when it changes.
    Append { chunk: String, status: Option<MessageStatus> },
    /// The chunk must not touch the row.
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The message already reached a terminal status.
    Finalized(MessageStatus),
    /// A second `first` chunk for a row that is already streaming.
    DuplicateFirst,
}

/// Decide how `chunk` of kind `chunk_type` applies on top of `existing`.
pub fn plan_chunk(existing: Option<&Message>, chunk: &str, chunk_type: ChunkType) -> ChunkAction {
    let Some(message) = existing else {
        return ChunkAction::Create {
            content: chunk.to_owned(),
            status: chunk_type.resulting_status(),
        };
    };

    if message.status.is_terminal() {
        return ChunkAction::Drop(DropReason::Finalized(message.status));
    }
    if chunk_type == ChunkType::First {
        return ChunkAction::Drop(DropReason::DuplicateFirst);
    }

    let status = chunk_type.is_final().then(|| chunk_type.resulting_status());
    ChunkAction::Append { chunk: chunk.to_owned(), status }
}

/// Status an aborted chat leaves its message in, or `None` if untouched.
pub fn abort_transition(message: &Message) -> Option<MessageStatus> {
    (message.status == MessageStatus::Streaming).then_some(MessageStatus::Aborted)
}
