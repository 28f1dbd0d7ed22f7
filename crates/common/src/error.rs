// Errors raised while decoding and executing mutations.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire code reported for a failed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationErrorCode {
    NotFound,
    Unauthorized,
    InvalidArgs,
    UnknownMutation,
    Internal,
}

impl MutationErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::InvalidArgs => "INVALID_ARGS",
            Self::UnknownMutation => "UNKNOWN_MUTATION",
            Self::Internal => "INTERNAL",
        }
    }
}

/// Opaque failure from a [`crate::mutators::Transaction`] backend.
#[derive(Debug, Error)]
#[error("store failure: {0}")]
pub struct StoreError(#[source] Box<dyn StdError + Send + Sync>);

impl StoreError {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(source.into())
    }
}

/// A mutation call could not be turned into a typed [`crate::mutators::Mutation`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown mutation `{namespace}.{name}`")]
    UnknownMutation { namespace: String, name: String },
    #[error("invalid arguments for `{mutation}`: {source}")]
    InvalidArgs {
        mutation: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure of a single mutation. Any variant aborts its transaction.
#[derive(Debug, Error)]
pub enum MutatorError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MutatorError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn unauthorized(what: impl Into<String>) -> Self {
        Self::Unauthorized(what.into())
    }

    pub fn code(&self) -> MutationErrorCode {
        match self {
            Self::NotFound(_) => MutationErrorCode::NotFound,
            Self::Unauthorized(_) => MutationErrorCode::Unauthorized,
            Self::Decode(DecodeError::UnknownMutation { .. }) => MutationErrorCode::UnknownMutation,
            Self::Decode(DecodeError::InvalidArgs { .. }) => MutationErrorCode::InvalidArgs,
            Self::Store(_) => MutationErrorCode::Internal,
        }
    }
}

pub type MutatorResult<T> = Result<T, MutatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_their_wire_names() {
        let err = MutatorError::from(DecodeError::UnknownMutation {
            namespace: "chats".into(),
            name: "explode".into(),
        });
        assert_eq!(err.code(), MutationErrorCode::UnknownMutation);
        assert_eq!(err.to_string(), "unknown mutation `chats.explode`");

        let code = serde_json::to_value(MutationErrorCode::NotFound).expect("serializes");
        assert_eq!(code, MutationErrorCode::NotFound.as_str());
    }

    #[test]
    fn store_errors_surface_as_internal() {
        let err = MutatorError::from(StoreError::new("disk on fire"));
        assert_eq!(err.code(), MutationErrorCode::Internal);
        assert!(err.to_string().contains("disk on fire"));
    }
}
