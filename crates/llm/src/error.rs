// Text generation errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider payload: {0}")]
    Decode(String),
    #[error("provider reported an error: {0}")]
    Provider(String),
    #[error("{0}")]
    MissingApiKey(String),
    #[error("invalid provider url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("chunk sink rejected a chunk: {0}")]
    Sink(String),
}

impl GenerationError {
    pub fn sink(err: impl std::fmt::Display) -> Self {
        Self::Sink(err.to_string())
    }
}
