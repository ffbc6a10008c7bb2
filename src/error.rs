// Error types for octorank.
// Covers GitHub API errors, cache backend errors, and input validation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OctorankError {
    #[error("GitHub API error: {0}")]
    Api(#[from] reqwest::Error),

    #[error("no GitHub tokens configured")]
    MissingTokens,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, OctorankError>;
