use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Failure taxonomy for the client core. An inaccessible row and an absent row
/// both surface as `NotFound`: row-level policies live on the backend and the
/// client cannot tell the two apart.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("assistant reply contained no parseable payload")]
    UnparseableResponse,

    #[error("no authenticated session")]
    SignedOut,

    #[error("session disposed")]
    Disposed,

    #[error("configuration: {0}")]
    Config(String),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("assistant request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed row: {0}")]
    Decode(#[from] serde_json::Error),
}
