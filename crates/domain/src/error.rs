/// Shared error type used across all Pinmark crates.
///
/// Expected absence (unknown session, annotation, user, key) is never an
/// error; store operations return `Ok(None)` for it. This type carries the
/// exceptional cases only.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage: {0}")]
    Storage(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
