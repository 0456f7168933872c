
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArborError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("No service handles type '{0}'")]
    Dispatch(String),
    #[error("Fetch error: {0}")]
    Fetch(String),
    #[error("Mapping error: {0}")]
    Mapping(String),
    #[error("Expression error: {0}")]
    Expression(String),
    #[error("Offline store error: {0}")]
    Offline(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Authorization error: {0}")]
    Authorization(String),
    #[error("Unknown object: {0}")]
    UnknownObject(u64),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, ArborError>;

/// Coalesced (shared) futures hand the same failure to every waiter,
/// which requires `Clone`; the error is shared behind an `Arc`.
pub type SharedError = Arc<ArborError>;

pub type SharedResult<T> = std::result::Result<T, SharedError>;

// Helper conversions
impl From<rusqlite::Error> for ArborError {
    fn from(e: rusqlite::Error) -> Self { Self::Offline(e.to_string()) }
}
