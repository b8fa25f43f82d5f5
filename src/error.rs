use thiserror::Error;

use crate::repository::StoreError;

pub type ConsentResult<T> = Result<T, ConsentError>;

/// Errors returned to callers of the consent engine.
///
/// The caller layer owns the mapping to transport status codes.
#[derive(Error, Debug)]
pub enum ConsentError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Storage unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl ConsentError {
    pub fn not_found(what: impl Into<String>) -> Self {
        ConsentError::NotFound(what.into())
    }

    pub fn forbidden(why: impl Into<String>) -> Self {
        ConsentError::Forbidden(why.into())
    }

    pub fn bad_request(why: impl Into<String>) -> Self {
        ConsentError::BadRequest(why.into())
    }

    /// Short machine-readable code, used as a tracing field.
    pub fn code(&self) -> &'static str {
        match self {
            ConsentError::NotFound(_) => "not_found",
            ConsentError::Forbidden(_) => "forbidden",
            ConsentError::BadRequest(_) => "bad_request",
            ConsentError::Unavailable(_) => "unavailable",
        }
    }
}
