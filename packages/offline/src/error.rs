use api::ApiError;
use store::{StoreError, ValidationError};
use thiserror::Error;

/// Failure surfaced to the caller of a [`Desk`](crate::Desk) operation.
#[derive(Debug, Error)]
pub enum DeskError {
    /// The record was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No session, or the server refused the token. The user must sign in.
    #[error("sign in required: {0}")]
    Auth(String),

    /// The local database could not be used and the server could not take the
    /// write either.
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Remote(ApiError),
}

impl From<ApiError> for DeskError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Auth(reason) => DeskError::Auth(reason),
            other => DeskError::Remote(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeskError>;
