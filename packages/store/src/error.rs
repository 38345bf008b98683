//! Error types for local persistence and record validation.

use thiserror::Error;

use crate::models::EntityType;

/// Errors raised by a [`KvStore`](crate::KvStore) backend or the typed wrappers on top of it.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The persistence mechanism could not be opened (disabled, unsupported,
    /// unwritable). Callers degrade to network-only mode.
    #[error("local storage unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record was written without an identifier.
    #[error("{0} record has no identifier")]
    MissingId(EntityType),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A record failed validation before any storage write.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field missing: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    /// A non-admin tried to register a second proposed aid for the same resident.
    #[error("resident already received a proposed aid; contact an admin")]
    ProposedAidExists,
}
