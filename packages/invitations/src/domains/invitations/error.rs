use thiserror::Error;

use super::payload::PayloadAccessError;
use super::validation::ValidationErrors;

/// Failures surfaced by the invitation engine.
///
/// Lookup failures (`NotFound`, `TokenMismatch`, `Expired`, `AlreadyHandled`)
/// are terminal; callers choose how to render them and never retry.
#[derive(Error, Debug)]
pub enum InvitationError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Payload access denied: {0}")]
    PayloadAccess(#[from] PayloadAccessError),

    #[error("Invitation not found")]
    NotFound,

    #[error("Invitation key does not match")]
    TokenMismatch,

    #[error("Invitation has expired")]
    Expired,

    #[error("Invitation has already been handled")]
    AlreadyHandled,

    /// Another request resolved the invitation first.
    #[error("Invitation was resolved by a concurrent request")]
    TransitionConflict,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(anyhow::Error),
}

/// Store traits report through `anyhow`; a database failure underneath is
/// surfaced as [`InvitationError::Database`].
impl From<anyhow::Error> for InvitationError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<sqlx::Error>() {
            Ok(db) => InvitationError::Database(db),
            Err(err) => InvitationError::Internal(err),
        }
    }
}

impl InvitationError {
    /// Validation errors, if this is a validation failure
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            InvitationError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type InvitationResult<T> = std::result::Result<T, InvitationError>;
