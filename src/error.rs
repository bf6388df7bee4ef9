//! Error types for idresolve.
//!
//! All errors are strongly typed using thiserror. Validation errors never
//! touch the store; everything else surfaces to callers as an internal
//! failure with no detail leaked.

use thiserror::Error;

use crate::contact::ContactId;
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("at least one identifier required")]
    MissingIdentifier,

    #[error("Contact must carry an email or a phone number")]
    EmptyContact,

    #[error("Invalid phone number: {reason}")]
    InvalidPhoneNumber {
        reason: String,
    },

    #[error("Malformed request: {reason}")]
    MalformedRequest {
        reason: String,
    },
}

/// Execution errors that occur while a resolution runs against the store.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        retryable: bool,
    },

    #[error("No primary could be reached from matched contacts {contact_ids:?}")]
    UnresolvableLinkage {
        contact_ids: Vec<ContactId>,
    },

    #[error("Root contact {id} vanished from its own cluster")]
    MissingRoot {
        id: ContactId,
    },

    #[error("Resolution gave up after {attempts} conflicting attempts")]
    RetriesExhausted {
        attempts: u32,
    },
}

/// Top-level error type for idresolve.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl From<StorageError> for IdentityError {
    fn from(err: StorageError) -> Self {
        let retryable = matches!(err, StorageError::TransactionConflict(_));
        Self::Execution(ExecutionError::Storage {
            message: err.to_string(),
            retryable,
        })
    }
}

impl IdentityError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true for everything that maps to a server-side failure.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        !self.is_validation()
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(e, ExecutionError::Storage { retryable: true, .. }),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for idresolve operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
