//! Response envelopes and status mapping.
//!
//! | outcome             | status | body                                        |
//! |---------------------|--------|---------------------------------------------|
//! | fresh identity      | 201    | `{ "contact": { ... } }`                    |
//! | existing identity   | 200    | `{ "contact": { ... } }`                    |
//! | validation failure  | 400    | `{ "success": false, "message": ... }`      |
//! | anything else       | 500    | `{ "success": false, "message": ... }`      |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{IdentityError, IdentityResult, ValidationError};
use crate::identity::{Resolution, ResolvedIdentity};

pub const MISSING_IDENTIFIER_MESSAGE: &str = "At least one of email or phoneNumber must be provided";
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Outcome class of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyStatus {
    Created,
    Ok,
    BadRequest,
    InternalError,
}

impl ReplyStatus {
    /// HTTP-equivalent status code.
    #[must_use]
    pub const fn http_code(self) -> u16 {
        match self {
            Self::Created => 201,
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::InternalError => 500,
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Created | Self::Ok)
    }
}

/// Success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEnvelope {
    pub contact: ResolvedIdentity,
}

/// Failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
}

impl ErrorEnvelope {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    /// The JSON body for this failure.
    #[must_use]
    pub fn into_body(self) -> Value {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(self.success));
        body.insert("message".to_string(), Value::String(self.message));
        Value::Object(body)
    }
}

/// A status plus JSON body, ready for any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: ReplyStatus,
    pub body: Value,
}

impl Reply {
    /// A 400 reply carrying `message`.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: ReplyStatus::BadRequest,
            body: ErrorEnvelope::new(message).into_body(),
        }
    }

    /// A 500 reply; never carries detail.
    #[must_use]
    pub fn internal_error() -> Self {
        Self {
            status: ReplyStatus::InternalError,
            body: ErrorEnvelope::new(INTERNAL_ERROR_MESSAGE).into_body(),
        }
    }
}

fn validation_message(err: &ValidationError) -> String {
    match err {
        ValidationError::MissingIdentifier | ValidationError::EmptyContact => {
            MISSING_IDENTIFIER_MESSAGE.to_string()
        }
        ValidationError::InvalidPhoneNumber { .. } | ValidationError::MalformedRequest { .. } => {
            err.to_string()
        }
    }
}

/// Map a resolution result onto its reply.
///
/// Internal failures are logged here and replaced by a generic message.
#[must_use]
pub fn reply(result: IdentityResult<Resolution>) -> Reply {
    match result {
        Ok(resolution) => {
            let status = if resolution.is_created() {
                ReplyStatus::Created
            } else {
                ReplyStatus::Ok
            };
            let body = ContactEnvelope {
                contact: resolution.identity,
            };
            match serde_json::to_value(&body) {
                Ok(body) => Reply { status, body },
                Err(e) => internal(&IdentityError::internal(format!("failed to encode reply: {e}"))),
            }
        }
        Err(IdentityError::Validation(err)) => {
            tracing::debug!(error = %err, "rejected request");
            Reply::bad_request(validation_message(&err))
        }
        Err(err) => internal(&err),
    }
}

fn internal(err: &IdentityError) -> Reply {
    tracing::error!(error = %err, "identify failed");
    Reply::internal_error()
}
