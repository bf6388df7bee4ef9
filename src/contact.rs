//! Contact records and identifiers.
//!
//! A [`Contact`] is the only stored entity. Contacts form clusters through
//! `linked_id`: every cluster has exactly one primary, and every secondary
//! points straight at that primary.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Store-assigned contact identifier.
///
/// Ids increase monotonically in creation order, so comparing two ids also
/// compares their age.
///
/// # Examples
///
/// ```
/// use idresolve::ContactId;
///
/// assert!(ContactId::new(1) < ContactId::new(2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(i64);

impl ContactId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContactId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

/// Role of a contact within its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPrecedence {
    /// Canonical representative of a cluster.
    Primary,
    /// Folded into a primary's cluster.
    Secondary,
}

impl fmt::Display for LinkPrecedence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A stored contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone_number: Option<String>,

    /// Set only on secondaries.
    #[serde(default)]
    pub linked_id: Option<ContactId>,

    pub link_precedence: LinkPrecedence,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Returns true if this contact is its cluster's primary.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    /// Returns true if this contact is a secondary.
    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Secondary
    }

    /// Applies a patch in place, stamping `updated_at`.
    pub fn apply(&mut self, patch: &ContactPatch, now: DateTime<Utc>) {
        if let Some(precedence) = patch.link_precedence {
            self.link_precedence = precedence;
        }
        if let Some(linked) = patch.linked_id {
            self.linked_id = linked;
        }
        self.updated_at = now;
    }
}

/// Insert payload. The store assigns `id`, `created_at` and `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// A fresh primary with no link.
    #[must_use]
    pub fn primary(email: Option<String>, phone_number: Option<String>) -> Self {
        Self {
            email,
            phone_number,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// A secondary attached directly to `primary_id`.
    #[must_use]
    pub fn secondary(
        email: Option<String>,
        phone_number: Option<String>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email,
            phone_number,
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    /// Checks the record-level invariants before insertion.
    ///
    /// # Errors
    /// Returns `EmptyContact` when neither identifier is present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let has_email = self.email.as_deref().is_some_and(|e| !e.is_empty());
        let has_phone = self.phone_number.as_deref().is_some_and(|p| !p.is_empty());
        if !has_email && !has_phone {
            return Err(ValidationError::EmptyContact);
        }
        Ok(())
    }

    /// Materializes the record with store-assigned fields.
    #[must_use]
    pub fn into_contact(self, id: ContactId, now: DateTime<Utc>) -> Contact {
        Contact {
            id,
            email: self.email,
            phone_number: self.phone_number,
            linked_id: self.linked_id,
            link_precedence: self.link_precedence,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Update payload. `None` leaves a field untouched; `linked_id:
/// Some(None)` clears the link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub link_precedence: Option<LinkPrecedence>,
    pub linked_id: Option<Option<ContactId>>,
}

impl ContactPatch {
    /// Demotes a primary into a secondary of `primary_id`.
    #[must_use]
    pub fn demote_to(primary_id: ContactId) -> Self {
        Self {
            link_precedence: Some(LinkPrecedence::Secondary),
            linked_id: Some(Some(primary_id)),
        }
    }

    /// Re-points a secondary at `primary_id` without touching its role.
    #[must_use]
    pub fn relink_to(primary_id: ContactId) -> Self {
        Self {
            link_precedence: None,
            linked_id: Some(Some(primary_id)),
        }
    }
}
