//! Abstract storage traits for idresolve.
//!
//! The resolver only ever talks to a [`ContactTransaction`]. A store hands
//! one out from [`ContactStore::begin`]; every read and write inside it sees
//! one consistent snapshot, and nothing becomes visible to other
//! transactions until [`ContactTransaction::commit`]. Dropping a transaction
//! without committing discards its writes.

use thiserror::Error;

use crate::contact::{Contact, ContactId, ContactPatch, NewContact};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Contact not found.
    #[error("Contact not found: {0}")]
    ContactNotFound(ContactId),

    /// Record rejected by the store's invariants.
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Serializable isolation rejected the transaction; the whole unit of
    /// work may be retried.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Storage trait for contact records.
///
/// # Safety Considerations
/// - Transactions must be serializable with respect to each other
/// - Implementations should handle concurrent access safely
pub trait ContactStore: Send + Sync {
    /// Open a transaction.
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError>;

    /// Get a committed contact by ID.
    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// All committed contacts, ascending by ID.
    fn all(&self) -> Result<Vec<Contact>, StorageError>;
}

/// One serializable unit of work against a [`ContactStore`].
///
/// Every query returns contacts ascending by ID.
pub trait ContactTransaction {
    /// Contacts whose email equals `email` OR whose phone equals `phone`.
    /// `None` predicates are ignored; both `None` matches nothing.
    fn find_matching(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError>;

    /// Get a contact by ID.
    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError>;

    /// Contacts whose ID is one of `root_ids` or whose `linked_id` is one of them.
    fn find_cluster(&self, root_ids: &[ContactId]) -> Result<Vec<Contact>, StorageError>;

    /// Insert a new contact, assigning its ID and timestamps.
    fn insert(&mut self, contact: NewContact) -> Result<Contact, StorageError>;

    /// Patch a contact. Returns `ContactNotFound` if it does not exist.
    fn update_by_id(&mut self, id: ContactId, patch: &ContactPatch) -> Result<(), StorageError>;

    /// Re-point every contact linked to `old_linked_id` at `new_linked_id`.
    /// Returns the number of contacts changed.
    fn update_where_linked_id(
        &mut self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<usize, StorageError>;

    /// Make all writes durable and visible.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_contact_store_object_safe(_: &dyn ContactStore) {}
    fn _assert_contact_transaction_object_safe(_: &dyn ContactTransaction) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ContactNotFound(ContactId::new(42));
        assert!(err.to_string().contains("Contact not found: 42"));

        let err = StorageError::Backend("connection refused".to_string());
        assert!(err.to_string().contains("connection refused"));
    }
}
