//! In-memory storage backend.
//!
//! Thread-safe, volatile implementation of [`ContactStore`]. It is intended
//! for embedded usage, tests, and as a reference implementation.

use std::sync::Mutex;

use crate::contact::{Contact, ContactId};
use crate::storage::table::{ContactTable, NoopSink, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory contact store.
#[derive(Debug, Default)]
pub struct InMemoryContactStore {
    table: Mutex<ContactTable>,
    sink: NoopSink,
}

impl InMemoryContactStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load pre-existing records verbatim, IDs and links included.
    ///
    /// Links are not checked, so legacy rows with dangling or multi-hop
    /// links can be imported as they are.
    pub fn seed(&self, contacts: impl IntoIterator<Item = Contact>) -> Result<(), StorageError> {
        let mut table = self.table.lock().map_err(|_| lock_err("contact.seed"))?;
        for contact in contacts {
            table.seed(contact)?;
        }
        Ok(())
    }

    /// Number of committed contacts.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.table.lock().map_err(|_| lock_err("contact.len"))?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactStore for InMemoryContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let table = self.table.lock().map_err(|_| lock_err("contact.begin"))?;
        Ok(Box::new(TableTransaction::new(table, &self.sink)))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let table = self.table.lock().map_err(|_| lock_err("contact.get"))?;
        Ok(table.get(id).cloned())
    }

    fn all(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.lock().map_err(|_| lock_err("contact.all"))?;
        Ok(table.all())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use chrono::Utc;

    use super::*;
    use crate::contact::NewContact;

    #[test]
    fn committed_writes_are_visible_outside_the_transaction() {
        let store = InMemoryContactStore::new();

        let mut tx = store.begin().unwrap();
        let c = tx.insert(NewContact::primary(Some("doc@hillvalley.edu".into()), None)).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.get(c.id).unwrap(), Some(c));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn uncommitted_writes_vanish() {
        let store = InMemoryContactStore::new();
        {
            let mut tx = store.begin().unwrap();
            tx.insert(NewContact::primary(None, Some("1985".into()))).unwrap();
        }
        assert!(store.is_empty().unwrap());
        assert!(store.all().unwrap().is_empty());
    }

    #[test]
    fn seeded_ids_advance_the_sequence() {
        let store = InMemoryContactStore::new();
        let now = Utc::now();
        store
            .seed([NewContact::primary(Some("a@x.com".into()), None).into_contact(ContactId::new(40), now)])
            .unwrap();

        let mut tx = store.begin().unwrap();
        let next = tx.insert(NewContact::primary(Some("b@x.com".into()), None)).unwrap();
        tx.commit().unwrap();
        assert_eq!(next.id, ContactId::new(41));

        let dup = store.seed([NewContact::primary(Some("c@x.com".into()), None).into_contact(ContactId::new(40), now)]);
        assert!(matches!(dup, Err(StorageError::InvalidRecord(_))));
    }

    #[test]
    fn transactions_are_serialized_across_threads() {
        let store = Arc::new(InMemoryContactStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut tx = store.begin().unwrap();
                    let seen = tx.find_matching(Some("shared@x.com"), None).unwrap();
                    if seen.is_empty() {
                        tx.insert(NewContact::primary(Some("shared@x.com".into()), None)).unwrap();
                    } else {
                        tx.insert(NewContact::secondary(
                            Some(format!("t{i}@x.com")),
                            None,
                            seen[0].id,
                        ))
                        .unwrap();
                    }
                    tx.commit().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = store.all().unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all.iter().filter(|c| c.is_primary()).count(), 1);
    }
}
