//! Indexed contact table and its journaled transaction.
//!
//! Both shipped backends keep the full table in memory behind a mutex. A
//! [`TableTransaction`] holds that mutex for its whole lifetime, which makes
//! transactions serial. Writes land in the table immediately and are
//! journaled; an uncommitted transaction replays its undo journal on drop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::MutexGuard;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contact::{Contact, ContactId, ContactPatch, LinkPrecedence, NewContact};
use crate::storage::traits::{ContactTransaction, StorageError};

/// A committed change, as carried by the write-ahead log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactChange {
    Inserted(Contact),
    Updated(Contact),
}

/// Full table image used by snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub last_id: i64,
    pub contacts: Vec<Contact>,
}

fn check_shape(contact: &Contact) -> Result<(), StorageError> {
    match (contact.link_precedence, contact.linked_id) {
        (LinkPrecedence::Primary, Some(linked)) => Err(StorageError::InvalidRecord(format!(
            "primary contact {} cannot link to {linked}",
            contact.id
        ))),
        (LinkPrecedence::Secondary, None) => Err(StorageError::InvalidRecord(format!(
            "secondary contact {} has no linked id",
            contact.id
        ))),
        (LinkPrecedence::Secondary, Some(linked)) if linked == contact.id => {
            Err(StorageError::InvalidRecord(format!(
                "contact {} cannot link to itself",
                contact.id
            )))
        }
        _ => Ok(()),
    }
}

fn index_add(index: &mut HashMap<String, BTreeSet<ContactId>>, key: Option<&str>, id: ContactId) {
    if let Some(key) = key {
        index.entry(key.to_string()).or_default().insert(id);
    }
}

fn index_remove(index: &mut HashMap<String, BTreeSet<ContactId>>, key: Option<&str>, id: ContactId) {
    let Some(key) = key else {
        return;
    };
    if let Some(set) = index.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            index.remove(key);
        }
    }
}

/// In-memory contact table with secondary indexes on email, phone and link.
#[derive(Debug, Default)]
pub struct ContactTable {
    by_id: BTreeMap<ContactId, Contact>,
    by_email: HashMap<String, BTreeSet<ContactId>>,
    by_phone: HashMap<String, BTreeSet<ContactId>>,
    by_linked: HashMap<ContactId, BTreeSet<ContactId>>,
    last_id: i64,
    last_stamp: Option<DateTime<Utc>>,
}

impl ContactTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from a snapshot image.
    pub fn from_snapshot(snapshot: TableSnapshot) -> Result<Self, StorageError> {
        let mut table = Self::new();
        table.last_id = snapshot.last_id;
        for contact in snapshot.contacts {
            table.seed(contact)?;
        }
        Ok(table)
    }

    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            last_id: self.last_id,
            contacts: self.by_id.values().cloned().collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ContactId) -> Option<&Contact> {
        self.by_id.get(&id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<Contact> {
        self.by_id.values().cloned().collect()
    }

    /// Insert a fully-formed record with its own ID, bypassing link checks.
    ///
    /// Used to load snapshots and import legacy rows, which may carry broken
    /// or multi-hop links.
    pub fn seed(&mut self, contact: Contact) -> Result<(), StorageError> {
        if self.by_id.contains_key(&contact.id) {
            return Err(StorageError::InvalidRecord(format!(
                "duplicate contact id {}",
                contact.id
            )));
        }
        self.last_id = self.last_id.max(contact.id.get());
        self.put(contact);
        Ok(())
    }

    /// Apply a logged change during WAL replay.
    pub fn apply_change(&mut self, change: &ContactChange) {
        let contact = match change {
            ContactChange::Inserted(c) | ContactChange::Updated(c) => c.clone(),
        };
        self.last_id = self.last_id.max(contact.id.get());
        self.put(contact);
    }

    fn find_matching(&self, email: Option<&str>, phone: Option<&str>) -> Vec<Contact> {
        let mut ids: BTreeSet<ContactId> = BTreeSet::new();
        if let Some(set) = email.and_then(|e| self.by_email.get(e)) {
            ids.extend(set.iter().copied());
        }
        if let Some(set) = phone.and_then(|p| self.by_phone.get(p)) {
            ids.extend(set.iter().copied());
        }
        self.collect(ids)
    }

    fn find_cluster(&self, root_ids: &[ContactId]) -> Vec<Contact> {
        let mut ids: BTreeSet<ContactId> = BTreeSet::new();
        for root in root_ids {
            if self.by_id.contains_key(root) {
                ids.insert(*root);
            }
            if let Some(linked) = self.by_linked.get(root) {
                ids.extend(linked.iter().copied());
            }
        }
        self.collect(ids)
    }

    fn collect(&self, ids: BTreeSet<ContactId>) -> Vec<Contact> {
        ids.into_iter()
            .filter_map(|id| self.by_id.get(&id).cloned())
            .collect()
    }

    /// Store-side clock: never runs backwards, so creation order and ID
    /// order agree.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_stamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_stamp = Some(stamp);
        stamp
    }

    fn put(&mut self, contact: Contact) -> Option<Contact> {
        let prev = self.remove(contact.id);
        index_add(&mut self.by_email, contact.email.as_deref(), contact.id);
        index_add(&mut self.by_phone, contact.phone_number.as_deref(), contact.id);
        if let Some(linked) = contact.linked_id {
            self.by_linked.entry(linked).or_default().insert(contact.id);
        }
        self.by_id.insert(contact.id, contact);
        prev
    }

    fn remove(&mut self, id: ContactId) -> Option<Contact> {
        let prev = self.by_id.remove(&id)?;
        index_remove(&mut self.by_email, prev.email.as_deref(), id);
        index_remove(&mut self.by_phone, prev.phone_number.as_deref(), id);
        if let Some(linked) = prev.linked_id {
            if let Some(set) = self.by_linked.get_mut(&linked) {
                set.remove(&id);
                if set.is_empty() {
                    self.by_linked.remove(&linked);
                }
            }
        }
        Some(prev)
    }
}

/// Hook run when a transaction commits, after validation and before the
/// writes are released.
pub trait CommitSink: Send + Sync {
    /// Make `changes` durable. `table` already reflects them.
    fn persist(&self, table: &ContactTable, changes: &[ContactChange]) -> Result<(), StorageError>;
}

/// Sink for volatile stores.
#[derive(Debug, Default)]
pub struct NoopSink;

impl CommitSink for NoopSink {
    fn persist(&self, _table: &ContactTable, _changes: &[ContactChange]) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug)]
enum Undo {
    Insert {
        id: ContactId,
        last_id: i64,
    },
    Update(Contact),
}

/// Journaled transaction over a locked [`ContactTable`].
pub struct TableTransaction<'a> {
    table: MutexGuard<'a, ContactTable>,
    sink: &'a dyn CommitSink,
    undo: Vec<Undo>,
    changes: Vec<ContactChange>,
    committed: bool,
}

impl<'a> TableTransaction<'a> {
    pub fn new(table: MutexGuard<'a, ContactTable>, sink: &'a dyn CommitSink) -> Self {
        Self {
            table,
            sink,
            undo: Vec::new(),
            changes: Vec::new(),
            committed: false,
        }
    }

    fn rollback(&mut self) {
        while let Some(step) = self.undo.pop() {
            match step {
                Undo::Insert { id, last_id } => {
                    self.table.remove(id);
                    self.table.last_id = last_id;
                }
                Undo::Update(prev) => {
                    self.table.put(prev);
                }
            }
        }
        self.changes.clear();
    }

    fn patch(&mut self, id: ContactId, patch: &ContactPatch, now: DateTime<Utc>) -> Result<(), StorageError> {
        let prev = self
            .table
            .get(id)
            .cloned()
            .ok_or(StorageError::ContactNotFound(id))?;
        let mut next = prev.clone();
        next.apply(patch, now);
        check_shape(&next)?;

        self.table.put(next.clone());
        self.undo.push(Undo::Update(prev));
        self.changes.push(ContactChange::Updated(next));
        Ok(())
    }
}

impl ContactTransaction for TableTransaction<'_> {
    fn find_matching(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.find_matching(email, phone))
    }

    fn find_by_id(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        Ok(self.table.get(id).cloned())
    }

    fn find_cluster(&self, root_ids: &[ContactId]) -> Result<Vec<Contact>, StorageError> {
        Ok(self.table.find_cluster(root_ids))
    }

    fn insert(&mut self, contact: NewContact) -> Result<Contact, StorageError> {
        contact
            .validate()
            .map_err(|e| StorageError::InvalidRecord(e.to_string()))?;

        let last_id = self.table.last_id;
        let id = ContactId::new(last_id + 1);
        let now = self.table.stamp();
        let record = contact.into_contact(id, now);
        check_shape(&record)?;

        self.table.last_id = id.get();
        self.table.put(record.clone());
        self.undo.push(Undo::Insert { id, last_id });
        self.changes.push(ContactChange::Inserted(record.clone()));
        Ok(record)
    }

    fn update_by_id(&mut self, id: ContactId, patch: &ContactPatch) -> Result<(), StorageError> {
        let now = self.table.stamp();
        self.patch(id, patch, now)
    }

    fn update_where_linked_id(
        &mut self,
        old_linked_id: ContactId,
        new_linked_id: ContactId,
    ) -> Result<usize, StorageError> {
        if old_linked_id == new_linked_id {
            return Ok(0);
        }
        let ids: Vec<ContactId> = self
            .table
            .by_linked
            .get(&old_linked_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();

        let now = self.table.stamp();
        let patch = ContactPatch::relink_to(new_linked_id);
        for id in &ids {
            self.patch(*id, &patch, now)?;
        }
        Ok(ids.len())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        if !self.changes.is_empty() {
            self.sink.persist(&self.table, &self.changes)?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for TableTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}
