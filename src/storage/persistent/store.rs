//! Durable contact store.
//!
//! The table lives in memory exactly as in [`InMemoryContactStore`]; each
//! committed transaction is appended to the WAL before its writes are
//! released. On open the snapshot is loaded and the WAL replayed over it.
//!
//! [`InMemoryContactStore`]: crate::storage::InMemoryContactStore

use std::collections::HashSet;
use std::fs;
use std::io::Error as IoError;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;

use crate::contact::{Contact, ContactId};
use crate::storage::table::{CommitSink, ContactChange, ContactTable, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};

use super::file_lock::DirLock;
use super::snapshot::{self, SnapshotImage};
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::Backend(format!("poisoned lock: {context}"))
}

fn io_err(context: &str, err: IoError) -> StorageError {
    StorageError::Io(format!("{context}: {err}"))
}

/// Outcome of a compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Contacts written to the snapshot.
    pub contacts: usize,
    /// Last WAL sequence folded into the snapshot.
    pub covers_sequence: u64,
    pub wal_size_before: u64,
    pub wal_size_after: u64,
}

/// WAL plus snapshot writer; the commit hook of the persistent store.
struct Journal {
    dir: PathBuf,
    wal: WriteAheadLog,
    config: PersistentConfig,
}

impl Journal {
    fn compact(&self, table: &ContactTable) -> Result<CompactionReport, StorageError> {
        let wal_size_before = self.wal.size_bytes().map_err(|e| io_err("failed to stat WAL", e))?;
        let covers_sequence = self
            .wal
            .current_sequence()
            .map_err(|e| io_err("failed to read WAL sequence", e))?;

        let image = SnapshotImage {
            covers_sequence,
            written_at: Utc::now(),
            table: table.snapshot(),
        };
        let contacts = image.table.contacts.len();
        snapshot::store(&self.dir, &image).map_err(|e| io_err("failed to write snapshot", e))?;

        // Replaying changes already in the snapshot is harmless, so a crash
        // between the rename and the truncate loses nothing.
        self.wal.truncate().map_err(|e| io_err("failed to truncate WAL", e))?;
        self.wal
            .append(WalEntryKind::Checkpoint { up_to_sequence: covers_sequence })
            .map_err(|e| io_err("failed to write checkpoint", e))?;

        let wal_size_after = self.wal.size_bytes().map_err(|e| io_err("failed to stat WAL", e))?;
        tracing::info!(
            contacts,
            covers_sequence,
            wal_size_before,
            wal_size_after,
            "compacted WAL into snapshot"
        );

        Ok(CompactionReport {
            contacts,
            covers_sequence,
            wal_size_before,
            wal_size_after,
        })
    }
}

impl CommitSink for Journal {
    fn persist(&self, table: &ContactTable, changes: &[ContactChange]) -> Result<(), StorageError> {
        self.wal
            .append(WalEntryKind::Commit { changes: changes.to_vec() })
            .map_err(|e| io_err("failed to append commit", e))?;

        // The commit is durable from here on; nothing below may fail it.
        match self.wal.size_bytes() {
            Ok(size) if size > self.config.max_wal_size => {
                if let Err(e) = self.compact(table) {
                    tracing::warn!(error = %e, wal_size = size, "automatic compaction failed");
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to stat WAL after commit"),
        }
        Ok(())
    }
}

/// Contact store backed by a data directory.
///
/// Holds an exclusive lock on the directory until dropped.
pub struct PersistentContactStore {
    table: Mutex<ContactTable>,
    journal: Journal,
    _lock: DirLock,
}

impl PersistentContactStore {
    /// Open or create the store in `dir`.
    ///
    /// # Errors
    /// - the directory cannot be created
    /// - another process holds the directory lock
    /// - the snapshot or WAL header is unreadable
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir).map_err(|e| io_err("failed to create data directory", e))?;
        let lock = DirLock::acquire(dir).map_err(|e| io_err("failed to acquire lock", e))?;

        let mut table = match snapshot::load(dir).map_err(|e| io_err("failed to load snapshot", e))? {
            Some(image) => {
                tracing::info!(
                    contacts = image.table.contacts.len(),
                    covers_sequence = image.covers_sequence,
                    "loaded snapshot"
                );
                ContactTable::from_snapshot(image.table)?
            }
            None => ContactTable::new(),
        };

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("failed to open WAL", e))?;
        Self::replay(&wal, &mut table)?;

        Ok(Self {
            table: Mutex::new(table),
            journal: Journal {
                dir: dir.to_path_buf(),
                wal,
                config,
            },
            _lock: lock,
        })
    }

    fn replay(wal: &WriteAheadLog, table: &mut ContactTable) -> Result<(), StorageError> {
        let mut commits = 0usize;
        let mut changes = 0usize;
        for entry in wal.iter().map_err(|e| io_err("failed to iterate WAL", e))? {
            let entry = entry.map_err(|e| io_err("corrupted WAL entry", e))?;
            match entry.kind {
                WalEntryKind::Commit { changes: batch } => {
                    for change in &batch {
                        table.apply_change(change);
                    }
                    commits += 1;
                    changes += batch.len();
                }
                WalEntryKind::Checkpoint { up_to_sequence } => {
                    tracing::debug!(up_to_sequence, "skipping checkpoint marker");
                }
            }
        }
        if commits > 0 {
            tracing::info!(commits, changes, "replayed WAL");
        }
        Ok(())
    }

    /// Load pre-existing records verbatim and make them durable.
    ///
    /// Like [`InMemoryContactStore::seed`], links are not checked.
    ///
    /// [`InMemoryContactStore::seed`]: crate::storage::InMemoryContactStore::seed
    pub fn seed(&self, contacts: impl IntoIterator<Item = Contact>) -> Result<(), StorageError> {
        let mut table = self.table.lock().map_err(|_| lock_err("contact.seed"))?;
        let contacts: Vec<Contact> = contacts.into_iter().collect();

        let mut seen = HashSet::new();
        for contact in &contacts {
            if table.get(contact.id).is_some() || !seen.insert(contact.id) {
                return Err(StorageError::InvalidRecord(format!(
                    "duplicate contact id {}",
                    contact.id
                )));
            }
        }
        if contacts.is_empty() {
            return Ok(());
        }

        let changes: Vec<ContactChange> =
            contacts.iter().cloned().map(ContactChange::Inserted).collect();
        self.journal
            .wal
            .append(WalEntryKind::Commit { changes })
            .map_err(|e| io_err("failed to append seed", e))?;
        for contact in contacts {
            table.seed(contact)?;
        }
        Ok(())
    }

    /// Fold the WAL into a fresh snapshot and truncate it.
    pub fn compact(&self) -> Result<CompactionReport, StorageError> {
        let table = self.table.lock().map_err(|_| lock_err("contact.compact"))?;
        self.journal.compact(&table)
    }

    /// Current WAL size in bytes.
    pub fn wal_size(&self) -> Result<u64, StorageError> {
        self.journal
            .wal
            .size_bytes()
            .map_err(|e| io_err("failed to stat WAL", e))
    }

    /// Data directory this store owns.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.journal.dir
    }

    /// Number of committed contacts.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.table.lock().map_err(|_| lock_err("contact.len"))?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

impl ContactStore for PersistentContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let table = self.table.lock().map_err(|_| lock_err("contact.begin"))?;
        Ok(Box::new(TableTransaction::new(table, &self.journal)))
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

impl std::fmt::Debug for PersistentContactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentContactStore")
            .field("dir", &self.journal.dir)
            .field("config", &self.journal.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::contact::{ContactPatch, NewContact};

    fn small_config() -> PersistentConfig {
        PersistentConfig {
            max_wal_size: 4 * 1024,
            sync_on_write: false,
        }
    }

    #[test]
    fn commits_survive_reopen() {
        let dir = tempdir().unwrap();
        let (p1, p2) = {
            let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
            let mut tx = store.begin().unwrap();
            let p1 = tx.insert(NewContact::primary(Some("a@x.com".into()), None)).unwrap();
            let p2 = tx.insert(NewContact::primary(None, Some("42".into()))).unwrap();
            tx.commit().unwrap();

            let mut tx = store.begin().unwrap();
            tx.update_by_id(p2.id, &ContactPatch::demote_to(p1.id)).unwrap();
            tx.commit().unwrap();
            (p1, p2)
        };

        let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
        assert_eq!(store.len().unwrap(), 2);
        let demoted = store.get(p2.id).unwrap().unwrap();
        assert_eq!(demoted.linked_id, Some(p1.id));

        let mut tx = store.begin().unwrap();
        let next = tx.insert(NewContact::primary(Some("b@x.com".into()), None)).unwrap();
        tx.commit().unwrap();
        assert_eq!(next.id, ContactId::new(3));
    }

    #[test]
    fn rolled_back_transactions_never_reach_the_wal() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
            let mut tx = store.begin().unwrap();
            tx.insert(NewContact::primary(Some("ghost@x.com".into()), None)).unwrap();
        }
        let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn oversized_wal_compacts_on_commit() {
        let dir = tempdir().unwrap();
        {
            let store = PersistentContactStore::open(dir.path(), small_config()).unwrap();
            for i in 0..64 {
                let mut tx = store.begin().unwrap();
                tx.insert(NewContact::primary(Some(format!("user{i}@example.com")), None))
                    .unwrap();
                tx.commit().unwrap();
            }
            assert!(store.wal_size().unwrap() <= small_config().max_wal_size);
            assert!(dir.path().join(snapshot::SNAPSHOT_FILE).exists());
        }

        let store = PersistentContactStore::open(dir.path(), small_config()).unwrap();
        assert_eq!(store.len().unwrap(), 64);
    }

    #[cfg(unix)]
    #[test]
    fn commit_stands_when_the_wal_cannot_be_stat_after_append() {
        let dir = tempdir().unwrap();
        let store = PersistentContactStore::open(dir.path(), small_config()).unwrap();

        // the open handle keeps appending to the unlinked file
        fs::remove_file(dir.path().join(WAL_FILE)).unwrap();
        assert!(store.wal_size().is_err());

        let mut tx = store.begin().unwrap();
        let inserted = tx.insert(NewContact::primary(Some("kept@x.com".into()), None)).unwrap();
        tx.commit().unwrap();

        assert_eq!(store.get(inserted.id).unwrap().unwrap().email.as_deref(), Some("kept@x.com"));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn seed_is_durable_and_rejects_duplicates() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
            let legacy = NewContact::secondary(Some("old@x.com".into()), None, ContactId::new(99))
                .into_contact(ContactId::new(5), now);
            store.seed([legacy.clone()]).unwrap();
            assert!(matches!(store.seed([legacy]), Err(StorageError::InvalidRecord(_))));
        }
        let store = PersistentContactStore::open(dir.path(), PersistentConfig::default()).unwrap();
        let legacy = store.get(ContactId::new(5)).unwrap().unwrap();
        assert_eq!(legacy.linked_id, Some(ContactId::new(99)));
    }
}
