//! Persistent storage backend for idresolve.
//!
//! A data directory holds:
//! - `contacts.wal`: one CRC-checked record per committed transaction
//! - `contacts.snap`: the table as of the last compaction
//! - `.lock`: exclusive lock, one process per directory
//!
//! ```text
//! open:    load contacts.snap  ->  replay contacts.wal  ->  serve
//! commit:  append Commit record (fsync)  ->  release writes
//!          WAL > max_wal_size  ->  write snapshot, truncate WAL
//! ```

mod codec;
mod file_lock;
mod snapshot;
mod store;
mod wal;

pub use file_lock::DirLock;
pub use snapshot::SnapshotImage;
pub use store::{CompactionReport, PersistentContactStore};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::{ExecutionError, IdentityError, IdentityResult};

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// WAL size that triggers compaction after a commit (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every commit (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024,
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    const MIN_WAL_SIZE: u64 = 4 * 1024;

    pub fn validate(self) -> IdentityResult<Self> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(IdentityError::Execution(ExecutionError::Storage {
                message: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
                retryable: false,
            }));
        }
        Ok(self)
    }
}

/// Open or create a persistent contact store at the given path.
///
/// # Errors
/// - the configuration is invalid
/// - the path cannot be created or accessed
/// - another process holds the lock
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use idresolve::storage::persistent::open_database;
/// use idresolve::IdentityResolver;
///
/// let store = open_database("./contacts.idr", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> IdentityResult<PersistentContactStore> {
    let cfg = config.unwrap_or_default().validate()?;
    Ok(PersistentContactStore::open(path.as_ref(), cfg)?)
}
